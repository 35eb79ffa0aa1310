//! Persisted action descriptors and plugin discovery.
//!
//! Descriptors live in a TOML file (`[[actions]]` tables). Discovery merges
//! that file with any plugin manifests in the plugin directory that no
//! descriptor points at yet, then writes the merged set back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chorus_core::action::ActionDescriptor;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::ModuleCatalog;

/// Priority given to a synthesized descriptor when nothing else is known.
pub const DEFAULT_PRIORITY: f64 = 10.0;

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor file not found at {0}")]
    Missing(PathBuf),

    #[error("Failed to read descriptor file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Malformed descriptor file at {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Failed to write descriptor file at {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    actions: Vec<ActionDescriptor>,
}

/// The on-disk descriptor set.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    path: PathBuf,
}

impl DescriptorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the descriptor set. Duplicate names keep their first occurrence.
    pub fn load(&self) -> Result<Vec<ActionDescriptor>, DescriptorError> {
        if !self.path.exists() {
            return Err(DescriptorError::Missing(self.path.clone()));
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| DescriptorError::ReadError {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let file: DescriptorFile = toml::from_str(&content).map_err(|e| DescriptorError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(file.actions.len());
        for descriptor in file.actions {
            if !descriptor.priority.is_finite() {
                return Err(DescriptorError::Malformed {
                    path: self.path.clone(),
                    reason: format!("action '{}' has a non-finite priority", descriptor.name),
                });
            }
            if seen.insert(descriptor.name.clone()) {
                descriptors.push(descriptor);
            } else {
                warn!(action = %descriptor.name, "Duplicate descriptor ignored");
            }
        }
        Ok(descriptors)
    }

    /// Replace the file with `descriptors`.
    pub fn save(&self, descriptors: &[ActionDescriptor]) -> Result<(), DescriptorError> {
        let write_err = |reason: String| DescriptorError::WriteError {
            path: self.path.clone(),
            reason,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }

        let file = DescriptorFile {
            actions: descriptors.to_vec(),
        };
        let content = toml::to_string_pretty(&file).map_err(|e| write_err(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| write_err(e.to_string()))
    }
}

/// Reconcile the persisted descriptors with the plugin directory.
///
/// A missing or malformed descriptor file is never fatal: the catalog's
/// built-in defaults stand in and the file is recreated. Running discovery
/// twice yields the same set.
pub fn discover(store: &DescriptorStore, catalog: &ModuleCatalog) -> Vec<ActionDescriptor> {
    let mut descriptors = match store.load() {
        Ok(descriptors) => descriptors,
        Err(DescriptorError::Missing(path)) => {
            info!(path = %path.display(), "No descriptor file, using built-in defaults");
            catalog.default_descriptors()
        }
        Err(e) => {
            warn!(error = %e, "Descriptor file unusable, falling back to built-in defaults");
            catalog.default_descriptors()
        }
    };

    let known_modules: HashSet<String> = descriptors.iter().map(|d| d.module.clone()).collect();
    let mut known_names: HashSet<String> = descriptors.iter().map(|d| d.name.clone()).collect();

    for manifest in catalog.scan_plugins() {
        if known_modules.contains(&manifest.module) {
            continue;
        }

        let mut name = manifest.stem.clone();
        let mut suffix = 2;
        while known_names.contains(&name) {
            name = format!("{}_{suffix}", manifest.stem);
            suffix += 1;
        }

        let priority = manifest.priority.unwrap_or_else(|| next_priority(&descriptors));
        let mut descriptor = ActionDescriptor::new(&name, priority, &manifest.module)
            .active_by_default(manifest.active_by_default);
        descriptor
            .metadata
            .insert("synthesized".into(), serde_json::Value::Bool(true));

        info!(action = %name, module = %manifest.module, priority, "Discovered plugin without descriptor");
        known_names.insert(name);
        descriptors.push(descriptor);
    }

    if let Err(e) = store.save(&descriptors) {
        warn!(error = %e, "Could not write descriptor file");
    } else {
        debug!(count = descriptors.len(), path = %store.path().display(), "Descriptor file written");
    }

    descriptors
}

/// One past the highest existing priority, rounded down to a whole number.
fn next_priority(descriptors: &[ActionDescriptor]) -> f64 {
    descriptors
        .iter()
        .map(|d| d.priority)
        .fold(None, |max: Option<f64>, p| Some(max.map_or(p, |m| m.max(p))))
        .map_or(DEFAULT_PRIORITY, |max| max.floor() + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_for(dir: &Path) -> ModuleCatalog {
        ModuleCatalog::with_builtins(dir.join("plugins"))
    }

    #[test]
    fn missing_file_falls_back_to_defaults_and_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::new(dir.path().join("actions.toml"));
        let catalog = catalog_for(dir.path());

        let descriptors = discover(&store, &catalog);
        assert_eq!(descriptors, catalog.default_descriptors());
        assert!(store.path().exists());
        assert_eq!(store.load().unwrap(), descriptors);
    }

    #[test]
    fn malformed_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.toml");
        std::fs::write(&path, "[[actions]]\nname = 42\n").unwrap();
        let store = DescriptorStore::new(&path);
        assert!(matches!(store.load(), Err(DescriptorError::Malformed { .. })));

        let descriptors = discover(&store, &catalog_for(dir.path()));
        assert!(!descriptors.is_empty());
        assert!(store.load().is_ok());
    }

    #[test]
    fn plugins_without_descriptors_get_synthesized_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir_all(&plugins).unwrap();
        std::fs::write(
            plugins.join("shout.toml"),
            "kind = \"suffix\"\n[settings]\ntext = \"!\"\n",
        )
        .unwrap();
        std::fs::write(
            plugins.join("early.toml"),
            "kind = \"prefix\"\npriority = 0.25\nactive_by_default = true\n[settings]\ntext = \">\"\n",
        )
        .unwrap();

        let store = DescriptorStore::new(dir.path().join("actions.toml"));
        store
            .save(&[ActionDescriptor::new("status", 3.5, "builtin:status")])
            .unwrap();

        let descriptors = discover(&store, &catalog_for(dir.path()));
        assert_eq!(descriptors.len(), 3);

        let early = descriptors.iter().find(|d| d.name == "early").unwrap();
        assert_eq!(early.priority, 0.25);
        assert!(early.active_by_default);

        let shout = descriptors.iter().find(|d| d.name == "shout").unwrap();
        assert_eq!(shout.module, "shout.toml");
        assert_eq!(shout.priority, 4.0);
        assert!(!shout.active_by_default);
        assert_eq!(shout.metadata["synthesized"], serde_json::Value::Bool(true));
    }

    #[test]
    fn discovery_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir_all(&plugins).unwrap();
        std::fs::write(plugins.join("shout.toml"), "kind = \"suffix\"\n").unwrap();

        let store = DescriptorStore::new(dir.path().join("actions.toml"));
        let catalog = catalog_for(dir.path());
        let first = discover(&store, &catalog);
        let second = discover(&store, &catalog);
        assert_eq!(first, second);
    }

    #[test]
    fn next_priority_handles_empty_and_fractional() {
        assert_eq!(next_priority(&[]), DEFAULT_PRIORITY);
        let set = vec![
            ActionDescriptor::new("a", 0.5, "builtin:prefix"),
            ActionDescriptor::new("b", 10.3, "builtin:suffix"),
        ];
        assert_eq!(next_priority(&set), 11.0);
    }
}
