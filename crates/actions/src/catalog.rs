//! Module catalog — resolves a descriptor's module reference to a fresh
//! action instance.
//!
//! Two reference forms are understood:
//!
//! - `builtin:<kind>` — a kind registered in the catalog, configured from the
//!   descriptor's metadata.
//! - `<file>.toml` — a plugin manifest in the plugin directory naming a kind
//!   and its settings. The manifest is re-read on every resolve, so editing it
//!   and reloading the action swaps behavior without restarting the host.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chorus_core::action::{Action, ActionDescriptor};
use chorus_core::error::LoadError;
use serde::Deserialize;
use tracing::{debug, warn};

/// Prefix marking a module reference as a catalog built-in.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Everything a factory gets to build one action instance.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    /// The registry name of the action being built
    pub action: String,
    pub kind: String,
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl ModuleSpec {
    pub fn str_setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Builds an action from its spec. Errors are reported as import failures.
pub type ActionFactory = Arc<dyn Fn(&ModuleSpec) -> Result<Arc<dyn Action>, String> + Send + Sync>;

/// A plugin manifest on disk.
#[derive(Debug, Deserialize)]
struct PluginManifest {
    kind: String,
    #[serde(default)]
    priority: Option<f64>,
    #[serde(default)]
    active_by_default: bool,
    #[serde(default)]
    settings: serde_json::Map<String, serde_json::Value>,
}

/// A manifest found by [`ModuleCatalog::scan_plugins`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedPlugin {
    /// Module reference (file name relative to the plugin directory)
    pub module: String,
    /// File stem, used as the default action name
    pub stem: String,
    pub priority: Option<f64>,
    pub active_by_default: bool,
}

pub struct ModuleCatalog {
    factories: HashMap<String, ActionFactory>,
    plugin_dir: PathBuf,
}

impl ModuleCatalog {
    /// An empty catalog reading manifests from `plugin_dir`.
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            factories: HashMap::new(),
            plugin_dir: plugin_dir.into(),
        }
    }

    /// A catalog preloaded with the built-in action kinds.
    pub fn with_builtins(plugin_dir: impl Into<PathBuf>) -> Self {
        let mut catalog = Self::new(plugin_dir);
        crate::builtin::register_all(&mut catalog);
        catalog
    }

    /// Register (or replace) a module kind.
    pub fn register_kind<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleSpec) -> Result<Arc<dyn Action>, String> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Descriptors used when no persisted set is available.
    pub fn default_descriptors(&self) -> Vec<ActionDescriptor> {
        crate::builtin::default_descriptors()
    }

    /// Build a fresh action instance for `descriptor`.
    pub fn resolve(&self, descriptor: &ActionDescriptor) -> Result<Arc<dyn Action>, LoadError> {
        let spec = match descriptor.module.strip_prefix(BUILTIN_PREFIX) {
            Some(kind) => ModuleSpec {
                action: descriptor.name.clone(),
                kind: kind.to_string(),
                settings: descriptor.metadata.clone(),
            },
            None => self.read_manifest(descriptor)?,
        };

        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| LoadError::ModuleNotFound {
                action: descriptor.name.clone(),
                module: descriptor.module.clone(),
            })?;

        debug!(action = %descriptor.name, kind = %spec.kind, "Importing module");

        match std::panic::catch_unwind(AssertUnwindSafe(|| factory(&spec))) {
            Ok(Ok(action)) => Ok(action),
            Ok(Err(reason)) => Err(LoadError::ImportFailed {
                module: descriptor.module.clone(),
                reason,
            }),
            Err(_) => Err(LoadError::ImportFailed {
                module: descriptor.module.clone(),
                reason: "module constructor panicked".into(),
            }),
        }
    }

    fn read_manifest(&self, descriptor: &ActionDescriptor) -> Result<ModuleSpec, LoadError> {
        let path = self.plugin_dir.join(&descriptor.module);
        if !path.is_file() {
            return Err(LoadError::ModuleNotFound {
                action: descriptor.name.clone(),
                module: descriptor.module.clone(),
            });
        }

        let import_err = |reason: String| LoadError::ImportFailed {
            module: descriptor.module.clone(),
            reason,
        };

        let content = std::fs::read_to_string(&path).map_err(|e| import_err(e.to_string()))?;
        let manifest: PluginManifest = toml::from_str(&content).map_err(|e| import_err(e.to_string()))?;

        Ok(ModuleSpec {
            action: descriptor.name.clone(),
            kind: manifest.kind,
            settings: manifest.settings,
        })
    }

    /// Every `*.toml` manifest in the plugin directory, sorted by file name.
    pub fn scan_plugins(&self) -> Vec<ScannedPlugin> {
        let entries = match std::fs::read_dir(&self.plugin_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut found: Vec<ScannedPlugin> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
            .filter_map(|path| {
                let module = path.file_name()?.to_str()?.to_string();
                let stem = path.file_stem()?.to_str()?.to_string();
                let manifest = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|content| toml::from_str::<PluginManifest>(&content).ok());
                if manifest.is_none() {
                    warn!(path = %path.display(), "Plugin manifest unreadable, using defaults");
                }
                Some(ScannedPlugin {
                    module,
                    stem,
                    priority: manifest.as_ref().and_then(|m| m.priority),
                    active_by_default: manifest.as_ref().is_some_and(|m| m.active_by_default),
                })
            })
            .collect();

        found.sort_by(|a, b| a.module.cmp(&b.module));
        found
    }
}
