//! Configuration loading, validation, and management for Chorus.
//!
//! Loads configuration from `~/.chorus/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.chorus/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// The model that answers every turn
    #[serde(default)]
    pub primary: PrimaryConfig,

    /// Global outbound call budget
    #[serde(default)]
    pub gate: GateConfig,

    /// Turn loop and action registry settings
    #[serde(default)]
    pub host: HostSettings,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Secondary model calls made alongside the primary
    #[serde(default)]
    pub consultants: Vec<ConsultantConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_primary_history() -> usize {
    20
}
fn default_consultant_history() -> usize {
    4
}
fn default_gate_cap() -> u64 {
    1000
}
fn default_snapshot_interval() -> u64 {
    30
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    2
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfig")
            .field("api_key", &redact(&self.api_key))
            .field("primary", &self.primary)
            .field("gate", &self.gate)
            .field("host", &self.host)
            .field("providers", &self.providers)
            .field("consultants", &self.consultants)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Messages of history sent with each primary call
    #[serde(default = "default_primary_history")]
    pub history_window: usize,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            history_window: default_primary_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Maximum outbound model calls for the lifetime of the host (until reset)
    #[serde(default = "default_gate_cap")]
    pub cap: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cap: default_gate_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Pause between turns
    #[serde(default)]
    pub turn_delay_ms: u64,

    /// How often the background worker rewrites the active-actions snapshot
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,

    /// Persisted action descriptors (default: `<config_dir>/actions.toml`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_file: Option<PathBuf>,

    /// Directory scanned for plugin manifests (default: `<config_dir>/plugins`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,

    /// Active-actions snapshot (default: `<config_dir>/active_actions.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_file: Option<PathBuf>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            turn_delay_ms: 0,
            snapshot_interval_secs: default_snapshot_interval(),
            actions_file: None,
            plugin_dir: None,
            snapshot_file: None,
        }
    }
}

impl HostSettings {
    pub fn actions_file(&self) -> PathBuf {
        self.actions_file
            .clone()
            .unwrap_or_else(|| HostConfig::config_dir().join("actions.toml"))
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.plugin_dir
            .clone()
            .unwrap_or_else(|| HostConfig::config_dir().join("plugins"))
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.snapshot_file
            .clone()
            .unwrap_or_else(|| HostConfig::config_dir().join("active_actions.json"))
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after the first, for transient failures only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// When a consultant runs relative to the primary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultMode {
    /// Sequentially, before the primary; output is chained into later calls
    Live,
    /// Concurrently with the primary; output can be injected next turn
    Delayed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultantConfig {
    pub name: String,

    pub provider: String,

    pub model: String,

    pub mode: ConsultMode,

    #[serde(default = "default_consultant_history")]
    pub history_window: usize,

    /// Delayed mode only: prepend the output to the next turn's input
    #[serde(default)]
    pub inject_next_turn: bool,
}

impl HostConfig {
    /// Load configuration from the default path (~/.chorus/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CHORUS_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `CHORUS_PROVIDER`, `CHORUS_MODEL` for the primary target
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("CHORUS_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("CHORUS_PROVIDER") {
            config.primary.provider = provider;
        }

        if let Ok(model) = std::env::var("CHORUS_MODEL") {
            config.primary.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chorus")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.primary.temperature < 0.0 || self.primary.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "primary.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.gate.cap == 0 {
            return Err(ConfigError::ValidationError(
                "gate.cap must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for consultant in &self.consultants {
            if !seen.insert(consultant.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate consultant name '{}'",
                    consultant.name
                )));
            }
            if consultant.inject_next_turn && consultant.mode == ConsultMode::Live {
                tracing::warn!(
                    consultant = %consultant.name,
                    "inject_next_turn has no effect on live consultants"
                );
            }
        }

        Ok(())
    }

    /// Settings for a named provider, falling back to defaults.
    pub fn provider(&self, name: &str) -> ProviderConfig {
        self.providers.get(name).cloned().unwrap_or_else(|| ProviderConfig {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            ..ProviderConfig::default()
        })
    }

    /// Every provider name referenced anywhere in the config.
    pub fn referenced_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = std::iter::once(self.primary.provider.clone())
            .chain(self.providers.keys().cloned())
            .chain(self.consultants.iter().map(|c| c.provider.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            primary: PrimaryConfig::default(),
            gate: GateConfig::default(),
            host: HostSettings::default(),
            providers: HashMap::new(),
            consultants: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
