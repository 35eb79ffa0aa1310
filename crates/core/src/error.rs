//! Error types for the Chorus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::capability::Capability;

/// The top-level error type for all Chorus operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Action lifecycle errors ---
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    // --- Capability errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A failed outbound model call.
///
/// Every variant is turned into a placeholder for the call's slot by the
/// orchestrator; none of them abort a turn.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Call budget exhausted: {cap} model calls already made")]
    GateDenied { cap: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Gate denials and credential problems are permanent for the lifetime of
    /// the call budget / key and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Timeout(_)
                | ProviderError::RateLimited { .. }
        ) || matches!(self, ProviderError::ApiError { status_code, .. } if *status_code >= 500)
    }
}

/// A plugin module could not be resolved or constructed.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("No descriptor registered for action '{0}'")]
    UnknownAction(String),

    #[error("Module '{module}' not found for action '{action}'")]
    ModuleNotFound { action: String, module: String },

    #[error("Module '{module}' failed to load: {reason}")]
    ImportFailed { module: String, reason: String },
}

/// A plugin hook (lifecycle or pipeline) failed.
#[derive(Debug, Clone, Error)]
#[error("{hook} hook of '{action}' failed: {reason}")]
pub struct HookError {
    pub action: String,
    pub hook: &'static str,
    pub reason: String,
}

impl HookError {
    pub fn new(action: impl Into<String>, hook: &'static str, reason: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            hook,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("Action not found: {0}")]
    NotFound(String),
}

/// An action tried to use a capability it never declared.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Action '{action}' did not request the {capability} capability")]
    NotGranted {
        action: String,
        capability: Capability,
    },

    #[error("Provider switch rejected: {0}")]
    SwitchRejected(String),
}
