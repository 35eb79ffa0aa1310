//! Capabilities — the services the host exposes to action hooks.
//!
//! Each action declares up front which capabilities it needs
//! ([`crate::Action::capabilities`]). The dispatcher and the registry hand every
//! hook a [`CapabilityBag`] scoped to exactly that declared set; calling
//! anything outside it fails with [`CapabilityError::NotGranted`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::ActionStatus;
use crate::error::{CapabilityError, ProviderError};

/// A single host service an action may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Send a prompt to the active primary model.
    SendToModel,
    /// Read and write the shared key/value context.
    SharedContext,
    /// Push a notification to the user outside the turn reply.
    Notify,
    /// Look up another action's status by name.
    LookupAction,
    /// Queue a command to run before the next user turn.
    EnqueueCommand,
    /// Emit a structured event onto the host event bus.
    LogEvent,
    /// Inspect or switch the primary provider.
    ProviderControl,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::SendToModel,
        Capability::SharedContext,
        Capability::Notify,
        Capability::LookupAction,
        Capability::EnqueueCommand,
        Capability::LogEvent,
        Capability::ProviderControl,
    ];

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::SendToModel => "send_to_model",
            Capability::SharedContext => "shared_context",
            Capability::Notify => "notify",
            Capability::LookupAction => "lookup_action",
            Capability::EnqueueCommand => "enqueue_command",
            Capability::LogEvent => "log_event",
            Capability::ProviderControl => "provider_control",
        };
        f.write_str(name)
    }
}

/// A set of [`Capability`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Capability::ALL.iter().fold(Self::empty(), |set, cap| set.with(*cap))
    }

    /// Builder-style insertion, usable in `const` contexts.
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |cap| self.contains(*cap))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, cap| set.with(cap))
    }
}

/// Which provider/model currently answers primary calls, and how much of the
/// call budget is left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub model: String,
    pub available: Vec<String>,
    pub calls_made: u64,
    pub call_cap: u64,
}

/// The host side of the capability contract.
///
/// Implemented once by the orchestrator crate. Actions never see this trait
/// directly, only the filtered [`CapabilityBag`].
#[async_trait]
pub trait Host: Send + Sync {
    async fn send_to_model(&self, prompt: &str) -> Result<String, ProviderError>;

    fn context_get(&self, key: &str) -> Option<serde_json::Value>;

    fn context_set(&self, key: &str, value: serde_json::Value);

    fn notify(&self, message: &str);

    fn lookup_action(&self, name: &str) -> Option<ActionStatus>;

    fn enqueue_command(&self, command: String);

    fn log_event(&self, action: &str, event: &str, detail: serde_json::Value);

    fn provider_status(&self) -> ProviderStatus;

    fn switch_provider(&self, provider: &str, model: Option<&str>) -> Result<ProviderStatus, CapabilityError>;
}

/// The capability view handed to one action's hooks.
#[derive(Clone)]
pub struct CapabilityBag {
    host: Arc<dyn Host>,
    granted: CapabilitySet,
    action: String,
}

impl fmt::Debug for CapabilityBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBag")
            .field("action", &self.action)
            .field("granted", &self.granted.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityBag {
    pub fn new(host: Arc<dyn Host>, action: impl Into<String>, granted: CapabilitySet) -> Self {
        Self {
            host,
            granted,
            action: action.into(),
        }
    }

    /// The action this bag was scoped for.
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn granted(&self) -> CapabilitySet {
        self.granted
    }

    fn require(&self, capability: Capability) -> Result<&dyn Host, CapabilityError> {
        if self.granted.contains(capability) {
            Ok(self.host.as_ref())
        } else {
            Err(CapabilityError::NotGranted {
                action: self.action.clone(),
                capability,
            })
        }
    }

    pub async fn send_to_model(&self, prompt: &str) -> Result<String, crate::Error> {
        let host = self.require(Capability::SendToModel)?;
        Ok(host.send_to_model(prompt).await?)
    }

    pub fn context_get(&self, key: &str) -> Result<Option<serde_json::Value>, CapabilityError> {
        Ok(self.require(Capability::SharedContext)?.context_get(key))
    }

    pub fn context_set(&self, key: &str, value: serde_json::Value) -> Result<(), CapabilityError> {
        self.require(Capability::SharedContext)?.context_set(key, value);
        Ok(())
    }

    pub fn notify(&self, message: &str) -> Result<(), CapabilityError> {
        self.require(Capability::Notify)?.notify(message);
        Ok(())
    }

    pub fn lookup_action(&self, name: &str) -> Result<Option<ActionStatus>, CapabilityError> {
        Ok(self.require(Capability::LookupAction)?.lookup_action(name))
    }

    pub fn enqueue_command(&self, command: impl Into<String>) -> Result<(), CapabilityError> {
        self.require(Capability::EnqueueCommand)?
            .enqueue_command(command.into());
        Ok(())
    }

    pub fn log_event(&self, event: &str, detail: serde_json::Value) -> Result<(), CapabilityError> {
        self.require(Capability::LogEvent)?
            .log_event(&self.action, event, detail);
        Ok(())
    }

    pub fn provider_status(&self) -> Result<ProviderStatus, CapabilityError> {
        Ok(self.require(Capability::ProviderControl)?.provider_status())
    }

    pub fn switch_provider(&self, provider: &str, model: Option<&str>) -> Result<ProviderStatus, CapabilityError> {
        self.require(Capability::ProviderControl)?
            .switch_provider(provider, model)
    }
}
