//! Action trait — the plugin contract.
//!
//! An action is a pluggable unit with two optional lifecycle hooks
//! (`start`, `stop`) and two optional pipeline hooks (`process_input`,
//! `process_output`). Active actions are folded over every turn's payload in
//! ascending priority order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityBag, CapabilitySet};
use crate::error::HookError;

/// How an action is described before its module is ever loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Unique key
    pub name: String,

    /// Lower runs earlier; real-valued so actions can be slotted between
    /// existing ones without renumbering.
    pub priority: f64,

    /// Where the module comes from: `builtin:<kind>` or a manifest path
    /// relative to the plugin directory.
    pub module: String,

    #[serde(default)]
    pub active_by_default: bool,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>, priority: f64, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority,
            module: module.into(),
            active_by_default: false,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn active_by_default(mut self, active: bool) -> Self {
        self.active_by_default = active;
        self
    }
}

/// The hooks an action module exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Start,
    Stop,
    ProcessInput,
    ProcessOutput,
}

impl HookKind {
    pub const ALL: &'static [HookKind] = &[
        HookKind::Start,
        HookKind::Stop,
        HookKind::ProcessInput,
        HookKind::ProcessOutput,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::Start => "start",
            HookKind::Stop => "stop",
            HookKind::ProcessInput => "process_input",
            HookKind::ProcessOutput => "process_output",
        }
    }
}

/// The turn's text as it moves through the pipeline.
///
/// `Terminal` means an action already produced the final answer: the
/// orchestrator skips every model call and the text is delivered as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum Payload {
    Continue(String),
    Terminal(String),
}

impl Payload {
    pub fn text(&self) -> &str {
        match self {
            Payload::Continue(text) | Payload::Terminal(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Payload::Continue(text) | Payload::Terminal(text) => text,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Payload::Terminal(_))
    }

    /// Fold one hook's outcome into this payload.
    ///
    /// A replacement keeps the current state, so once terminal a payload
    /// stays terminal for the rest of the chain.
    pub fn apply(self, outcome: HookOutcome) -> Payload {
        match (self, outcome) {
            (current, HookOutcome::Unchanged) => current,
            (Payload::Continue(_), HookOutcome::Replace(text)) => Payload::Continue(text),
            (Payload::Terminal(_), HookOutcome::Replace(text)) => Payload::Terminal(text),
            (_, HookOutcome::Terminal(text)) => Payload::Terminal(text),
        }
    }
}

/// What a pipeline hook did with the payload it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Unchanged,
    Replace(String),
    /// Replace and mark the payload as the turn's final answer.
    Terminal(String),
}

/// Where an entry sits in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Descriptor known, module never loaded
    Registered,
    /// Module loaded, not running
    Loaded,
    /// Start hook executed
    Active,
}

/// Read-only view of one registry entry, as published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStatus {
    pub name: String,
    pub priority: f64,
    pub state: LifecycleState,
    /// Hook names harvested at load time (empty until loaded).
    #[serde(default)]
    pub hooks: Vec<HookKind>,
}

impl ActionStatus {
    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }
}

/// The core Action trait.
///
/// Every hook has a no-op default, so a module only overrides what it needs.
/// [`Action::hooks`] must list the hooks it actually overrides; the dispatcher
/// never calls a pipeline hook that is not listed there.
#[async_trait]
pub trait Action: Send + Sync {
    /// The module's own name, used in logs.
    fn name(&self) -> &str;

    /// Exported hooks, harvested at load time.
    fn hooks(&self) -> &[HookKind];

    /// Capabilities this action's hooks may use.
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }

    async fn start(&self, _caps: &CapabilityBag) -> Result<(), HookError> {
        Ok(())
    }

    async fn stop(&self, _caps: &CapabilityBag) -> Result<(), HookError> {
        Ok(())
    }

    async fn process_input(
        &self,
        _payload: &Payload,
        _is_command: bool,
        _caps: &CapabilityBag,
    ) -> Result<HookOutcome, HookError> {
        Ok(HookOutcome::Unchanged)
    }

    async fn process_output(&self, _payload: &Payload, _caps: &CapabilityBag) -> Result<HookOutcome, HookError> {
        Ok(HookOutcome::Unchanged)
    }
}
