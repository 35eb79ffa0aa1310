//! Built-in action kinds.
//!
//! These cover the common cases without writing any Rust: plugin manifests
//! name one of these kinds and configure it through `[settings]`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::action::{Action, ActionDescriptor, HookKind, HookOutcome, Payload};
use chorus_core::capability::{Capability, CapabilityBag, CapabilitySet};
use chorus_core::error::HookError;

use crate::catalog::{ModuleCatalog, ModuleSpec};

/// Register every built-in kind on `catalog`.
pub fn register_all(catalog: &mut ModuleCatalog) {
    catalog.register_kind("prefix", |spec: &ModuleSpec| {
        Ok(Arc::new(PrefixAction::from_spec(spec)?) as Arc<dyn Action>)
    });
    catalog.register_kind("suffix", |spec: &ModuleSpec| {
        Ok(Arc::new(SuffixAction::from_spec(spec)?) as Arc<dyn Action>)
    });
    catalog.register_kind("substitute", |spec: &ModuleSpec| {
        Ok(Arc::new(SubstituteAction::from_spec(spec)?) as Arc<dyn Action>)
    });
    catalog.register_kind("status", |spec: &ModuleSpec| {
        Ok(Arc::new(StatusAction::new(&spec.action)) as Arc<dyn Action>)
    });
    catalog.register_kind("counter", |spec: &ModuleSpec| {
        Ok(Arc::new(CounterAction::new(&spec.action)) as Arc<dyn Action>)
    });
}

/// The descriptor set a fresh install starts with.
pub fn default_descriptors() -> Vec<ActionDescriptor> {
    vec![
        ActionDescriptor::new("status", 0.5, "builtin:status").active_by_default(true),
        ActionDescriptor::new("turn_counter", 1.0, "builtin:counter").active_by_default(true),
    ]
}

fn required_text(spec: &ModuleSpec) -> Result<String, String> {
    spec.str_setting("text")
        .map(str::to_string)
        .ok_or_else(|| format!("{} requires a 'text' setting", spec.kind))
}

/// Prepends fixed text to every non-command user input.
pub struct PrefixAction {
    name: String,
    text: String,
}

impl PrefixAction {
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, String> {
        Ok(Self {
            name: spec.action.clone(),
            text: required_text(spec)?,
        })
    }
}

#[async_trait]
impl Action for PrefixAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &[HookKind] {
        &[HookKind::ProcessInput]
    }

    async fn process_input(
        &self,
        payload: &Payload,
        is_command: bool,
        _caps: &CapabilityBag,
    ) -> Result<HookOutcome, HookError> {
        if is_command {
            return Ok(HookOutcome::Unchanged);
        }
        Ok(HookOutcome::Replace(format!("{}{}", self.text, payload.text())))
    }
}

/// Appends fixed text to every reply.
pub struct SuffixAction {
    name: String,
    text: String,
}

impl SuffixAction {
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, String> {
        Ok(Self {
            name: spec.action.clone(),
            text: required_text(spec)?,
        })
    }
}

#[async_trait]
impl Action for SuffixAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &[HookKind] {
        &[HookKind::ProcessOutput]
    }

    async fn process_output(&self, payload: &Payload, _caps: &CapabilityBag) -> Result<HookOutcome, HookError> {
        Ok(HookOutcome::Replace(format!("{}{}", payload.text(), self.text)))
    }
}

/// Literal word replacement on input, output, or both.
///
/// Settings: `replacements` (table of `from = "to"`) and `apply_to`
/// (`input`, `output` or `both`; default `both`).
pub struct SubstituteAction {
    name: String,
    replacements: BTreeMap<String, String>,
    hooks: Vec<HookKind>,
}

impl SubstituteAction {
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, String> {
        let table = spec
            .settings
            .get("replacements")
            .and_then(serde_json::Value::as_object)
            .ok_or("substitute requires a 'replacements' table")?;

        let mut replacements = BTreeMap::new();
        for (from, to) in table {
            let to = to
                .as_str()
                .ok_or_else(|| format!("replacement for '{from}' must be a string"))?;
            if from.is_empty() {
                return Err("replacement keys must not be empty".into());
            }
            replacements.insert(from.clone(), to.to_string());
        }

        let hooks = match spec.str_setting("apply_to").unwrap_or("both") {
            "input" => vec![HookKind::ProcessInput],
            "output" => vec![HookKind::ProcessOutput],
            "both" => vec![HookKind::ProcessInput, HookKind::ProcessOutput],
            other => return Err(format!("unknown apply_to '{other}'")),
        };

        Ok(Self {
            name: spec.action.clone(),
            replacements,
            hooks,
        })
    }

    fn rewrite(&self, text: &str) -> HookOutcome {
        let rewritten = self
            .replacements
            .iter()
            .fold(text.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to));
        if rewritten == text {
            HookOutcome::Unchanged
        } else {
            HookOutcome::Replace(rewritten)
        }
    }
}

#[async_trait]
impl Action for SubstituteAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &[HookKind] {
        &self.hooks
    }

    async fn process_input(
        &self,
        payload: &Payload,
        is_command: bool,
        _caps: &CapabilityBag,
    ) -> Result<HookOutcome, HookError> {
        if is_command {
            return Ok(HookOutcome::Unchanged);
        }
        Ok(self.rewrite(payload.text()))
    }

    async fn process_output(&self, payload: &Payload, _caps: &CapabilityBag) -> Result<HookOutcome, HookError> {
        Ok(self.rewrite(payload.text()))
    }
}

/// Answers `/status` commands without calling any model.
///
/// `/status` reports the primary provider and call budget;
/// `/status <action>` reports one action's lifecycle state.
pub struct StatusAction {
    name: String,
}

impl StatusAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn hook_error(&self, reason: impl ToString) -> HookError {
        HookError::new(&self.name, "process_input", reason.to_string())
    }
}

#[async_trait]
impl Action for StatusAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &[HookKind] {
        &[HookKind::ProcessInput]
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::LookupAction)
            .with(Capability::ProviderControl)
    }

    async fn process_input(
        &self,
        payload: &Payload,
        is_command: bool,
        caps: &CapabilityBag,
    ) -> Result<HookOutcome, HookError> {
        let text = payload.text().trim();
        let args = match text.strip_prefix("/status") {
            Some(rest) if is_command && (rest.is_empty() || rest.starts_with(' ')) => rest.trim(),
            _ => return Ok(HookOutcome::Unchanged),
        };

        let report = if args.is_empty() {
            let status = caps.provider_status().map_err(|e| self.hook_error(e))?;
            format!(
                "Primary: {} ({}). Calls used: {}/{}. Providers: {}",
                status.provider,
                status.model,
                status.calls_made,
                status.call_cap,
                status.available.join(", ")
            )
        } else {
            match caps.lookup_action(args).map_err(|e| self.hook_error(e))? {
                Some(status) => format!(
                    "{}: {:?} (priority {})",
                    status.name, status.state, status.priority
                ),
                None => format!("No action named '{args}'"),
            }
        };

        Ok(HookOutcome::Terminal(report))
    }
}

/// Counts user turns in the shared context under `<name>.turns`.
pub struct CounterAction {
    name: String,
    key: String,
}

impl CounterAction {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let key = format!("{name}.turns");
        Self { name, key }
    }
}

#[async_trait]
impl Action for CounterAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &[HookKind] {
        &[HookKind::Start, HookKind::Stop, HookKind::ProcessInput]
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::SharedContext)
            .with(Capability::LogEvent)
    }

    async fn start(&self, caps: &CapabilityBag) -> Result<(), HookError> {
        caps.context_set(&self.key, serde_json::json!(0))
            .map_err(|e| HookError::new(&self.name, "start", e.to_string()))
    }

    async fn stop(&self, caps: &CapabilityBag) -> Result<(), HookError> {
        let turns = caps
            .context_get(&self.key)
            .map_err(|e| HookError::new(&self.name, "stop", e.to_string()))?
            .unwrap_or(serde_json::Value::Null);
        caps.log_event("stopped", serde_json::json!({ "turns": turns }))
            .map_err(|e| HookError::new(&self.name, "stop", e.to_string()))
    }

    async fn process_input(
        &self,
        _payload: &Payload,
        is_command: bool,
        caps: &CapabilityBag,
    ) -> Result<HookOutcome, HookError> {
        if is_command {
            return Ok(HookOutcome::Unchanged);
        }
        let fail = |e: chorus_core::error::CapabilityError| HookError::new(&self.name, "process_input", e.to_string());

        let count = caps
            .context_get(&self.key)
            .map_err(fail)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        caps.context_set(&self.key, serde_json::json!(count)).map_err(fail)?;
        caps.log_event("turn", serde_json::json!({ "count": count }))
            .map_err(fail)?;
        Ok(HookOutcome::Unchanged)
    }
}
