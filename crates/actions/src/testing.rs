//! In-memory [`Host`] used by the crate's tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chorus_core::action::ActionStatus;
use chorus_core::capability::{Host, ProviderStatus};
use chorus_core::error::{CapabilityError, ProviderError};

#[derive(Default)]
pub struct MemoryHost {
    context: Mutex<HashMap<String, serde_json::Value>>,
    events: Mutex<Vec<(String, String, serde_json::Value)>>,
    notes: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
}

impl MemoryHost {
    pub fn context(&self, key: &str) -> Option<serde_json::Value> {
        self.context.lock().unwrap().get(key).cloned()
    }

    pub fn events(&self) -> Vec<(String, String, serde_json::Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Host for MemoryHost {
    async fn send_to_model(&self, prompt: &str) -> Result<String, ProviderError> {
        Ok(format!("echo:{prompt}"))
    }

    fn context_get(&self, key: &str) -> Option<serde_json::Value> {
        self.context(key)
    }

    fn context_set(&self, key: &str, value: serde_json::Value) {
        self.context.lock().unwrap().insert(key.to_string(), value);
    }

    fn notify(&self, message: &str) {
        self.notes.lock().unwrap().push(message.to_string());
    }

    fn lookup_action(&self, _name: &str) -> Option<ActionStatus> {
        None
    }

    fn enqueue_command(&self, command: String) {
        self.commands.lock().unwrap().push(command);
    }

    fn log_event(&self, action: &str, event: &str, detail: serde_json::Value) {
        self.events
            .lock()
            .unwrap()
            .push((action.to_string(), event.to_string(), detail));
    }

    fn provider_status(&self) -> ProviderStatus {
        ProviderStatus {
            provider: "mock".into(),
            model: "mock-model".into(),
            available: vec!["mock".into()],
            calls_made: 0,
            call_cap: 10,
        }
    }

    fn switch_provider(&self, provider: &str, _model: Option<&str>) -> Result<ProviderStatus, CapabilityError> {
        Err(CapabilityError::SwitchRejected(provider.to_string()))
    }
}
