//! The host services behind every action's capability bag.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chorus_actions::StatusBoard;
use chorus_core::action::ActionStatus;
use chorus_core::capability::{Host, ProviderStatus};
use chorus_core::error::{CapabilityError, ProviderError};
use chorus_core::event::{DomainEvent, EventBus};
use chorus_providers::ProviderRouter;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::info;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct HostServices {
    router: Arc<ProviderRouter>,
    board: StatusBoard,
    events: Arc<EventBus>,
    context: Mutex<HashMap<String, serde_json::Value>>,
    commands: Mutex<VecDeque<String>>,
    notices: mpsc::UnboundedSender<String>,
}

impl HostServices {
    /// Services plus the receiving end of the notification channel.
    pub fn new(
        router: Arc<ProviderRouter>,
        board: StatusBoard,
        events: Arc<EventBus>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let services = Self {
            router,
            board,
            events,
            context: Mutex::new(HashMap::new()),
            commands: Mutex::new(VecDeque::new()),
            notices,
        };
        (services, rx)
    }

    /// Drain queued commands in the order they were enqueued.
    pub fn take_commands(&self) -> Vec<String> {
        lock(&self.commands).drain(..).collect()
    }

    pub fn pending_commands(&self) -> usize {
        lock(&self.commands).len()
    }
}

#[async_trait]
impl Host for HostServices {
    async fn send_to_model(&self, prompt: &str) -> Result<String, ProviderError> {
        let (provider, model) = self.router.primary()?;
        provider.send(prompt, &model, &[]).await
    }

    fn context_get(&self, key: &str) -> Option<serde_json::Value> {
        lock(&self.context).get(key).cloned()
    }

    fn context_set(&self, key: &str, value: serde_json::Value) {
        lock(&self.context).insert(key.to_string(), value);
    }

    fn notify(&self, message: &str) {
        // The receiver only goes away at shutdown.
        let _ = self.notices.send(message.to_string());
    }

    fn lookup_action(&self, name: &str) -> Option<ActionStatus> {
        self.board.lookup(name)
    }

    fn enqueue_command(&self, command: String) {
        lock(&self.commands).push_back(command);
    }

    fn log_event(&self, action: &str, event: &str, detail: serde_json::Value) {
        info!(action, event, detail = %detail, "Action event");
        self.events.publish(DomainEvent::PluginEvent {
            action: action.to_string(),
            event: event.to_string(),
            detail,
            timestamp: Utc::now(),
        });
    }

    fn provider_status(&self) -> ProviderStatus {
        self.router.status()
    }

    fn switch_provider(&self, provider: &str, model: Option<&str>) -> Result<ProviderStatus, CapabilityError> {
        self.router
            .switch_primary(provider, model)
            .map_err(|e| CapabilityError::SwitchRejected(e.to_string()))?;
        Ok(self.router.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::action::LifecycleState;
    use chorus_providers::RateGate;

    fn services() -> (HostServices, mpsc::UnboundedReceiver<String>, StatusBoard) {
        let router = Arc::new(ProviderRouter::new("none", "m", Arc::new(RateGate::new(3))));
        let board = StatusBoard::new();
        let (services, rx) = HostServices::new(router, board.clone(), Arc::new(EventBus::default()));
        (services, rx, board)
    }

    #[test]
    fn commands_drain_in_fifo_order() {
        let (services, _rx, _) = services();
        services.enqueue_command("/one".into());
        services.enqueue_command("/two".into());
        assert_eq!(services.take_commands(), vec!["/one", "/two"]);
        assert_eq!(services.pending_commands(), 0);
    }

    #[test]
    fn notifications_reach_the_channel() {
        let (services, mut rx, _) = services();
        services.notify("heads up");
        assert_eq!(rx.try_recv().unwrap(), "heads up");
    }

    #[test]
    fn lookup_reads_the_status_board() {
        let (services, _rx, board) = services();
        board.publish(vec![ActionStatus {
            name: "status".into(),
            priority: 0.5,
            state: LifecycleState::Active,
            hooks: Vec::new(),
        }]);
        assert!(services.lookup_action("status").unwrap().is_active());
        assert!(services.lookup_action("other").is_none());
    }

    #[test]
    fn switching_to_unknown_provider_is_rejected() {
        let (services, _rx, _) = services();
        let err = services.switch_provider("ghost", None).unwrap_err();
        assert!(matches!(err, CapabilityError::SwitchRejected(_)));
        assert_eq!(services.provider_status().call_cap, 3);
    }

    #[tokio::test]
    async fn send_to_model_without_primary_fails_cleanly() {
        let (services, _rx, _) = services();
        assert!(matches!(
            services.send_to_model("hi").await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
