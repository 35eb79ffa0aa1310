//! Domain event system — decoupled communication between bounded contexts.
//!
//! Lifecycle transitions, isolated failures, and plugin-emitted events are
//! published here. Observers subscribe without the publisher knowing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An action's start hook ran and it is now active
    ActionStarted {
        name: String,
        priority: f64,
        timestamp: DateTime<Utc>,
    },

    /// An action was stopped
    ActionStopped {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Loading or starting an action failed; it is inactive
    ActionFailed {
        name: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline hook failed; the chain continued without it
    PipelineHookFailed {
        action: String,
        hook: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A primary or consultant call failed
    ProviderCallFailed {
        slot: String,
        provider: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn was delivered
    TurnCompleted {
        terminal: bool,
        consultants: usize,
        timestamp: DateTime<Utc>,
    },

    /// Emitted by an action through the log-event capability
    PluginEvent {
        action: String,
        event: String,
        detail: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ActionStarted {
            name: "persona".into(),
            priority: 1.5,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ActionStarted { name, priority, .. } => {
                assert_eq!(name, "persona");
                assert_eq!(*priority, 1.5);
            }
            _ => panic!("Expected ActionStarted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ActionStopped {
            name: "nobody-listening".into(),
            timestamp: Utc::now(),
        });
    }
}
