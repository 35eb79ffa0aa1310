//! Pipeline dispatcher — folds a turn's payload through every active action.

use std::sync::Arc;

use chorus_core::action::{HookKind, Payload};
use chorus_core::event::DomainEvent;
use chrono::Utc;
use tracing::{debug, warn};

use crate::registry::{ActionRegistry, run_guarded};

/// Runs the input and output pipelines over the registry's active actions.
///
/// Each hook sees the previous hook's result. A hook that fails or panics is
/// skipped: the chain continues with the payload it was handed.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub async fn input_pipeline(&self, input: impl Into<String>, is_command: bool) -> Payload {
        self.fold(HookKind::ProcessInput, Payload::Continue(input.into()), is_command)
            .await
    }

    pub async fn output_pipeline(&self, payload: Payload) -> Payload {
        self.fold(HookKind::ProcessOutput, payload, false).await
    }

    async fn fold(&self, hook: HookKind, mut payload: Payload, is_command: bool) -> Payload {
        let stages = self.registry.active_pipeline(hook).await;
        debug!(hook = hook.as_str(), stages = stages.len(), "Running pipeline");

        for stage in stages {
            let caps = self.registry.capabilities_for(&stage.name, stage.action.as_ref());
            let outcome = match hook {
                HookKind::ProcessInput => {
                    run_guarded(
                        &stage.name,
                        hook,
                        stage.action.process_input(&payload, is_command, &caps),
                    )
                    .await
                }
                HookKind::ProcessOutput => {
                    run_guarded(&stage.name, hook, stage.action.process_output(&payload, &caps)).await
                }
                HookKind::Start | HookKind::Stop => continue,
            };

            match outcome {
                Ok(outcome) => payload = payload.apply(outcome),
                Err(e) => {
                    warn!(action = %stage.name, hook = hook.as_str(), error = %e, "Pipeline hook failed, skipping");
                    self.registry.events().publish(DomainEvent::PipelineHookFailed {
                        action: stage.name.clone(),
                        hook: hook.as_str().to_string(),
                        error_message: e.reason.clone(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModuleCatalog, ModuleSpec};
    use crate::snapshot::StatusBoard;
    use crate::testing::MemoryHost;
    use async_trait::async_trait;
    use chorus_core::action::{Action, ActionDescriptor, HookOutcome};
    use chorus_core::capability::{Capability, CapabilityBag, CapabilitySet};
    use chorus_core::error::HookError;
    use chorus_core::event::EventBus;

    /// Appends `-<tag>` on both pipelines; `mode` switches in failures.
    struct Tagger {
        tag: String,
        mode: String,
    }

    impl Tagger {
        fn outcome(&self, payload: &Payload, hook: &'static str) -> Result<HookOutcome, HookError> {
            match self.mode.as_str() {
                "fail" => Err(HookError::new(&self.tag, hook, "bad day")),
                "panic" => panic!("tagger {} exploded", self.tag),
                "terminal" => Ok(HookOutcome::Terminal(format!("{}-{}", payload.text(), self.tag))),
                "silent" => Ok(HookOutcome::Unchanged),
                _ => Ok(HookOutcome::Replace(format!("{}-{}", payload.text(), self.tag))),
            }
        }
    }

    #[async_trait]
    impl Action for Tagger {
        fn name(&self) -> &str {
            &self.tag
        }

        fn hooks(&self) -> &[HookKind] {
            &[HookKind::ProcessInput, HookKind::ProcessOutput]
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::empty().with(Capability::Notify)
        }

        async fn process_input(
            &self,
            payload: &Payload,
            is_command: bool,
            caps: &CapabilityBag,
        ) -> Result<HookOutcome, HookError> {
            if is_command {
                caps.notify(&format!("{} saw a command", self.tag))
                    .map_err(|e| HookError::new(&self.tag, "process_input", e.to_string()))?;
            }
            self.outcome(payload, "process_input")
        }

        async fn process_output(&self, payload: &Payload, _caps: &CapabilityBag) -> Result<HookOutcome, HookError> {
            self.outcome(payload, "process_output")
        }
    }

    async fn dispatcher_with(actions: &[(&str, f64, &str)]) -> (Dispatcher, Arc<MemoryHost>) {
        let mut catalog = ModuleCatalog::new("/nonexistent");
        catalog.register_kind("tagger", |spec: &ModuleSpec| {
            Ok(Arc::new(Tagger {
                tag: spec.action.clone(),
                mode: spec.str_setting("mode").unwrap_or("tag").to_string(),
            }) as Arc<dyn Action>)
        });

        let host = Arc::new(MemoryHost::default());
        let registry = Arc::new(ActionRegistry::new(
            catalog,
            host.clone(),
            Arc::new(EventBus::default()),
            StatusBoard::new(),
        ));

        for (name, priority, mode) in actions {
            let mut descriptor = ActionDescriptor::new(*name, *priority, "builtin:tagger").active_by_default(true);
            descriptor.metadata.insert("mode".into(), (*mode).into());
            registry.register(descriptor).await.unwrap();
        }
        (Dispatcher::new(registry), host)
    }

    #[tokio::test]
    async fn folds_in_priority_order_regardless_of_registration_order() {
        let (dispatcher, _) = dispatcher_with(&[("B", 5.0, "tag"), ("A", 1.0, "tag"), ("C", 3.0, "tag")]).await;
        let payload = dispatcher.input_pipeline("X", false).await;
        assert_eq!(payload, Payload::Continue("X-A-C-B".into()));
    }

    #[tokio::test]
    async fn inactive_actions_are_skipped() {
        let (dispatcher, _) = dispatcher_with(&[("A", 1.0, "tag"), ("B", 2.0, "tag")]).await;
        dispatcher.registry().stop("A").await.unwrap();
        let payload = dispatcher.output_pipeline(Payload::Continue("X".into())).await;
        assert_eq!(payload.text(), "X-B");
    }

    #[tokio::test]
    async fn failing_hook_passes_its_input_through() {
        let (dispatcher, _) = dispatcher_with(&[("A", 1.0, "tag"), ("B", 2.0, "fail"), ("C", 3.0, "tag")]).await;
        let mut events = dispatcher.registry().events().subscribe();

        let payload = dispatcher.input_pipeline("X", false).await;
        assert_eq!(payload.text(), "X-A-C");

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::PipelineHookFailed { action, hook, .. } if action == "B" && hook == "process_input"
        ));
    }

    #[tokio::test]
    async fn panicking_hook_does_not_break_the_chain() {
        let (dispatcher, _) = dispatcher_with(&[("A", 1.0, "panic"), ("B", 2.0, "tag")]).await;
        let payload = dispatcher.output_pipeline(Payload::Continue("X".into())).await;
        assert_eq!(payload.text(), "X-B");
    }

    #[tokio::test]
    async fn terminal_state_survives_later_replacements() {
        let (dispatcher, _) =
            dispatcher_with(&[("A", 1.0, "terminal"), ("B", 2.0, "tag"), ("C", 3.0, "silent")]).await;
        let payload = dispatcher.input_pipeline("X", false).await;
        assert_eq!(payload, Payload::Terminal("X-A-B".into()));
    }

    #[tokio::test]
    async fn command_flag_reaches_hooks() {
        let (dispatcher, host) = dispatcher_with(&[("A", 1.0, "silent")]).await;
        dispatcher.input_pipeline("/weather", true).await;
        dispatcher.input_pipeline("hello", false).await;
        assert_eq!(host.notes(), vec!["A saw a command".to_string()]);
    }

    #[tokio::test]
    async fn empty_registry_is_identity() {
        let (dispatcher, _) = dispatcher_with(&[]).await;
        assert_eq!(
            dispatcher.input_pipeline("X", false).await,
            Payload::Continue("X".into())
        );
    }
}
