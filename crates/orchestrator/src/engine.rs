//! Orchestration engine — one turn's worth of model calls.
//!
//! Order of events:
//!
//! 1. Live consultants run one after another. Each sees the labeled output
//!    of the successful ones before it, followed by the raw prompt.
//! 2. The accumulated blocks are prepended to the primary prompt.
//! 3. The primary call and every delayed consultant run concurrently.
//! 4. Successful delayed consultants marked for injection leave their block
//!    in the [`InjectionCache`] for the next turn.
//!
//! Every call goes through the router's gated providers, so the shared call
//! cap applies to consultants exactly as it does to the primary.

use std::sync::Arc;

use chorus_config::ConsultMode;
use chorus_core::error::ProviderError;
use chorus_core::event::{DomainEvent, EventBus};
use chorus_core::message::Conversation;
use chorus_core::provider::ProviderRequest;
use chorus_providers::ProviderRouter;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::injection::InjectionCache;
use crate::request::{ConsultantSpec, OrchestrationRequest, labeled_block, prepend_blocks};

/// The result of one consultant call.
#[derive(Debug, Clone)]
pub struct ConsultantOutcome {
    pub name: String,
    pub provider: String,
    pub mode: ConsultMode,
    pub result: Result<String, ProviderError>,
}

impl ConsultantOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The output, or an error placeholder standing in for it.
    pub fn text(&self) -> String {
        match &self.result {
            Ok(text) => text.clone(),
            Err(e) => placeholder(&self.name, &self.provider, e),
        }
    }
}

/// Everything a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The primary's answer, or its error placeholder
    pub reply: String,
    pub primary_ok: bool,
    /// The prompt the primary actually received
    pub primary_prompt: String,
    pub live: Vec<ConsultantOutcome>,
    pub delayed: Vec<ConsultantOutcome>,
}

fn placeholder(slot: &str, provider: &str, error: &ProviderError) -> String {
    format!("[{slot}/{provider} unavailable: {error}]")
}

pub struct Orchestrator {
    router: Arc<ProviderRouter>,
    injections: Arc<InjectionCache>,
    events: Arc<EventBus>,
    temperature: f32,
    primary_history: usize,
}

impl Orchestrator {
    pub fn new(router: Arc<ProviderRouter>, injections: Arc<InjectionCache>, events: Arc<EventBus>) -> Self {
        Self {
            router,
            injections,
            events,
            temperature: 0.7,
            primary_history: 20,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// How many prior messages the primary sees.
    pub fn with_primary_history(mut self, window: usize) -> Self {
        self.primary_history = window;
        self
    }

    pub async fn run(&self, request: &OrchestrationRequest, history: &Conversation) -> TurnOutcome {
        let (live_specs, delayed_specs) = request.partition();

        let mut accumulated = Vec::new();
        let mut live = Vec::with_capacity(live_specs.len());
        for spec in live_specs {
            let prompt = prepend_blocks(&accumulated, &request.primary_prompt);
            let outcome = self.consult(spec, prompt, history).await;
            if let Ok(text) = &outcome.result {
                accumulated.push(labeled_block(&spec.name, &spec.provider, text));
            }
            live.push(outcome);
        }

        let primary_prompt = prepend_blocks(&accumulated, &request.primary_prompt);
        let primary = self.call_primary(&primary_prompt, history);
        let fan_out = join_all(
            delayed_specs
                .into_iter()
                .map(|spec| self.consult(spec, request.primary_prompt.clone(), history)),
        );
        let ((reply, primary_ok), delayed) = tokio::join!(primary, fan_out);

        for outcome in &delayed {
            let injects = request
                .consultants
                .iter()
                .any(|c| c.name == outcome.name && c.inject_next_turn);
            if let (true, Ok(text)) = (injects, &outcome.result) {
                self.injections
                    .store(&outcome.name, labeled_block(&outcome.name, &outcome.provider, text));
            }
        }

        debug!(
            live_ok = live.iter().filter(|o| o.is_ok()).count(),
            delayed_ok = delayed.iter().filter(|o| o.is_ok()).count(),
            primary_ok,
            "Turn orchestrated"
        );

        TurnOutcome {
            reply,
            primary_ok,
            primary_prompt,
            live,
            delayed,
        }
    }

    async fn call_primary(&self, prompt: &str, history: &Conversation) -> (String, bool) {
        let target = self.router.primary_target();
        let provider_name = target.provider;
        let result = match self.router.get(&provider_name) {
            Ok(provider) => {
                let window = history.window(self.primary_history);
                let request =
                    ProviderRequest::from_prompt(target.model, prompt, window).with_temperature(self.temperature);
                provider.complete(request).await.map(|r| r.message.content)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => (text, true),
            Err(e) => {
                self.report_failure("primary", &provider_name, &e);
                (placeholder("primary", &provider_name, &e), false)
            }
        }
    }

    async fn consult(&self, spec: &ConsultantSpec, prompt: String, history: &Conversation) -> ConsultantOutcome {
        let result = match self.router.get(&spec.provider) {
            Ok(provider) => {
                let window = history.window(spec.history_window);
                let request =
                    ProviderRequest::from_prompt(&spec.model, prompt, window).with_temperature(self.temperature);
                provider.complete(request).await.map(|r| r.message.content)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            self.report_failure(&spec.name, &spec.provider, e);
        }

        ConsultantOutcome {
            name: spec.name.clone(),
            provider: spec.provider.clone(),
            mode: spec.mode,
            result,
        }
    }

    fn report_failure(&self, slot: &str, provider: &str, error: &ProviderError) {
        warn!(slot, provider, error = %error, "Model call failed");
        self.events.publish(DomainEvent::ProviderCallFailed {
            slot: slot.to_string(),
            provider: provider.to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}
