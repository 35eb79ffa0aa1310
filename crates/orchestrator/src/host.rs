//! The turn host — wires the registry, dispatcher, and orchestrator into one
//! conversational loop.
//!
//! A turn is: host commands first (`/actions`, `/start`, `/stop`, `/reload`,
//! `/gate`), otherwise pending injections are collected, the input pipeline
//! runs, the orchestrator is consulted unless an action already answered,
//! and the output pipeline shapes the reply.

use std::sync::Arc;
use std::time::Duration;

use chorus_actions::descriptors::{DescriptorStore, discover};
use chorus_actions::{
    ActionRegistry, Dispatcher, JsonSnapshotFile, ModuleCatalog, SnapshotStore, StatusBoard, spawn_snapshot_worker,
};
use chorus_config::HostConfig;
use chorus_core::action::{ActionDescriptor, Payload};
use chorus_core::event::{DomainEvent, EventBus};
use chorus_core::message::{Conversation, Message};
use chorus_providers::ProviderRouter;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{Orchestrator, TurnOutcome};
use crate::injection::InjectionCache;
use crate::request::{OrchestrationRequest, prepend_blocks};
use crate::services::HostServices;

/// What the user sees for one turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub input: String,
    pub text: String,
    /// Answered without calling any model
    pub terminal: bool,
    /// Notifications raised by actions during the turn
    pub notices: Vec<String>,
    /// Model calls made, if any
    pub outcome: Option<TurnOutcome>,
}

pub struct HostBuilder {
    config: HostConfig,
    router: Option<Arc<ProviderRouter>>,
    catalog: Option<ModuleCatalog>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl HostBuilder {
    pub fn router(mut self, router: Arc<ProviderRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> TurnHost {
        let config = self.config;
        let router = self
            .router
            .unwrap_or_else(|| Arc::new(chorus_providers::build_from_config(&config)));
        let catalog = self
            .catalog
            .unwrap_or_else(|| ModuleCatalog::with_builtins(config.host.plugin_dir()));

        let events = Arc::new(EventBus::default());
        let board = StatusBoard::new();
        let (services, notices) = HostServices::new(router.clone(), board.clone(), events.clone());
        let services = Arc::new(services);

        let mut registry = ActionRegistry::new(catalog, services.clone(), events.clone(), board);
        if let Some(store) = &self.store {
            registry = registry.with_snapshot_store(store.clone());
        }
        let registry = Arc::new(registry);

        let injections = Arc::new(InjectionCache::new());
        let orchestrator = Orchestrator::new(router.clone(), injections.clone(), events.clone())
            .with_temperature(config.primary.temperature)
            .with_primary_history(config.primary.history_window);

        TurnHost {
            dispatcher: Dispatcher::new(registry.clone()),
            config,
            router,
            services,
            registry,
            orchestrator,
            injections,
            events,
            conversation: Conversation::new(),
            notices,
            store: self.store,
            snapshot_worker: None,
        }
    }
}

pub struct TurnHost {
    config: HostConfig,
    router: Arc<ProviderRouter>,
    services: Arc<HostServices>,
    registry: Arc<ActionRegistry>,
    dispatcher: Dispatcher,
    orchestrator: Orchestrator,
    injections: Arc<InjectionCache>,
    events: Arc<EventBus>,
    conversation: Conversation,
    notices: mpsc::UnboundedReceiver<String>,
    store: Option<Arc<dyn SnapshotStore>>,
    snapshot_worker: Option<JoinHandle<()>>,
}

impl TurnHost {
    pub fn builder(config: HostConfig) -> HostBuilder {
        HostBuilder {
            config,
            router: None,
            catalog: None,
            store: None,
        }
    }

    /// Real providers, built-in catalog, and the JSON snapshot file, all
    /// from `config`.
    pub fn from_config(config: HostConfig) -> Self {
        let store = Arc::new(JsonSnapshotFile::new(config.host.snapshot_file()));
        Self::builder(config).snapshot_store(store).build()
    }

    /// The persisted descriptor set merged with the plugin directory.
    pub fn discover_descriptors(&self) -> Vec<ActionDescriptor> {
        let store = DescriptorStore::new(self.config.host.actions_file());
        discover(&store, self.registry.catalog())
    }

    /// Register `descriptors` and start the periodic snapshot worker.
    /// Returns how many actions are active.
    pub async fn boot(&mut self, descriptors: Vec<ActionDescriptor>) -> usize {
        let active = self.registry.bootstrap(descriptors).await;

        let interval = self.config.host.snapshot_interval_secs;
        if let Some(store) = self.store.clone().filter(|_| interval > 0 && self.snapshot_worker.is_none()) {
            self.snapshot_worker = Some(spawn_snapshot_worker(
                self.registry.board().subscribe(),
                store,
                Duration::from_secs(interval),
            ));
        }
        active
    }

    /// Run queued commands, then `input`, each as a full turn.
    pub async fn submit(&mut self, input: &str) -> Vec<TurnReply> {
        let mut replies = self.run_queued().await;
        replies.push(self.turn(input).await);
        self.pause().await;
        replies
    }

    /// Run every command actions have queued so far.
    ///
    /// Commands queued while these run wait for the next call.
    pub async fn run_queued(&mut self) -> Vec<TurnReply> {
        let mut replies = Vec::new();
        for command in self.services.take_commands() {
            debug!(command = %command, "Running queued command");
            replies.push(self.turn(&command).await);
            self.pause().await;
        }
        replies
    }

    /// One turn, without touching the command queue.
    pub async fn turn(&mut self, input: &str) -> TurnReply {
        let input = input.trim();

        if let Some(text) = self.host_command(input).await {
            return TurnReply {
                input: input.to_string(),
                text,
                terminal: true,
                notices: self.drain_notices(),
                outcome: None,
            };
        }

        let is_command = input.starts_with('/');
        let pending = self.injections.take_all();
        let payload = self.dispatcher.input_pipeline(input, is_command).await;

        let (payload, outcome) = if payload.is_terminal() {
            debug!("Input answered by an action, skipping model calls");
            (payload, None)
        } else {
            let prompt = prepend_blocks(&pending, payload.text());
            let request = OrchestrationRequest::from_config(&self.config, prompt);
            let outcome = self.orchestrator.run(&request, &self.conversation).await;
            (Payload::Continue(outcome.reply.clone()), Some(outcome))
        };

        let delivered = self.dispatcher.output_pipeline(payload).await;
        let terminal = delivered.is_terminal();
        let text = delivered.into_text();

        self.conversation.push(Message::user(input));
        self.conversation.push(Message::assistant(&text));

        self.events.publish(DomainEvent::TurnCompleted {
            terminal,
            consultants: outcome.as_ref().map_or(0, |o| o.live.len() + o.delayed.len()),
            timestamp: Utc::now(),
        });

        TurnReply {
            input: input.to_string(),
            text,
            terminal,
            notices: self.drain_notices(),
            outcome,
        }
    }

    /// Stop every action in ascending priority and flush the final snapshot.
    pub async fn shutdown(&mut self) {
        info!("Shutting down");
        self.registry.shutdown().await;
        if let Some(worker) = self.snapshot_worker.take() {
            worker.abort();
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &Arc<HostServices> {
        &self.services
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    pub fn injections(&self) -> &Arc<InjectionCache> {
        &self.injections
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    async fn host_command(&self, input: &str) -> Option<String> {
        let (head, arg) = match input.split_once(' ') {
            Some((head, rest)) => (head, Some(rest.trim()).filter(|s| !s.is_empty())),
            None => (input, None),
        };

        let text = match (head, arg) {
            ("/actions", None) => self.describe_actions().await,
            ("/start", Some(name)) => match self.registry.start(name).await {
                Ok(true) => format!("Started '{name}'"),
                Ok(false) => format!("'{name}' is already active"),
                Err(e) => format!("Could not start '{name}': {e}"),
            },
            ("/stop", Some(name)) => match self.registry.stop(name).await {
                Ok(true) => format!("Stopped '{name}'"),
                Ok(false) => format!("'{name}' is not active"),
                Err(e) => format!("Could not stop '{name}': {e}"),
            },
            ("/reload", Some(name)) => match self.registry.load(name).await {
                Ok(()) => format!("Reloaded '{name}'"),
                Err(e) => format!("Could not reload '{name}': {e}"),
            },
            ("/gate", None) => {
                let state = self.router.gate().state();
                format!("Model calls: {}/{}", state.count, state.cap)
            }
            ("/gate", Some("reset")) => {
                self.router.gate().reset();
                "Call counter reset".to_string()
            }
            _ => return None,
        };
        Some(text)
    }

    async fn describe_actions(&self) -> String {
        let statuses = self.registry.statuses().await;
        if statuses.is_empty() {
            return "No actions registered".into();
        }
        statuses
            .iter()
            .map(|s| format!("{:<20} {:>6} {:?}", s.name, s.priority, s.state))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn drain_notices(&mut self) -> Vec<String> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }

    async fn pause(&self) {
        let delay = self.config.host.turn_delay_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}
