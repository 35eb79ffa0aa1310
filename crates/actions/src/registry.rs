//! Action registry — descriptors, loaded modules, and lifecycle state.
//!
//! Lifecycle operations (`register`, `load`, `start`, `stop`, `shutdown`)
//! are serialized by one async mutex so two callers can never start the
//! same action twice. The entry map itself sits behind an `RwLock` that is
//! only held for short, non-awaiting sections: hooks always run with the
//! map unlocked, so pipelines keep flowing while a slow start hook runs.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chorus_core::action::{Action, ActionDescriptor, ActionStatus, HookKind, LifecycleState};
use chorus_core::capability::{CapabilityBag, Host};
use chorus_core::error::{ActionError, HookError};
use chorus_core::event::{DomainEvent, EventBus};
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::catalog::ModuleCatalog;
use crate::snapshot::{SnapshotError, SnapshotStore, StatusBoard, active_records};

struct Entry {
    descriptor: ActionDescriptor,
    module: Option<Arc<dyn Action>>,
    /// Hooks harvested at load time
    hooks: Vec<HookKind>,
    active: bool,
    /// Registration order, the tiebreak for equal priorities
    seq: u64,
}

impl Entry {
    fn state(&self) -> LifecycleState {
        match (&self.module, self.active) {
            (Some(_), true) => LifecycleState::Active,
            (Some(_), false) => LifecycleState::Loaded,
            (None, _) => LifecycleState::Registered,
        }
    }

    fn status(&self) -> ActionStatus {
        ActionStatus {
            name: self.descriptor.name.clone(),
            priority: self.descriptor.priority,
            state: self.state(),
            hooks: self.hooks.clone(),
        }
    }
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_seq: u64,
}

impl Entries {
    fn sorted(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.map.values().collect();
        entries.sort_by(|a, b| {
            a.descriptor
                .priority
                .total_cmp(&b.descriptor.priority)
                .then(a.seq.cmp(&b.seq))
        });
        entries
    }

    fn get(&self, name: &str) -> Result<&Entry, ActionError> {
        self.map
            .get(name)
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Entry, ActionError> {
        self.map
            .get_mut(name)
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }
}

/// One active action as seen by the dispatcher.
#[derive(Clone)]
pub struct PipelineStage {
    pub name: String,
    pub action: Arc<dyn Action>,
}

/// Run a hook future, turning a panic into a [`HookError`].
pub(crate) async fn run_guarded<T, F>(action: &str, hook: HookKind, fut: F) -> Result<T, HookError>
where
    F: Future<Output = Result<T, HookError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "hook panicked".to_string());
            Err(HookError::new(action, hook.as_str(), format!("panicked: {reason}")))
        }
    }
}

pub struct ActionRegistry {
    entries: RwLock<Entries>,
    lifecycle: Mutex<()>,
    catalog: ModuleCatalog,
    host: Arc<dyn Host>,
    events: Arc<EventBus>,
    board: StatusBoard,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl ActionRegistry {
    pub fn new(catalog: ModuleCatalog, host: Arc<dyn Host>, events: Arc<EventBus>, board: StatusBoard) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            lifecycle: Mutex::new(()),
            catalog,
            host,
            events,
            board,
            store: None,
        }
    }

    /// Persist active actions to `store` after every start and stop.
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Insert or overwrite an entry, starting it if it is active by default.
    ///
    /// Overwriting an active entry stops it first; the replacement keeps the
    /// original registration order.
    pub async fn register(&self, descriptor: ActionDescriptor) -> Result<(), ActionError> {
        let _guard = self.lifecycle.lock().await;
        let name = descriptor.name.clone();

        if self.entries.read().await.map.get(&name).is_some_and(|e| e.active) {
            self.stop_locked(&name).await?;
        }

        let start = descriptor.active_by_default;
        {
            let mut entries = self.entries.write().await;
            let seq = match entries.map.get(&name) {
                Some(existing) => existing.seq,
                None => {
                    entries.next_seq += 1;
                    entries.next_seq
                }
            };
            entries.map.insert(
                name.clone(),
                Entry {
                    descriptor,
                    module: None,
                    hooks: Vec::new(),
                    active: false,
                    seq,
                },
            );
        }
        debug!(action = %name, "Action registered");
        self.publish().await;

        if start {
            self.start_locked(&name).await?;
        }
        Ok(())
    }

    /// Register every descriptor, logging (not propagating) failures.
    /// Returns how many actions ended up active.
    pub async fn bootstrap(&self, descriptors: Vec<ActionDescriptor>) -> usize {
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if let Err(e) = self.register(descriptor).await {
                warn!(action = %name, error = %e, "Action failed during bootstrap");
            }
        }
        let active = self.statuses().await.iter().filter(|s| s.is_active()).count();
        info!(active, "Action registry ready");
        active
    }

    /// Fresh import of the action's module.
    ///
    /// An active action is stopped, re-imported and started again, so edits
    /// to its manifest take effect without restarting the host.
    pub async fn load(&self, name: &str) -> Result<(), ActionError> {
        let _guard = self.lifecycle.lock().await;
        let was_active = self.entries.read().await.get(name)?.active;

        if was_active {
            self.stop_locked(name).await?;
        }
        self.import_locked(name).await?;
        if was_active {
            self.start_locked(name).await?;
        }
        Ok(())
    }

    /// Start an action. Returns `false` if it was already active.
    pub async fn start(&self, name: &str) -> Result<bool, ActionError> {
        let _guard = self.lifecycle.lock().await;
        self.start_locked(name).await
    }

    /// Stop an action. Returns `false` if it was not active.
    pub async fn stop(&self, name: &str) -> Result<bool, ActionError> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked(name).await
    }

    /// Stop every active action in ascending priority and write a final
    /// snapshot.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let active: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .sorted()
                .into_iter()
                .filter(|e| e.active)
                .map(|e| e.descriptor.name.clone())
                .collect()
        };

        for name in &active {
            if let Err(e) = self.stop_locked(name).await {
                warn!(action = %name, error = %e, "Failed to stop action during shutdown");
            }
        }
        self.persist().await;
        info!(stopped = active.len(), "Action registry shut down");
    }

    /// Publish current statuses and persist the active subset.
    pub async fn snapshot(&self) -> Result<(), SnapshotError> {
        let statuses = self.publish().await;
        match &self.store {
            Some(store) => store.write(&active_records(&statuses)),
            None => Ok(()),
        }
    }

    /// Every entry, in pipeline order.
    pub async fn statuses(&self) -> Vec<ActionStatus> {
        self.entries
            .read()
            .await
            .sorted()
            .into_iter()
            .map(Entry::status)
            .collect()
    }

    pub async fn status(&self, name: &str) -> Option<ActionStatus> {
        self.entries.read().await.map.get(name).map(Entry::status)
    }

    /// Active actions exporting `hook`, ascending by priority with ties in
    /// registration order.
    pub async fn active_pipeline(&self, hook: HookKind) -> Vec<PipelineStage> {
        self.entries
            .read()
            .await
            .sorted()
            .into_iter()
            .filter(|e| e.active && e.hooks.contains(&hook))
            .filter_map(|e| {
                e.module.as_ref().map(|action| PipelineStage {
                    name: e.descriptor.name.clone(),
                    action: action.clone(),
                })
            })
            .collect()
    }

    /// A capability bag scoped to `action`'s declared needs.
    pub fn capabilities_for(&self, name: &str, action: &dyn Action) -> CapabilityBag {
        CapabilityBag::new(self.host.clone(), name, action.capabilities())
    }

    async fn import_locked(&self, name: &str) -> Result<Arc<dyn Action>, ActionError> {
        let descriptor = self.entries.read().await.get(name)?.descriptor.clone();

        match self.catalog.resolve(&descriptor) {
            Ok(action) => {
                let hooks = action.hooks().to_vec();
                debug!(action = %name, hooks = ?hooks, "Module loaded");
                {
                    let mut entries = self.entries.write().await;
                    let entry = entries.get_mut(name)?;
                    entry.module = Some(action.clone());
                    entry.hooks = hooks;
                    entry.active = false;
                }
                self.publish().await;
                Ok(action)
            }
            Err(e) => {
                warn!(action = %name, error = %e, "Failed to load action");
                {
                    let mut entries = self.entries.write().await;
                    let entry = entries.get_mut(name)?;
                    entry.module = None;
                    entry.hooks.clear();
                    entry.active = false;
                }
                self.events.publish(DomainEvent::ActionFailed {
                    name: name.to_string(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                self.publish().await;
                Err(e.into())
            }
        }
    }

    async fn start_locked(&self, name: &str) -> Result<bool, ActionError> {
        let (loaded, priority) = {
            let entries = self.entries.read().await;
            let entry = entries.get(name)?;
            if entry.active {
                return Ok(false);
            }
            (entry.module.clone(), entry.descriptor.priority)
        };

        let action = match loaded {
            Some(action) => action,
            None => self.import_locked(name).await?,
        };

        self.entries.write().await.get_mut(name)?.active = true;

        if action.hooks().contains(&HookKind::Start) {
            let caps = self.capabilities_for(name, action.as_ref());
            if let Err(e) = run_guarded(name, HookKind::Start, action.start(&caps)).await {
                warn!(action = %name, error = %e, "Start hook failed, rolling back");
                self.entries.write().await.get_mut(name)?.active = false;
                self.events.publish(DomainEvent::ActionFailed {
                    name: name.to_string(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                self.persist().await;
                return Err(e.into());
            }
        }

        info!(action = %name, priority, "Action started");
        self.events.publish(DomainEvent::ActionStarted {
            name: name.to_string(),
            priority,
            timestamp: Utc::now(),
        });
        self.persist().await;
        Ok(true)
    }

    async fn stop_locked(&self, name: &str) -> Result<bool, ActionError> {
        let action = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(name)?;
            if !entry.active {
                return Ok(false);
            }
            entry.active = false;
            entry.module.clone()
        };

        if let Some(action) = action.filter(|a| a.hooks().contains(&HookKind::Stop)) {
            let caps = self.capabilities_for(name, action.as_ref());
            if let Err(e) = run_guarded(name, HookKind::Stop, action.stop(&caps)).await {
                warn!(action = %name, error = %e, "Stop hook failed, action stopped anyway");
            }
        }

        info!(action = %name, "Action stopped");
        self.events.publish(DomainEvent::ActionStopped {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        self.persist().await;
        Ok(true)
    }

    async fn persist(&self) {
        if let Err(e) = self.snapshot().await {
            warn!(error = %e, "Snapshot write failed");
        }
    }

    async fn publish(&self) -> Vec<ActionStatus> {
        let statuses = self.statuses().await;
        self.board.publish(statuses.clone());
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModuleSpec;
    use crate::snapshot::{JsonSnapshotFile, SnapshotRecord};
    use crate::testing::MemoryHost;
    use async_trait::async_trait;
    use chorus_core::error::LoadError;
    use std::sync::Mutex as StdMutex;

    /// Records every hook call into a shared log; optionally fails `start`.
    struct Probe {
        name: String,
        fail_start: bool,
        fail_stop: bool,
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Action for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn hooks(&self) -> &[HookKind] {
            &[HookKind::Start, HookKind::Stop]
        }

        async fn start(&self, _caps: &CapabilityBag) -> Result<(), HookError> {
            self.log.lock().unwrap().push(format!("start:{}", self.name));
            if self.fail_start {
                return Err(HookError::new(&self.name, "start", "refused"));
            }
            Ok(())
        }

        async fn stop(&self, _caps: &CapabilityBag) -> Result<(), HookError> {
            self.log.lock().unwrap().push(format!("stop:{}", self.name));
            if self.fail_stop {
                return Err(HookError::new(&self.name, "stop", "refused"));
            }
            Ok(())
        }
    }

    struct Fixture {
        registry: ActionRegistry,
        log: Arc<StdMutex<Vec<String>>>,
        imports: Arc<StdMutex<usize>>,
    }

    fn fixture() -> Fixture {
        fixture_in(std::path::Path::new("/nonexistent"))
    }

    fn fixture_in(plugin_dir: &std::path::Path) -> Fixture {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let imports = Arc::new(StdMutex::new(0));
        let mut catalog = ModuleCatalog::new(plugin_dir);

        let (probe_log, probe_imports) = (log.clone(), imports.clone());
        catalog.register_kind("probe", move |spec: &ModuleSpec| {
            *probe_imports.lock().unwrap() += 1;
            Ok(Arc::new(Probe {
                name: spec.action.clone(),
                fail_start: spec.settings.get("fail_start").is_some(),
                fail_stop: spec.settings.get("fail_stop").is_some(),
                log: probe_log.clone(),
            }) as Arc<dyn Action>)
        });

        let registry = ActionRegistry::new(
            catalog,
            Arc::new(MemoryHost::default()),
            Arc::new(EventBus::default()),
            StatusBoard::new(),
        );
        Fixture { registry, log, imports }
    }

    fn probe(name: &str, priority: f64) -> ActionDescriptor {
        ActionDescriptor::new(name, priority, "builtin:probe")
    }

    fn with_flag(mut descriptor: ActionDescriptor, flag: &str) -> ActionDescriptor {
        descriptor.metadata.insert(flag.into(), true.into());
        descriptor
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let f = fixture();
        f.registry.register(probe("a", 1.0)).await.unwrap();

        assert!(f.registry.start("a").await.unwrap());
        assert!(!f.registry.start("a").await.unwrap());
        assert!(f.registry.stop("a").await.unwrap());
        assert!(!f.registry.stop("a").await.unwrap());

        assert_eq!(f.log.lock().unwrap().as_slice(), ["start:a", "stop:a"]);
        assert_eq!(*f.imports.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_start_rolls_back_to_loaded() {
        let f = fixture();
        f.registry
            .register(with_flag(probe("grumpy", 1.0), "fail_start"))
            .await
            .unwrap();

        let err = f.registry.start("grumpy").await.unwrap_err();
        assert!(matches!(err, ActionError::Hook(_)));
        assert_eq!(
            f.registry.status("grumpy").await.unwrap().state,
            LifecycleState::Loaded
        );
        assert!(f.registry.active_pipeline(HookKind::Stop).await.is_empty());
    }

    #[tokio::test]
    async fn stop_marks_inactive_even_when_hook_fails() {
        let f = fixture();
        f.registry
            .register(with_flag(probe("sticky", 1.0), "fail_stop").active_by_default(true))
            .await
            .unwrap();
        assert!(f.registry.status("sticky").await.unwrap().is_active());

        assert!(f.registry.stop("sticky").await.unwrap());
        assert!(!f.registry.status("sticky").await.unwrap().is_active());
    }

    #[tokio::test]
    async fn unknown_module_leaves_entry_registered() {
        let f = fixture();
        f.registry
            .register(ActionDescriptor::new("ghost", 1.0, "builtin:ghost"))
            .await
            .unwrap();

        let err = f.registry.start("ghost").await.unwrap_err();
        assert!(matches!(err, ActionError::Load(LoadError::ModuleNotFound { .. })));
        assert_eq!(
            f.registry.status("ghost").await.unwrap().state,
            LifecycleState::Registered
        );
        assert!(matches!(
            f.registry.start("nobody").await.unwrap_err(),
            ActionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn reload_of_active_action_reimports_and_restarts() {
        let f = fixture();
        f.registry
            .register(probe("hot", 1.0).active_by_default(true))
            .await
            .unwrap();
        f.registry.load("hot").await.unwrap();

        assert_eq!(*f.imports.lock().unwrap(), 2);
        assert_eq!(
            f.log.lock().unwrap().as_slice(),
            ["start:hot", "stop:hot", "start:hot"]
        );
        assert!(f.registry.status("hot").await.unwrap().is_active());
    }

    #[tokio::test]
    async fn reload_with_missing_manifest_leaves_action_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("hot.toml");
        std::fs::write(&manifest, "kind = \"probe\"\n").unwrap();

        let file = Arc::new(JsonSnapshotFile::new(dir.path().join("active_actions.json")));
        let f = fixture_in(dir.path());
        let registry = f.registry.with_snapshot_store(file.clone());

        registry
            .register(ActionDescriptor::new("hot", 1.0, "hot.toml").active_by_default(true))
            .await
            .unwrap();
        assert_eq!(
            file.read().unwrap(),
            vec![SnapshotRecord { name: "hot".into(), priority: 1.0 }]
        );

        std::fs::remove_file(&manifest).unwrap();
        let err = registry.load("hot").await.unwrap_err();
        assert!(matches!(err, ActionError::Load(LoadError::ModuleNotFound { .. })));

        let status = registry.status("hot").await.unwrap();
        assert_eq!(status.state, LifecycleState::Registered);
        assert!(registry.active_pipeline(HookKind::Stop).await.is_empty());
        assert!(file.read().unwrap().is_empty());
        assert_eq!(f.log.lock().unwrap().as_slice(), ["start:hot", "stop:hot"]);
    }

    #[tokio::test]
    async fn overwriting_an_active_entry_stops_it_first() {
        let f = fixture();
        f.registry
            .register(probe("a", 1.0).active_by_default(true))
            .await
            .unwrap();
        f.registry.register(probe("a", 2.0)).await.unwrap();

        let status = f.registry.status("a").await.unwrap();
        assert_eq!(status.state, LifecycleState::Registered);
        assert_eq!(status.priority, 2.0);
        assert_eq!(f.log.lock().unwrap().as_slice(), ["start:a", "stop:a"]);
    }

    #[tokio::test]
    async fn pipeline_orders_by_priority_then_registration() {
        let f = fixture();
        for (name, priority) in [("b", 5.0), ("tie2", 3.0), ("a", 1.0), ("tie1", 3.0)] {
            f.registry
                .register(probe(name, priority).active_by_default(true))
                .await
                .unwrap();
        }
        let names: Vec<String> = f
            .registry
            .active_pipeline(HookKind::Start)
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "tie2", "tie1", "b"]);
    }

    #[tokio::test]
    async fn shutdown_stops_in_ascending_priority() {
        let f = fixture();
        for (name, priority) in [("late", 9.0), ("early", 0.5), ("mid", 2.5)] {
            f.registry
                .register(probe(name, priority).active_by_default(true))
                .await
                .unwrap();
        }
        f.log.lock().unwrap().clear();

        f.registry.shutdown().await;
        assert_eq!(
            f.log.lock().unwrap().as_slice(),
            ["stop:early", "stop:mid", "stop:late"]
        );
    }

    #[tokio::test]
    async fn snapshot_tracks_active_set_with_full_replace() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(JsonSnapshotFile::new(dir.path().join("active_actions.json")));
        let f = fixture();
        let registry = f.registry.with_snapshot_store(file.clone());

        registry.register(probe("a", 1.0)).await.unwrap();
        registry.register(probe("b", 2.0)).await.unwrap();
        registry.start("b").await.unwrap();
        registry.start("a").await.unwrap();
        assert_eq!(
            file.read().unwrap(),
            vec![
                SnapshotRecord { name: "a".into(), priority: 1.0 },
                SnapshotRecord { name: "b".into(), priority: 2.0 },
            ]
        );

        registry.stop("a").await.unwrap();
        assert_eq!(
            file.read().unwrap(),
            vec![SnapshotRecord { name: "b".into(), priority: 2.0 }]
        );
    }

    #[tokio::test]
    async fn lifecycle_changes_reach_the_board_and_event_bus() {
        let f = fixture();
        let mut events = f.registry.events.subscribe();
        let mut board = f.registry.board().subscribe();

        f.registry
            .register(probe("a", 1.0).active_by_default(true))
            .await
            .unwrap();

        assert!(board.has_changed().unwrap());
        assert!(board.borrow_and_update()[0].is_active());
        assert!(matches!(
            events.recv().await.unwrap().as_ref(),
            DomainEvent::ActionStarted { name, .. } if name == "a"
        ));
    }

    #[tokio::test]
    async fn panicking_hook_is_reported_as_hook_error() {
        let err = run_guarded("boom", HookKind::Start, async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        })
            .await
            .unwrap_err();
        assert_eq!(err.hook, "start");
        assert!(err.reason.contains("kaboom"));
    }
}
