//! Active-action snapshots.
//!
//! The registry publishes an immutable copy of every entry's status on a
//! [`StatusBoard`] after each lifecycle change. A background worker watches
//! the board and writes the active subset to a [`SnapshotStore`], so the
//! registry lock is never held across file I/O.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chorus_core::action::ActionStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write snapshot to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One persisted line of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub priority: f64,
}

/// Active entries only, in pipeline order.
pub fn active_records(statuses: &[ActionStatus]) -> Vec<SnapshotRecord> {
    let mut records: Vec<SnapshotRecord> = statuses
        .iter()
        .filter(|s| s.is_active())
        .map(|s| SnapshotRecord {
            name: s.name.clone(),
            priority: s.priority,
        })
        .collect();
    records.sort_by(|a, b| a.priority.total_cmp(&b.priority));
    records
}

/// Where snapshots go. Every write replaces the previous content.
pub trait SnapshotStore: Send + Sync {
    fn write(&self, records: &[SnapshotRecord]) -> Result<(), SnapshotError>;
}

/// A JSON array on disk, replaced atomically through a temp file.
#[derive(Debug, Clone)]
pub struct JsonSnapshotFile {
    path: PathBuf,
}

impl JsonSnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last snapshot, if any.
    pub fn read(&self) -> Option<Vec<SnapshotRecord>> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl SnapshotStore for JsonSnapshotFile {
    fn write(&self, records: &[SnapshotRecord]) -> Result<(), SnapshotError> {
        let io_err = |source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

/// Publishes immutable status snapshots to any number of observers.
#[derive(Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<Arc<Vec<ActionStatus>>>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, statuses: Vec<ActionStatus>) {
        self.tx.send_replace(Arc::new(statuses));
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ActionStatus>>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Arc<Vec<ActionStatus>> {
        self.tx.borrow().clone()
    }

    pub fn lookup(&self, name: &str) -> Option<ActionStatus> {
        self.tx.borrow().iter().find(|s| s.name == name).cloned()
    }
}

/// Persist the active subset on every change and again every `interval`.
///
/// Write failures are logged and retried on the next tick. The worker exits
/// once every [`StatusBoard`] handle has been dropped.
pub fn spawn_snapshot_worker(
    mut rx: watch::Receiver<Arc<Vec<ActionStatus>>>,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = rx.changed() => {
                    if changed.is_err() {
                        debug!("Status board closed, snapshot worker exiting");
                        break;
                    }
                }
            }

            let records = active_records(&rx.borrow_and_update());
            if let Err(e) = store.write(&records) {
                warn!(error = %e, "Periodic snapshot failed");
            }
        }
    })
}
