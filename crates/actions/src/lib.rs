//! Action lifecycle and pipeline dispatch for Chorus.
//!
//! - [`descriptors`] — the persisted descriptor set and plugin discovery
//! - [`catalog`] — resolves module references to action instances
//! - [`builtin`] — generic action kinds usable from plugin manifests
//! - [`registry`] — lifecycle state: register, load, start, stop
//! - [`snapshot`] — the status board and active-action persistence
//! - [`dispatcher`] — input and output pipelines

pub mod builtin;
pub mod catalog;
pub mod descriptors;
pub mod dispatcher;
pub mod registry;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{ModuleCatalog, ModuleSpec};
pub use descriptors::{DescriptorError, DescriptorStore, discover};
pub use dispatcher::Dispatcher;
pub use registry::{ActionRegistry, PipelineStage};
pub use snapshot::{JsonSnapshotFile, SnapshotError, SnapshotRecord, SnapshotStore, StatusBoard, spawn_snapshot_worker};
