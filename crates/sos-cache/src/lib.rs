//! SOS capabilities content cache
//!
//! This crate provides:
//! - The in-memory [`ContentCache`] describing offerings, procedures,
//!   features and their relations
//! - [`ContentCacheController`], which serializes complete rebuilds and
//!   partial updates against a copy-on-write snapshot
//! - Partial update actions for transactional requests
//! - Snapshot persistence and scheduled rebuilds

pub mod action;
pub mod completion;
pub mod content;
pub mod controller;
pub mod feeder;
pub mod persist;
pub mod scheduler;
pub mod slot;
pub mod update;

pub use action::{
    ObservationInsertion, ObservationInsertionUpdate, OfferingDescription, RelatedFeature,
    ResultInsertion, ResultInsertionUpdate, ResultTemplateInsertion, ResultTemplateInsertionUpdate, SamplingFeature,
    SensorDeletionUpdate, SensorInsertion, SensorInsertionUpdate,
};
pub use completion::{Completion, Outcome};
pub use content::ContentCache;
pub use controller::{ContentCacheController, ControllerStats};
pub use feeder::{CacheFeeder, DatasourceCacheUpdate, EmptyFeeder, JsonFileFeeder};
pub use persist::{SnapshotFile, SnapshotHeader};
pub use scheduler::{UpdateScheduler, UpdateTarget};
pub use slot::SlotState;
pub use update::{ContentCacheUpdate, FnUpdate};
