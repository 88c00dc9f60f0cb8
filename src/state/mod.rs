//! State Module
//!
//! Everything on the control side of the engine:
//! - Immutable snapshots and their atomic publication
//! - The configuration controller (transactional loads, supersession)
//! - Shared resource cache
//! - Preset documents, storage and schema migration

pub mod cache;
pub mod controller;
pub mod migration;
pub mod preset;
pub mod snapshot;

pub use cache::ResourceCache;
pub use controller::{ConfigurationController, RequestState};
pub use migration::{migrate_preset, CURRENT_SCHEMA_VERSION};
pub use preset::{
    Category, FsPresetStore, Preset, PresetStore, PresetSummary, DEFAULT_CATEGORIES,
};
pub use snapshot::{
    EffectParameters, Snapshot, SnapshotPublisher, SnapshotReader, COMPRESSOR_RATIO_RANGE,
};
