//! Persistence for entities, signals and tab snapshots

mod signals;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    EntityFilter, EntityStore, HistoricalTab, OpenStore, SignalFilter, SignalStore, Snapshot,
    SnapshotStore, SnapshotTab, StorageError, StorageResult,
};
