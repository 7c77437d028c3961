//! Storage trait definitions

use crate::entity::{
    Entity, EntityEvent, EntityId, EntityRef, Family, NewEvent, SeenSource, StatusUpdate,
};
use crate::signals::{ReconcileReport, Signal, SignalItem, Urgency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Signal not found: {0}")]
    SignalNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for listing entities
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub family: Option<Family>,
    /// Exact state match, e.g. "open" or "RESOLVED"
    pub state: Option<String>,
    /// Sub-kind, e.g. "pull"
    pub kind: Option<String>,
    /// `owner/repo` or host
    pub scope: Option<String>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, family: Family) -> Self {
        self.family = Some(family);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Filter criteria for listing signals
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub source: Option<String>,
    /// Include completed signals after the active ones
    pub include_completed: bool,
}

impl SignalFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn include_completed(mut self) -> Self {
        self.include_completed = true;
        self
    }
}

/// A browser tab as captured in a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTab {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl SnapshotTab {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Snapshot header
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub tab_count: usize,
}

/// A tab together with the snapshot it came from, for history replay
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalTab {
    pub snapshot_id: i64,
    pub snapshot_created_at: DateTime<Utc>,
    pub tab: SnapshotTab,
}

/// Entity persistence
///
/// Implementations must be thread-safe (Send + Sync); every mutating call
/// is a single short transaction.
pub trait EntityStore: Send + Sync {
    // === Upsert ===

    /// Insert the entity if its natural key is new. Returns (id, is_new).
    fn upsert_entity(&self, entity: &EntityRef, source: SeenSource) -> StorageResult<(EntityId, bool)>;

    /// Like [`EntityStore::upsert_entity`] but a newly created row gets
    /// `first_seen_at = seen_at` instead of now.
    fn upsert_entity_at(
        &self,
        entity: &EntityRef,
        source: SeenSource,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<(EntityId, bool)>;

    /// Set the title only if none is stored yet. Returns whether it was set.
    fn seed_title(&self, id: EntityId, title: &str) -> StorageResult<bool>;

    // === Timeline ===

    /// Append a timeline event
    fn record_event(&self, event: &NewEvent) -> StorageResult<i64>;

    /// Events for one entity, oldest first
    fn list_events(&self, entity_id: EntityId) -> StorageResult<Vec<EntityEvent>>;

    // === Status ===

    /// Replace the refreshable fields and stamp `last_refreshed_at`
    fn update_status(&self, id: EntityId, update: &StatusUpdate) -> StorageResult<()>;

    /// Update status and, in the same transaction, append a `status_changed`
    /// event when the stored state was non-empty and differs. Returns the
    /// event detail when a transition was recorded.
    fn apply_refresh(&self, id: EntityId, update: &StatusUpdate) -> StorageResult<Option<String>>;

    // === Queries ===

    fn get_entity(&self, family: Family, scope: &str, local_id: i64) -> StorageResult<Option<Entity>>;

    fn get_entity_by_id(&self, id: EntityId) -> StorageResult<Option<Entity>>;

    /// Actionable first: open/unknown state, then latest remote update,
    /// then latest first sighting.
    fn list_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<Entity>>;

    fn open_entity_count(&self, family: Family) -> StorageResult<usize>;
}

/// Signal persistence
pub trait SignalStore: Send + Sync {
    /// Insert one signal. An exact duplicate is `Ok(None)`, not an error.
    fn insert_signal(
        &self,
        source: &str,
        item: &SignalItem,
        captured_at: DateTime<Utc>,
    ) -> StorageResult<Option<i64>>;

    /// Diff a fresh scrape against stored state in one transaction
    fn reconcile_signals(
        &self,
        source: &str,
        items: &[SignalItem],
        captured_at: DateTime<Utc>,
    ) -> StorageResult<ReconcileReport>;

    fn get_signal(&self, id: i64) -> StorageResult<Option<Signal>>;

    /// Active first (newest capture first), then completed
    fn list_signals(&self, filter: &SignalFilter) -> StorageResult<Vec<Signal>>;

    /// Every signal in capture order, for history replay
    fn signal_history(&self) -> StorageResult<Vec<Signal>>;

    /// Manual completion. Sticky against reconciliation; clears the pin.
    fn complete_signal(&self, id: i64) -> StorageResult<()>;

    /// Clear completion and pin the signal
    fn reopen_signal(&self, id: i64) -> StorageResult<()>;

    fn set_pinned(&self, id: i64, pinned: bool) -> StorageResult<()>;

    fn set_urgency(&self, id: i64, urgency: Urgency, urgency_source: &str) -> StorageResult<()>;

    /// Active signals with no urgency yet
    fn list_unclassified(&self) -> StorageResult<Vec<Signal>>;

    /// Active signal count per source
    fn active_signal_counts(&self) -> StorageResult<BTreeMap<String, usize>>;
}

/// Tab snapshot persistence
pub trait SnapshotStore: Send + Sync {
    fn create_snapshot(&self, name: &str, tabs: &[SnapshotTab]) -> StorageResult<i64>;

    fn list_snapshots(&self) -> StorageResult<Vec<Snapshot>>;

    fn snapshot_tabs(&self, snapshot_id: i64) -> StorageResult<Vec<SnapshotTab>>;

    /// Every tab of every snapshot, oldest snapshot first
    fn snapshot_history(&self) -> StorageResult<Vec<HistoricalTab>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: EntityStore + SignalStore + SnapshotStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
