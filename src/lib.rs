//! Reftrack: External Reference Tracking & Reconciliation
//!
//! Passively tracks pull requests, issues and bug reports that show up in
//! browser tabs or captured notification text, and keeps rescraped
//! notification lists reconciled against what was seen before.
//!
//! # Core Concepts
//!
//! - **Entities**: durable records of external work items, keyed by
//!   (family, scope, local id), with a timeline of sightings and state changes
//! - **Extraction**: pure functions from URLs or free text to an [`EntityRef`]
//! - **Refresh**: batched, cooldown-gated status lookups against GitHub and Bugzilla
//! - **Signals**: ephemeral notifications, auto-completed when they vanish
//!   from a scrape and revived when they come back
//!
//! # Example
//!
//! ```
//! use reftrack::{EntityStore, Extractor, OpenStore, SeenSource, SqliteStore};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! let extractor = Extractor::default();
//! let entity = extractor
//!     .from_url("https://github.com/rust-lang/rust/pull/1#discussion_r1")
//!     .unwrap();
//! let (_, is_new) = store.upsert_entity(&entity, SeenSource::Tab).unwrap();
//! assert!(is_new);
//! ```

pub mod clock;
pub mod config;
mod entity;
pub mod extract;
pub mod format;
pub mod ingest;
pub mod refresh;
pub mod signals;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, TrackerConfig};
pub use entity::{
    Entity, EntityEvent, EntityId, EntityRef, EventType, Family, FamilyDescriptor, Grouping,
    NewEvent, RefreshShape, SeenSource, StatusUpdate, FAMILIES,
};
pub use extract::{Extractor, ExtractorConfig};
pub use ingest::{BackfillReport, IngestReport, Ingestor};
pub use refresh::{
    BugRecord, CancellationToken, CredentialSource, HttpClient, MockRemote, RefreshError,
    RefreshReport, RefreshResult, Refresher, RemoteClient, StaticCredentials,
};
pub use signals::{ReconcileReport, Signal, SignalItem, Urgency};
pub use storage::{
    EntityFilter, EntityStore, OpenStore, SignalFilter, SignalStore, SnapshotStore, SnapshotTab,
    SqliteStore, StorageError, StorageResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
