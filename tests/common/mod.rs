//! Common test utilities for reftrack integration tests
//!
//! Stores share a [`ManualClock`] so cooldowns, back-dating and relative
//! ages can be driven deterministically.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use reftrack::{
    BugRecord, EntityRef, EntityStore, Extractor, Ingestor, ManualClock, MockRemote, OpenStore,
    Refresher, SeenSource, SqliteStore, StaticCredentials,
};
use std::sync::Arc;

pub const BUGZILLA_HOST: &str = "bugzilla.mozilla.org";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub clock: Arc<ManualClock>,
    pub ingestor: Ingestor<SqliteStore>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap().with_clock(clock.clone()));
        Self::with_store(store, clock)
    }

    pub fn with_store(store: Arc<SqliteStore>, clock: Arc<ManualClock>) -> Self {
        let ingestor = Ingestor::new(store.clone(), Extractor::default());
        Self {
            store,
            clock,
            ingestor,
        }
    }

    /// Refresher over a mock remote, optionally with a GitHub token
    pub fn refresher(&self, remote: Arc<MockRemote>, token: Option<&str>) -> Refresher {
        let credentials = match token {
            Some(t) => StaticCredentials::new(t),
            None => StaticCredentials::none(),
        };
        Refresher::new(self.store.clone(), remote, Arc::new(credentials)).with_clock(self.clock.clone())
    }

    pub fn track(&self, entity: EntityRef) -> i64 {
        self.store.upsert_entity(&entity, SeenSource::Tab).unwrap().0
    }
}

pub fn bug(id: i64, status: &str, resolution: &str, summary: &str) -> BugRecord {
    BugRecord {
        id,
        summary: summary.to_string(),
        status: status.to_string(),
        resolution: resolution.to_string(),
        assigned_to: String::new(),
    }
}

/// GraphQL response body for a single scope block
pub fn graphql_scope(items: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "data": { "r0": items } })
}
