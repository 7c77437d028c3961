//! Capture ingestion: turn snapshots and signals into tracked entities
//!
//! Live captures and history backfill share one path: extract a reference,
//! upsert it, record where it was seen. Backfill additionally back-dates
//! `first_seen_at` to the occurrence and only records events for entities
//! it creates, so re-running it changes nothing.

use crate::entity::{EntityId, EntityRef, EventType, Family, NewEvent, SeenSource};
use crate::extract::{clean_bugzilla_tab_title, Extractor};
use crate::signals::Signal;
use crate::storage::{EntityStore, HistoricalTab, SignalStore, SnapshotStore, StorageResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of ingesting one capture
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Tabs or signals that carried at least one reference
    pub matched: usize,
    /// Entities created by this capture
    pub created: usize,
    /// Rows whose upsert or event write failed
    pub failed: usize,
}

/// Outcome of a history backfill
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    /// Distinct entities referenced anywhere in history
    pub entities: usize,
    /// Entities that did not exist before this pass
    pub created: usize,
    pub failed: usize,
}

/// One historical sighting, merged across snapshots and signals
enum Occurrence {
    Tab(HistoricalTab),
    Signal(Signal),
}

impl Occurrence {
    fn at(&self) -> DateTime<Utc> {
        match self {
            Occurrence::Tab(tab) => tab.snapshot_created_at,
            Occurrence::Signal(signal) => signal.captured_at,
        }
    }
}

/// Feeds captures through extraction into the entity store
pub struct Ingestor<S> {
    store: Arc<S>,
    extractor: Extractor,
}

impl<S> Ingestor<S>
where
    S: EntityStore + SignalStore + SnapshotStore,
{
    pub fn new(store: Arc<S>, extractor: Extractor) -> Self {
        Self { store, extractor }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Extract entities from every tab of a stored snapshot
    pub fn ingest_snapshot(&self, snapshot_id: i64) -> StorageResult<IngestReport> {
        let tabs = self.store.snapshot_tabs(snapshot_id)?;
        let mut report = IngestReport::default();

        for tab in &tabs {
            let Some(entity) = self.extractor.from_url(&tab.url) else {
                continue;
            };
            report.matched += 1;
            let event = |id| NewEvent::new(id, EventType::TabSeen).with_snapshot(snapshot_id);
            match self.sight(&entity, SeenSource::Tab, event) {
                Ok((id, is_new)) => {
                    if is_new {
                        report.created += 1;
                        self.seed_tab_title(id, &entity, &tab.title);
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %tab.url, error = %e, "failed to record tab sighting");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(snapshot_id, matched = report.matched, created = report.created, "snapshot ingested");
        Ok(report)
    }

    /// Extract entities from captured signals
    pub fn ingest_signals(&self, signals: &[Signal]) -> IngestReport {
        let mut report = IngestReport::default();

        for signal in signals {
            let found = self
                .extractor
                .from_signal(&signal.title, &signal.preview, &signal.snippet);
            if found.is_empty() {
                continue;
            }
            report.matched += 1;
            for entity in &found {
                let event = |id| NewEvent::new(id, EventType::SignalSeen).with_signal(signal.id);
                match self.sight(entity, SeenSource::Signal, event) {
                    Ok((_, is_new)) => report.created += usize::from(is_new),
                    Err(e) => {
                        tracing::warn!(signal_id = signal.id, entity = %entity.key(), error = %e, "failed to record signal sighting");
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    /// Replay every stored snapshot and signal, oldest first.
    pub fn backfill(&self) -> StorageResult<BackfillReport> {
        let mut timeline: Vec<Occurrence> = self
            .store
            .snapshot_history()?
            .into_iter()
            .map(Occurrence::Tab)
            .collect();
        timeline.extend(self.store.signal_history()?.into_iter().map(Occurrence::Signal));
        // stable: ties keep snapshot-then-signal and per-source order
        timeline.sort_by_key(Occurrence::at);

        let mut seen: BTreeSet<(Family, String, i64)> = BTreeSet::new();
        let mut report = BackfillReport::default();

        for occurrence in &timeline {
            let at = occurrence.at();
            let (found, source): (Vec<EntityRef>, SeenSource) = match occurrence {
                Occurrence::Tab(tab) => (
                    self.extractor.from_url(&tab.tab.url).into_iter().collect(),
                    SeenSource::Tab,
                ),
                Occurrence::Signal(signal) => (
                    self.extractor
                        .from_signal(&signal.title, &signal.preview, &signal.snippet),
                    SeenSource::Signal,
                ),
            };

            for entity in &found {
                seen.insert((entity.family, entity.scope.clone(), entity.local_id));

                let event = |id| match occurrence {
                    Occurrence::Tab(tab) => NewEvent::new(id, EventType::TabSeen).with_snapshot(tab.snapshot_id),
                    Occurrence::Signal(signal) => NewEvent::new(id, EventType::SignalSeen).with_signal(signal.id),
                };
                match self.sight_new_only(entity, source, at, event) {
                    Ok(Some(id)) => {
                        report.created += 1;
                        if let Occurrence::Tab(tab) = occurrence {
                            self.seed_tab_title(id, entity, &tab.tab.title);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(entity = %entity.key(), error = %e, "backfill row failed");
                        report.failed += 1;
                    }
                }
            }
        }

        report.entities = seen.len();
        tracing::info!(
            entities = report.entities,
            created = report.created,
            failed = report.failed,
            "backfill complete"
        );
        Ok(report)
    }

    /// Upsert and always record the sighting
    fn sight(
        &self,
        entity: &EntityRef,
        source: SeenSource,
        event: impl Fn(EntityId) -> NewEvent,
    ) -> StorageResult<(EntityId, bool)> {
        let (id, is_new) = self.store.upsert_entity(entity, source)?;
        self.store.record_event(&event(id))?;
        Ok((id, is_new))
    }

    /// Upsert back-dated to `at`; record the sighting only for a new entity
    fn sight_new_only(
        &self,
        entity: &EntityRef,
        source: SeenSource,
        at: DateTime<Utc>,
        event: impl Fn(EntityId) -> NewEvent,
    ) -> StorageResult<Option<EntityId>> {
        let (id, is_new) = self.store.upsert_entity_at(entity, source, at)?;
        if !is_new {
            return Ok(None);
        }
        self.store.record_event(&event(id).at(at))?;
        Ok(Some(id))
    }

    /// Bugzilla tab titles carry the bug summary; use it until a refresh
    /// brings the real one.
    fn seed_tab_title(&self, id: EntityId, entity: &EntityRef, tab_title: &str) {
        if entity.family != Family::Bugzilla || tab_title.trim().is_empty() {
            return;
        }
        let cleaned = clean_bugzilla_tab_title(tab_title);
        if cleaned.is_empty() {
            return;
        }
        if let Err(e) = self.store.seed_title(id, &cleaned) {
            tracing::warn!(entity = %entity.key(), error = %e, "failed to seed title");
        }
    }
}
