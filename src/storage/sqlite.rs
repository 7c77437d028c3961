//! SQLite storage backend

use super::traits::{
    EntityFilter, EntityStore, HistoricalTab, OpenStore, Snapshot, SnapshotStore, SnapshotTab,
    StorageError, StorageResult,
};
use crate::clock::{Clock, SystemClock};
use crate::entity::{
    Entity, EntityEvent, EntityId, EntityRef, EventType, Family, NewEvent, SeenSource,
    StatusUpdate,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const ENTITY_COLUMNS: &str = "id, family, scope, local_id, kind, title, state, author, assignees, \
     review_status, checks_status, resolution, first_seen_at, first_seen_source, \
     last_refreshed_at, external_updated_at";

/// SQLite-backed store for entities, signals and snapshots
///
/// Uses a single database file in WAL mode so readers are never blocked
/// by a writer. Thread-safe via internal mutex on the connection; every
/// mutating operation is one short transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Replace the clock used for `now` stamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Create tables if they are missing. Safe to run on every open.
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Tracked external items, one row per natural key
            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                family TEXT NOT NULL,
                scope TEXT NOT NULL,
                local_id INTEGER NOT NULL,
                kind TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                assignees TEXT NOT NULL DEFAULT '',
                review_status TEXT,
                checks_status TEXT,
                resolution TEXT,
                first_seen_at TEXT NOT NULL,
                first_seen_source TEXT NOT NULL,
                last_refreshed_at TEXT,
                external_updated_at TEXT,
                UNIQUE (family, scope, local_id)
            );

            CREATE INDEX IF NOT EXISTS idx_entities_family_state
                ON entities(family, state);

            -- Append-only timeline
            CREATE TABLE IF NOT EXISTS entity_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                signal_id INTEGER,
                snapshot_id INTEGER,
                detail TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_entity_events_entity
                ON entity_events(entity_id, created_at);

            -- Captured notifications
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                preview TEXT NOT NULL DEFAULT '',
                snippet TEXT NOT NULL DEFAULT '',
                source_ts TEXT NOT NULL DEFAULT '',
                kind TEXT,
                captured_at TEXT NOT NULL,
                completed_at TEXT,
                auto_completed INTEGER NOT NULL DEFAULT 0,
                pinned INTEGER NOT NULL DEFAULT 0,
                urgency TEXT,
                urgency_source TEXT,
                UNIQUE (source, title, preview, source_ts)
            );

            CREATE INDEX IF NOT EXISTS idx_signals_source_active
                ON signals(source, completed_at);

            -- Tab snapshots
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                tab_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS snapshot_tabs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (snapshot_id) REFERENCES snapshots(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_snapshot_tabs_snapshot
                ON snapshot_tabs(snapshot_id);

            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- One writer, concurrent readers
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    pub(super) fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn upsert(
        &self,
        entity: &EntityRef,
        source: SeenSource,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<(EntityId, bool)> {
        let kind = if entity.sub_kind.is_empty() {
            entity.family.descriptor().default_kind
        } else {
            entity.sub_kind.as_str()
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            r#"
            INSERT INTO entities (family, scope, local_id, kind, first_seen_at, first_seen_source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (family, scope, local_id) DO NOTHING
            "#,
            params![
                entity.family.as_str(),
                entity.scope,
                entity.local_id,
                kind,
                format_ts(seen_at),
                source.as_str(),
            ],
        )?;
        let id: EntityId = tx.query_row(
            "SELECT id FROM entities WHERE family = ?1 AND scope = ?2 AND local_id = ?3",
            params![entity.family.as_str(), entity.scope, entity.local_id],
            |row| row.get(0),
        )?;
        // A later sighting can tell a kind the first one could not
        if inserted == 0 && !entity.sub_kind.is_empty() {
            tx.execute(
                "UPDATE entities SET kind = ?1 WHERE id = ?2 AND kind = ''",
                params![entity.sub_kind, id],
            )?;
        }
        tx.commit()?;

        if inserted > 0 {
            tracing::debug!(entity = %entity.key(), family = %entity.family, id, "new entity");
        }
        Ok((id, inserted > 0))
    }

    fn insert_event(conn: &Connection, event: &NewEvent, now: DateTime<Utc>) -> StorageResult<i64> {
        conn.execute(
            r#"
            INSERT INTO entity_events (entity_id, event_type, signal_id, snapshot_id, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.entity_id,
                event.event_type.as_str(),
                event.signal_id,
                event.snapshot_id,
                event.detail,
                format_ts(event.at.unwrap_or(now)),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn write_status(
        conn: &Connection,
        id: EntityId,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE entities SET
                kind = COALESCE(?1, kind),
                title = ?2,
                state = ?3,
                author = ?4,
                assignees = ?5,
                review_status = ?6,
                checks_status = ?7,
                resolution = ?8,
                external_updated_at = ?9,
                last_refreshed_at = ?10
            WHERE id = ?11
            "#,
            params![
                update.kind,
                update.title,
                update.state,
                update.author,
                update.assignees.join(","),
                update.review_status,
                update.checks_status,
                update.resolution,
                update.external_updated_at.map(format_ts),
                format_ts(now),
                id,
            ],
        )?;
        if rows == 0 {
            return Err(StorageError::EntityNotFound(id));
        }
        Ok(())
    }

    fn query_entities(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<Entity>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, EntityRow::from_row)?;
        let mut entities = Vec::new();
        for row in rows {
            entities.push(row?.into_entity()?);
        }
        Ok(entities)
    }
}

/// Raw `entities` columns before parsing
struct EntityRow {
    id: i64,
    family: String,
    scope: String,
    local_id: i64,
    kind: String,
    title: String,
    state: String,
    author: String,
    assignees: String,
    review_status: Option<String>,
    checks_status: Option<String>,
    resolution: Option<String>,
    first_seen_at: String,
    first_seen_source: String,
    last_refreshed_at: Option<String>,
    external_updated_at: Option<String>,
}

impl EntityRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            family: row.get(1)?,
            scope: row.get(2)?,
            local_id: row.get(3)?,
            kind: row.get(4)?,
            title: row.get(5)?,
            state: row.get(6)?,
            author: row.get(7)?,
            assignees: row.get(8)?,
            review_status: row.get(9)?,
            checks_status: row.get(10)?,
            resolution: row.get(11)?,
            first_seen_at: row.get(12)?,
            first_seen_source: row.get(13)?,
            last_refreshed_at: row.get(14)?,
            external_updated_at: row.get(15)?,
        })
    }

    fn into_entity(self) -> StorageResult<Entity> {
        Ok(Entity {
            id: self.id,
            family: self.family.parse().map_err(StorageError::InvalidValue)?,
            scope: self.scope,
            local_id: self.local_id,
            kind: self.kind,
            title: self.title,
            state: self.state,
            author: self.author,
            assignees: split_list(&self.assignees),
            review_status: self.review_status,
            checks_status: self.checks_status,
            resolution: self.resolution,
            first_seen_at: parse_ts(&self.first_seen_at)?,
            first_seen_source: self
                .first_seen_source
                .parse()
                .map_err(StorageError::InvalidValue)?,
            last_refreshed_at: parse_opt_ts(self.last_refreshed_at)?,
            external_updated_at: parse_opt_ts(self.external_updated_at)?,
        })
    }
}

/// Fixed-width UTC timestamps so text order matches time order
pub(super) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_ts(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(format!("{}: {}", raw, e)))
}

pub(super) fn parse_opt_ts(raw: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Open/unknown first, then newest remote update, then newest sighting.
fn sort_actionable(entities: &mut [Entity]) {
    entities.sort_by(|a, b| {
        b.is_open()
            .cmp(&a.is_open())
            .then_with(|| b.external_updated_at.cmp(&a.external_updated_at))
            .then_with(|| b.first_seen_at.cmp(&a.first_seen_at))
            .then_with(|| b.id.cmp(&a.id))
    });
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl EntityStore for SqliteStore {
    // === Upsert ===

    fn upsert_entity(&self, entity: &EntityRef, source: SeenSource) -> StorageResult<(EntityId, bool)> {
        self.upsert(entity, source, self.now())
    }

    fn upsert_entity_at(
        &self,
        entity: &EntityRef,
        source: SeenSource,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<(EntityId, bool)> {
        self.upsert(entity, source, seen_at)
    }

    fn seed_title(&self, id: EntityId, title: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE entities SET title = ?1 WHERE id = ?2 AND title = ''",
            params![title, id],
        )?;
        Ok(rows > 0)
    }

    // === Timeline ===

    fn record_event(&self, event: &NewEvent) -> StorageResult<i64> {
        let conn = self.lock()?;
        Self::insert_event(&conn, event, self.now())
    }

    fn list_events(&self, entity_id: EntityId) -> StorageResult<Vec<EntityEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, entity_id, event_type, signal_id, snapshot_id, detail, created_at
            FROM entity_events
            WHERE entity_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let rows = stmt.query_map([entity_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, entity_id, event_type, signal_id, snapshot_id, detail, created_at) = row?;
            events.push(EntityEvent {
                id,
                entity_id,
                event_type: event_type.parse().map_err(StorageError::InvalidValue)?,
                signal_id,
                snapshot_id,
                detail,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(events)
    }

    // === Status ===

    fn update_status(&self, id: EntityId, update: &StatusUpdate) -> StorageResult<()> {
        let conn = self.lock()?;
        Self::write_status(&conn, id, update, self.now())
    }

    fn apply_refresh(&self, id: EntityId, update: &StatusUpdate) -> StorageResult<Option<String>> {
        let now = self.now();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous: String = tx
            .query_row("SELECT state FROM entities WHERE id = ?1", [id], |row| row.get(0))
            .optional()?
            .ok_or(StorageError::EntityNotFound(id))?;

        let transition = if !previous.is_empty() && previous != update.state {
            let detail = format!("{} -> {}", previous, update.state);
            let event = NewEvent::new(id, EventType::StatusChanged).with_detail(&detail);
            Self::insert_event(&tx, &event, now)?;
            Some(detail)
        } else {
            None
        };

        Self::write_status(&tx, id, update, now)?;
        tx.commit()?;
        Ok(transition)
    }

    // === Queries ===

    fn get_entity(&self, family: Family, scope: &str, local_id: i64) -> StorageResult<Option<Entity>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM entities WHERE family = ?1 AND scope = ?2 AND local_id = ?3",
            ENTITY_COLUMNS
        );
        let mut found = Self::query_entities(&conn, &sql, params![family.as_str(), scope, local_id])?;
        Ok(found.pop())
    }

    fn get_entity_by_id(&self, id: EntityId) -> StorageResult<Option<Entity>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM entities WHERE id = ?1", ENTITY_COLUMNS);
        let mut found = Self::query_entities(&conn, &sql, params![id])?;
        Ok(found.pop())
    }

    fn list_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<Entity>> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {} FROM entities WHERE 1 = 1", ENTITY_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(family) = filter.family {
            sql.push_str(" AND family = ?");
            params_vec.push(Box::new(family.as_str()));
        }

        if let Some(ref state) = filter.state {
            sql.push_str(" AND state = ?");
            params_vec.push(Box::new(state.clone()));
        }

        if let Some(ref kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            params_vec.push(Box::new(kind.clone()));
        }

        if let Some(ref scope) = filter.scope {
            sql.push_str(" AND scope = ?");
            params_vec.push(Box::new(scope.clone()));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let mut entities = Self::query_entities(&conn, &sql, &params_refs)?;

        // "Open" depends on the family vocabulary, so order here rather than in SQL
        sort_actionable(&mut entities);
        if let Some(limit) = filter.limit {
            entities.truncate(limit);
        }
        Ok(entities)
    }

    fn open_entity_count(&self, family: Family) -> StorageResult<usize> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT state FROM entities WHERE family = ?1")?;
        let states = stmt.query_map([family.as_str()], |row| row.get::<_, String>(0))?;

        let descriptor = family.descriptor();
        let mut count = 0;
        for state in states {
            if descriptor.is_open(&state?) {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl SnapshotStore for SqliteStore {
    fn create_snapshot(&self, name: &str, tabs: &[SnapshotTab]) -> StorageResult<i64> {
        let now = self.now();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO snapshots (name, created_at, tab_count) VALUES (?1, ?2, ?3)",
            params![name, format_ts(now), tabs.len() as i64],
        )?;
        let snapshot_id = tx.last_insert_rowid();
        {
            let mut stmt =
                tx.prepare("INSERT INTO snapshot_tabs (snapshot_id, url, title) VALUES (?1, ?2, ?3)")?;
            for tab in tabs {
                stmt.execute(params![snapshot_id, tab.url, tab.title])?;
            }
        }
        tx.commit()?;

        tracing::debug!(snapshot_id, tabs = tabs.len(), "snapshot stored");
        Ok(snapshot_id)
    }

    fn list_snapshots(&self) -> StorageResult<Vec<Snapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, tab_count FROM snapshots ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (id, name, created_at, tab_count) = row?;
            snapshots.push(Snapshot {
                id,
                name,
                created_at: parse_ts(&created_at)?,
                tab_count: tab_count.max(0) as usize,
            });
        }
        Ok(snapshots)
    }

    fn snapshot_tabs(&self, snapshot_id: i64) -> StorageResult<Vec<SnapshotTab>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT url, title FROM snapshot_tabs WHERE snapshot_id = ?1 ORDER BY id ASC")?;
        let tabs = stmt
            .query_map([snapshot_id], |row| {
                Ok(SnapshotTab {
                    url: row.get(0)?,
                    title: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tabs)
    }

    fn snapshot_history(&self) -> StorageResult<Vec<HistoricalTab>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id, s.created_at, t.url, t.title
            FROM snapshot_tabs t
            JOIN snapshots s ON s.id = t.snapshot_id
            ORDER BY s.created_at ASC, s.id ASC, t.id ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (snapshot_id, created_at, url, title) = row?;
            history.push(HistoricalTab {
                snapshot_id,
                snapshot_created_at: parse_ts(&created_at)?,
                tab: SnapshotTab { url, title },
            });
        }
        Ok(history)
    }
}
