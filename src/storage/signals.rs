//! Signal persistence and reconciliation for the SQLite backend

use super::sqlite::{format_ts, parse_opt_ts, parse_ts, SqliteStore};
use super::traits::{SignalFilter, SignalStore, StorageError, StorageResult};
use crate::signals::{
    dedup_items, heuristic_urgency, ReconcileReport, Signal, SignalItem, SignalKey, Urgency,
    HEURISTIC_URGENCY_SOURCE,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{BTreeMap, HashSet};

const SIGNAL_COLUMNS: &str = "id, source, title, preview, snippet, source_ts, kind, captured_at, \
     completed_at, auto_completed, pinned, urgency, urgency_source";

struct SignalRow {
    id: i64,
    source: String,
    title: String,
    preview: String,
    snippet: String,
    source_ts: String,
    kind: Option<String>,
    captured_at: String,
    completed_at: Option<String>,
    auto_completed: bool,
    pinned: bool,
    urgency: Option<String>,
    urgency_source: Option<String>,
}

impl SignalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source: row.get(1)?,
            title: row.get(2)?,
            preview: row.get(3)?,
            snippet: row.get(4)?,
            source_ts: row.get(5)?,
            kind: row.get(6)?,
            captured_at: row.get(7)?,
            completed_at: row.get(8)?,
            auto_completed: row.get(9)?,
            pinned: row.get(10)?,
            urgency: row.get(11)?,
            urgency_source: row.get(12)?,
        })
    }

    fn into_signal(self) -> StorageResult<Signal> {
        Ok(Signal {
            id: self.id,
            source: self.source,
            title: self.title,
            preview: self.preview,
            snippet: self.snippet,
            source_ts: self.source_ts,
            kind: self.kind,
            captured_at: parse_ts(&self.captured_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            auto_completed: self.auto_completed,
            pinned: self.pinned,
            urgency: self
                .urgency
                .map(|u| u.parse::<Urgency>())
                .transpose()
                .map_err(StorageError::InvalidValue)?,
            urgency_source: self.urgency_source,
        })
    }
}

impl SqliteStore {
    fn query_signals(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<Signal>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, SignalRow::from_row)?;
        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?.into_signal()?);
        }
        Ok(signals)
    }

    /// Insert a new active signal; `None` when the natural key already exists.
    fn insert_signal_row(
        conn: &Connection,
        source: &str,
        item: &SignalItem,
        captured_at: &str,
    ) -> StorageResult<Option<i64>> {
        let urgency = heuristic_urgency(source, item.kind.as_deref());
        let rows = conn.execute(
            r#"
            INSERT INTO signals (source, title, preview, snippet, source_ts, kind, captured_at,
                                 urgency, urgency_source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (source, title, preview, source_ts) DO NOTHING
            "#,
            params![
                source,
                item.title,
                item.preview,
                item.snippet,
                item.source_ts,
                item.kind,
                captured_at,
                urgency.map(|u| u.as_str()),
                urgency.map(|_| HEURISTIC_URGENCY_SOURCE),
            ],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    fn update_signal(&self, id: i64, sql: &str, params: &[&dyn rusqlite::ToSql]) -> StorageResult<()> {
        let conn = self.lock()?;
        let rows = conn.execute(sql, params)?;
        if rows == 0 {
            return Err(StorageError::SignalNotFound(id));
        }
        Ok(())
    }
}

impl SignalStore for SqliteStore {
    fn insert_signal(
        &self,
        source: &str,
        item: &SignalItem,
        captured_at: DateTime<Utc>,
    ) -> StorageResult<Option<i64>> {
        let conn = self.lock()?;
        Self::insert_signal_row(&conn, source, item, &format_ts(captured_at))
    }

    fn reconcile_signals(
        &self,
        source: &str,
        items: &[SignalItem],
        captured_at: DateTime<Utc>,
    ) -> StorageResult<ReconcileReport> {
        let items = dedup_items(items);
        let batch: HashSet<SignalKey> = items.iter().map(SignalItem::key).collect();
        let captured = format_ts(captured_at);
        let mut report = ReconcileReport::default();

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for item in &items {
            let existing: Option<(i64, Option<String>, bool)> = tx
                .query_row(
                    r#"
                    SELECT id, completed_at, auto_completed FROM signals
                    WHERE source = ?1 AND title = ?2 AND preview = ?3 AND source_ts = ?4
                    "#,
                    params![source, item.title, item.preview, item.source_ts],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            match existing {
                None => {
                    if let Some(id) = Self::insert_signal_row(&tx, source, item, &captured)? {
                        report.inserted += 1;
                        report.inserted_ids.push(id);
                    }
                }
                // vanished from an earlier scrape, back now
                Some((id, Some(_), true)) => {
                    tx.execute(
                        "UPDATE signals SET completed_at = NULL, auto_completed = 0 WHERE id = ?1",
                        [id],
                    )?;
                    report.reactivated += 1;
                }
                // still active, or completed by hand
                Some(_) => {}
            }
        }

        let stale: Vec<i64> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, title, preview, source_ts FROM signals
                WHERE source = ?1 AND completed_at IS NULL AND pinned = 0
                "#,
            )?;
            let rows = stmt.query_map([source], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    (row.get::<_, String>(1)?, row.get::<_, String>(2)?, row.get::<_, String>(3)?),
                ))
            })?;
            let mut stale = Vec::new();
            for row in rows {
                let (id, key) = row?;
                if !batch.contains(&key) {
                    stale.push(id);
                }
            }
            stale
        };

        for id in &stale {
            tx.execute(
                "UPDATE signals SET completed_at = ?1, auto_completed = 1 WHERE id = ?2",
                params![captured, id],
            )?;
        }
        report.auto_completed = stale.len();
        tx.commit()?;

        tracing::info!(
            source,
            inserted = report.inserted,
            auto_completed = report.auto_completed,
            reactivated = report.reactivated,
            "signals reconciled"
        );
        Ok(report)
    }

    fn get_signal(&self, id: i64) -> StorageResult<Option<Signal>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM signals WHERE id = ?1", SIGNAL_COLUMNS);
        Ok(Self::query_signals(&conn, &sql, params![id])?.pop())
    }

    fn list_signals(&self, filter: &SignalFilter) -> StorageResult<Vec<Signal>> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {} FROM signals WHERE 1 = 1", SIGNAL_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref source) = filter.source {
            sql.push_str(" AND source = ?");
            params_vec.push(Box::new(source.clone()));
        }

        if !filter.include_completed {
            sql.push_str(" AND completed_at IS NULL");
        }

        sql.push_str(
            " ORDER BY CASE WHEN completed_at IS NULL THEN 0 ELSE 1 END, \
             COALESCE(completed_at, captured_at) DESC, id DESC",
        );

        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        Self::query_signals(&conn, &sql, &params_refs)
    }

    fn signal_history(&self) -> StorageResult<Vec<Signal>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM signals ORDER BY captured_at ASC, id ASC",
            SIGNAL_COLUMNS
        );
        Self::query_signals(&conn, &sql, &[])
    }

    fn complete_signal(&self, id: i64) -> StorageResult<()> {
        self.update_signal(
            id,
            "UPDATE signals SET completed_at = ?1, auto_completed = 0, pinned = 0 WHERE id = ?2",
            params![format_ts(self.now()), id],
        )
    }

    fn reopen_signal(&self, id: i64) -> StorageResult<()> {
        // pin so the next scrape cannot auto-complete it straight away
        self.update_signal(
            id,
            "UPDATE signals SET completed_at = NULL, auto_completed = 0, pinned = 1 WHERE id = ?1",
            params![id],
        )
    }

    fn set_pinned(&self, id: i64, pinned: bool) -> StorageResult<()> {
        self.update_signal(
            id,
            "UPDATE signals SET pinned = ?1 WHERE id = ?2",
            params![pinned, id],
        )
    }

    fn set_urgency(&self, id: i64, urgency: Urgency, urgency_source: &str) -> StorageResult<()> {
        self.update_signal(
            id,
            "UPDATE signals SET urgency = ?1, urgency_source = ?2 WHERE id = ?3",
            params![urgency.as_str(), urgency_source, id],
        )
    }

    fn list_unclassified(&self) -> StorageResult<Vec<Signal>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM signals WHERE completed_at IS NULL AND urgency IS NULL \
             ORDER BY captured_at DESC, id DESC",
            SIGNAL_COLUMNS
        );
        Self::query_signals(&conn, &sql, &[])
    }

    fn active_signal_counts(&self) -> StorageResult<BTreeMap<String, usize>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source, COUNT(*) FROM signals WHERE completed_at IS NULL GROUP BY source",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (source, count) = row?;
            counts.insert(source, count.max(0) as usize);
        }
        Ok(counts)
    }
}
