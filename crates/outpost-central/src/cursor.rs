//! Per-(unit, dataset) synchronization cursors.
//!
//! The durable "where did we leave off" state the scheduler reads before
//! and writes after every cycle.

use chrono::{DateTime, Utc};
use outpost_core::models::{Revision, UNKNOWN_REVISION};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Scheduler cursor for one (unit, dataset) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCursor {
    pub unit: String,
    pub dataset: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Central revision holding this unit's last round-tripped (pulled and
    /// applied) changes; pushes skip this revision's window so the unit's
    /// own edits are not echoed back
    pub last_push_revision: Revision,
    /// Unit revision of the last pull response; the next pull resumes here
    pub last_pull_revision: Revision,
}

impl UnitCursor {
    /// Fresh cursor for a pair that never synchronized
    #[must_use]
    pub fn fresh(unit: &str, dataset: &str) -> Self {
        Self {
            unit: unit.to_string(),
            dataset: dataset.to_string(),
            last_sync_at: None,
            last_failure_at: None,
            last_push_revision: UNKNOWN_REVISION,
            last_pull_revision: UNKNOWN_REVISION,
        }
    }
}

/// Trait for cursor storage
pub trait CursorStore {
    /// Cursor for a pair, a fresh one when none was recorded yet
    fn get(&self, unit: &str, dataset: &str) -> Result<UnitCursor>;

    /// Insert or replace a cursor
    fn upsert(&self, cursor: &UnitCursor) -> Result<()>;

    /// Stamp a failed cycle, leaving the revision cursors untouched
    fn record_failure(&self, unit: &str, dataset: &str, at: DateTime<Utc>) -> Result<()>;
}

/// `SQLite` implementation of `CursorStore`
pub struct SqliteCursorStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCursorStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_cursor(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnitCursor> {
        let sync_ms: Option<i64> = row.get(2)?;
        let failure_ms: Option<i64> = row.get(3)?;
        Ok(UnitCursor {
            unit: row.get(0)?,
            dataset: row.get(1)?,
            last_sync_at: sync_ms.and_then(DateTime::from_timestamp_millis),
            last_failure_at: failure_ms.and_then(DateTime::from_timestamp_millis),
            last_push_revision: row.get(4)?,
            last_pull_revision: row.get(5)?,
        })
    }
}

impl CursorStore for SqliteCursorStore<'_> {
    fn get(&self, unit: &str, dataset: &str) -> Result<UnitCursor> {
        let cursor = self
            .conn
            .query_row(
                "SELECT unit, dataset, last_sync_at, last_failure_at,
                        last_push_revision, last_pull_revision
                 FROM unit_cursors WHERE unit = ? AND dataset = ?",
                params![unit, dataset],
                Self::parse_cursor,
            )
            .optional()?;
        Ok(cursor.unwrap_or_else(|| UnitCursor::fresh(unit, dataset)))
    }

    fn upsert(&self, cursor: &UnitCursor) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO unit_cursors
                 (unit, dataset, last_sync_at, last_failure_at,
                  last_push_revision, last_pull_revision)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                cursor.unit,
                cursor.dataset,
                cursor.last_sync_at.map(|at| at.timestamp_millis()),
                cursor.last_failure_at.map(|at| at.timestamp_millis()),
                cursor.last_push_revision,
                cursor.last_pull_revision,
            ],
        )?;
        Ok(())
    }

    fn record_failure(&self, unit: &str, dataset: &str, at: DateTime<Utc>) -> Result<()> {
        let mut cursor = self.get(unit, dataset)?;
        cursor.last_failure_at = Some(at);
        self.upsert(&cursor)
    }
}
