//! Checkpoint log repository

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{HistoryEntry, Revision};

/// Trait for checkpoint log storage
pub trait HistoryLog {
    /// The most recent entry for a dataset: highest local revision, ties
    /// broken by the higher peer revision
    fn last(&self, dataset: &str) -> Result<Option<HistoryEntry>>;

    /// All entries with `local_revision` greater than the given revision,
    /// in ascending order
    fn entries_after(&self, dataset: &str, revision: Revision) -> Result<Vec<HistoryEntry>>;

    /// Append a new entry
    fn append(&self, entry: &HistoryEntry) -> Result<()>;
}

/// `SQLite` implementation of `HistoryLog`
pub struct SqliteHistoryLog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteHistoryLog<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
        let created_ms: i64 = row.get(3)?;
        Ok(HistoryEntry {
            dataset: row.get(0)?,
            local_revision: row.get(1)?,
            peer_revision: row.get(2)?,
            created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or(DateTime::UNIX_EPOCH),
        })
    }
}

impl HistoryLog for SqliteHistoryLog<'_> {
    fn last(&self, dataset: &str) -> Result<Option<HistoryEntry>> {
        let result = self.conn.query_row(
            "SELECT dataset, local_revision, peer_revision, created_at
             FROM sync_history
             WHERE dataset = ?
             ORDER BY local_revision DESC, peer_revision DESC
             LIMIT 1",
            params![dataset],
            Self::parse_entry,
        );

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn entries_after(&self, dataset: &str, revision: Revision) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT dataset, local_revision, peer_revision, created_at
             FROM sync_history
             WHERE dataset = ? AND local_revision > ?
             ORDER BY local_revision ASC, peer_revision ASC",
        )?;

        let entries = stmt
            .query_map(params![dataset, revision], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn append(&self, entry: &HistoryEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_history (dataset, local_revision, peer_revision, created_at)
             VALUES (?, ?, ?, ?)",
            params![
                entry.dataset,
                entry.local_revision,
                entry.peer_revision,
                entry.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }
}
