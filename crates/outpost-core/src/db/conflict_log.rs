//! Conflict record repository

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{ConflictRecord, ConflictState, FeatureId, FeatureSnapshot, Revision};

/// Trait for conflict record storage
pub trait ConflictLog {
    /// Record the outcome for one touched feature
    fn record(&self, record: &ConflictRecord) -> Result<()>;

    /// Ids of features with an unresolved conflict in this dataset
    fn active_conflicts(&self, dataset: &str) -> Result<BTreeSet<FeatureId>>;

    /// Ids of features whose clean merge was recorded at the given local
    /// revision
    fn clean_merges_at(&self, dataset: &str, revision: Revision) -> Result<BTreeSet<FeatureId>>;

    /// All records, optionally restricted to one dataset, newest first
    fn list(&self, dataset: Option<&str>) -> Result<Vec<ConflictRecord>>;

    /// Close the active conflict on a feature. Fails with `NotFound` when
    /// no unresolved conflict exists for it.
    fn resolve(&self, dataset: &str, feature_id: &FeatureId, at: DateTime<Utc>) -> Result<()>;
}

/// `SQLite` implementation of `ConflictLog`
pub struct SqliteConflictLog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictLog<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRecord> {
        let created_ms: i64 = row.get(3)?;
        let state: String = row.get(4)?;
        let resolved_ms: Option<i64> = row.get(5)?;
        let snapshot: Option<String> = row.get(6)?;
        Ok(ConflictRecord {
            dataset: row.get(0)?,
            feature_id: FeatureId::new(row.get::<_, String>(1)?),
            local_revision: row.get(2)?,
            created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or(DateTime::UNIX_EPOCH),
            state: ConflictState::parse(&state).unwrap_or(ConflictState::Conflict),
            resolved_at: resolved_ms.and_then(DateTime::from_timestamp_millis),
            local_snapshot: snapshot
                .as_deref()
                .and_then(|raw| serde_json::from_str::<FeatureSnapshot>(raw).ok()),
        })
    }

    fn feature_ids(&self, sql: &str, params: impl rusqlite::Params) -> Result<BTreeSet<FeatureId>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(FeatureId::new).collect())
    }
}

impl ConflictLog for SqliteConflictLog<'_> {
    fn record(&self, record: &ConflictRecord) -> Result<()> {
        let snapshot = record
            .local_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO sync_conflicts
                 (dataset, feature_id, local_revision, created_at, state, resolved_at, local_snapshot)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                record.dataset,
                record.feature_id.as_str(),
                record.local_revision,
                record.created_at.timestamp_millis(),
                record.state.as_str(),
                record.resolved_at.map(|at| at.timestamp_millis()),
                snapshot,
            ],
        )?;
        Ok(())
    }

    fn active_conflicts(&self, dataset: &str) -> Result<BTreeSet<FeatureId>> {
        self.feature_ids(
            "SELECT feature_id FROM sync_conflicts WHERE dataset = ? AND state = 'conflict'",
            params![dataset],
        )
    }

    fn clean_merges_at(&self, dataset: &str, revision: Revision) -> Result<BTreeSet<FeatureId>> {
        self.feature_ids(
            "SELECT feature_id FROM sync_conflicts
             WHERE dataset = ? AND state = 'clean_merge' AND local_revision = ?",
            params![dataset, revision],
        )
    }

    fn list(&self, dataset: Option<&str>) -> Result<Vec<ConflictRecord>> {
        let sql = "SELECT dataset, feature_id, local_revision, created_at, state, resolved_at, local_snapshot
                   FROM sync_conflicts";
        let records = match dataset {
            Some(name) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{sql} WHERE dataset = ? ORDER BY created_at DESC"))?;
                let rows = stmt
                    .query_map(params![name], Self::parse_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!("{sql} ORDER BY created_at DESC"))?;
                let rows = stmt
                    .query_map([], Self::parse_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(records)
    }

    fn resolve(&self, dataset: &str, feature_id: &FeatureId, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sync_conflicts SET state = 'resolved', resolved_at = ?
             WHERE dataset = ? AND feature_id = ? AND state = 'conflict'",
            params![at.timestamp_millis(), dataset, feature_id.as_str()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "no active conflict for feature '{feature_id}' in dataset '{dataset}'"
            )));
        }
        Ok(())
    }
}
