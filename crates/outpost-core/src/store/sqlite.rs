//! `SQLite`-backed reference implementation of the versioned store.
//!
//! Stands in for the production versioned engine the contract assumes:
//! current features live in `features`, every change is appended to
//! `feature_log`, and the per-dataset revision counter lives on the
//! `datasets` row. Window diffs are net-folded from the log.

use std::collections::VecDeque;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{ChangeKind, DatasetSchema, FeatureChange, FeatureId, FeatureSnapshot, Revision};

use super::{ChangeStream, IdFilter, RevisionWindow, StoreTx};

/// Versioned store over a `SQLite` connection. Construct one per dataset
/// per transaction; under a `rusqlite::Transaction` all writes share its
/// atomicity.
pub struct SqliteStore<'a> {
    conn: &'a Connection,
    dataset: String,
    schema: DatasetSchema,
}

impl<'a> SqliteStore<'a> {
    /// Open the store for a dataset, failing when the dataset is not
    /// registered for synchronization
    pub fn open(conn: &'a Connection, dataset: &str) -> Result<Self> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT attr_schema FROM datasets WHERE name = ?",
                params![dataset],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Err(Error::UnknownDataset(dataset.to_string()));
        };

        Ok(Self {
            conn,
            dataset: dataset.to_string(),
            schema: serde_json::from_str(&raw)?,
        })
    }

    /// Register a dataset with its attribute schema
    pub fn create_dataset(conn: &Connection, name: &str, schema: &DatasetSchema) -> Result<()> {
        conn.execute(
            "INSERT INTO datasets (name, attr_schema, revision) VALUES (?, ?, 0)",
            params![name, serde_json::to_string(schema)?],
        )?;
        Ok(())
    }

    /// Whether a dataset is registered
    pub fn dataset_exists(conn: &Connection, name: &str) -> Result<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM datasets WHERE name = ?)",
            params![name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Names of all registered datasets
    pub fn list_datasets(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT name FROM datasets ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Feature state as of a past revision; `None` when the feature did
    /// not exist at that point
    fn state_at(&self, revision: Revision, id: &FeatureId) -> Result<Option<FeatureSnapshot>> {
        let after: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT after_state FROM feature_log
                 WHERE dataset = ? AND fid = ? AND revision <= ?
                 ORDER BY revision DESC, seq DESC
                 LIMIT 1",
                params![self.dataset, id.as_str(), revision],
                |row| row.get(0),
            )
            .optional()?;

        match after.flatten() {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn log_change(&self, revision: Revision, change: &FeatureChange) -> Result<()> {
        let before = change.before().map(serde_json::to_string).transpose()?;
        let after = change.after().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO feature_log (dataset, revision, fid, kind, before_state, after_state)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                self.dataset,
                revision,
                change.id().as_str(),
                change.kind().as_str(),
                before,
                after,
            ],
        )?;
        Ok(())
    }

    fn write_current(&self, change: &FeatureChange) -> Result<()> {
        match change.after() {
            Some(after) => {
                self.conn.execute(
                    "INSERT OR REPLACE INTO features (dataset, fid, attrs) VALUES (?, ?, ?)",
                    params![self.dataset, change.id().as_str(), serde_json::to_string(after)?],
                )?;
            }
            None => {
                self.conn.execute(
                    "DELETE FROM features WHERE dataset = ? AND fid = ?",
                    params![self.dataset, change.id().as_str()],
                )?;
            }
        }
        Ok(())
    }
}

impl StoreTx for SqliteStore<'_> {
    type Stream = SqliteChangeStream;

    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    fn current_revision(&self) -> Result<Revision> {
        let revision: Revision = self.conn.query_row(
            "SELECT revision FROM datasets WHERE name = ?",
            params![self.dataset],
            |row| row.get(0),
        )?;
        Ok(revision)
    }

    fn allocate_revision(&mut self, author: &str, message: &str) -> Result<Revision> {
        self.conn.execute(
            "UPDATE datasets SET revision = revision + 1 WHERE name = ?",
            params![self.dataset],
        )?;
        let revision = self.current_revision()?;
        self.conn.execute(
            "INSERT INTO revisions (dataset, revision, author, message, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                self.dataset,
                revision,
                author,
                message,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(revision)
    }

    fn has_changes_since(&self, revision: Revision) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM feature_log WHERE dataset = ? AND revision > ?)",
            params![self.dataset, revision],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn changes(&self, window: RevisionWindow, filter: &IdFilter) -> Result<Self::Stream> {
        if window.is_empty() {
            return Ok(SqliteChangeStream::empty());
        }

        let mut stmt = self.conn.prepare(
            "SELECT fid, before_state, after_state FROM feature_log
             WHERE dataset = ? AND revision > ? AND revision <= ?
             ORDER BY fid ASC, revision ASC, seq ASC",
        )?;
        let mut rows = stmt.query(params![self.dataset, window.from, window.to])?;

        // Rows arrive grouped by feature id in chronological order; the
        // net change per feature is its first before-state paired with its
        // last after-state.
        let mut changes = VecDeque::new();
        let mut group: Option<(FeatureId, Option<String>, Option<String>)> = None;

        let mut flush =
            |group: Option<(FeatureId, Option<String>, Option<String>)>,
             out: &mut VecDeque<FeatureChange>|
             -> Result<()> {
                if let Some((id, first_before, last_after)) = group {
                    let from = first_before
                        .as_deref()
                        .map(serde_json::from_str::<FeatureSnapshot>)
                        .transpose()?;
                    let to = last_after
                        .as_deref()
                        .map(serde_json::from_str::<FeatureSnapshot>)
                        .transpose()?;
                    if let Some(change) = FeatureChange::from_endpoints(id, from, to) {
                        out.push_back(change);
                    }
                }
                Ok(())
            };

        while let Some(row) = rows.next()? {
            let fid = FeatureId::new(row.get::<_, String>(0)?);
            let before: Option<String> = row.get(1)?;
            let after: Option<String> = row.get(2)?;

            if !filter.matches(&fid) {
                continue;
            }
            match &mut group {
                Some((id, _, last_after)) if *id == fid => {
                    *last_after = after;
                }
                _ => {
                    flush(group.take(), &mut changes)?;
                    group = Some((fid, before, after));
                }
            }
        }
        flush(group, &mut changes)?;

        Ok(SqliteChangeStream {
            changes,
            closed: false,
        })
    }

    fn feature(&self, id: &FeatureId) -> Result<Option<FeatureSnapshot>> {
        let attrs: Option<String> = self
            .conn
            .query_row(
                "SELECT attrs FROM features WHERE dataset = ? AND fid = ?",
                params![self.dataset, id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match attrs {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn rollback_feature(&mut self, to: Revision, id: &FeatureId) -> Result<()> {
        let target = self.state_at(to, id)?;
        let current = self.feature(id)?;

        let Some(change) = FeatureChange::from_endpoints(id.clone(), current, target) else {
            return Ok(());
        };
        // from_endpoints orients current -> target, so applying it is the
        // restoring write
        let revision = self.current_revision()?;
        self.log_change(revision, &change)?;
        self.write_current(&change)
    }

    fn apply(&mut self, change: &FeatureChange) -> Result<()> {
        if change.kind() == ChangeKind::Inserted && self.feature(change.id())?.is_some() {
            return Err(Error::Inconsistency(format!(
                "insert for feature '{}' which already exists in dataset '{}'",
                change.id(),
                self.dataset
            )));
        }
        let revision = self.current_revision()?;
        self.log_change(revision, change)?;
        self.write_current(change)
    }
}

/// Change stream over a materialized window diff
pub struct SqliteChangeStream {
    changes: VecDeque<FeatureChange>,
    closed: bool,
}

impl SqliteChangeStream {
    const fn empty() -> Self {
        Self {
            changes: VecDeque::new(),
            closed: true,
        }
    }
}

impl ChangeStream for SqliteChangeStream {
    fn next_change(&mut self) -> Result<Option<FeatureChange>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.changes.pop_front())
    }

    fn close(&mut self) {
        self.closed = true;
        self.changes.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::db::Database;
    use crate::models::{AttrValue, AttributeType};

    use super::*;

    fn schema() -> DatasetSchema {
        [
            ("color".to_string(), AttributeType::Text),
            ("lanes".to_string(), AttributeType::Integer),
        ]
        .into_iter()
        .collect()
    }

    fn snapshot(color: &str, lanes: i64) -> FeatureSnapshot {
        [
            ("color".to_string(), AttrValue::Text(color.into())),
            ("lanes".to_string(), AttrValue::Integer(lanes)),
        ]
        .into_iter()
        .collect()
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        SqliteStore::create_dataset(db.connection(), "roads", &schema()).unwrap();
        db
    }

    fn insert(store: &mut SqliteStore<'_>, fid: &str, feature: FeatureSnapshot) {
        store.allocate_revision("local", "test edit").unwrap();
        store
            .apply(&FeatureChange::Inserted {
                id: FeatureId::new(fid),
                feature,
            })
            .unwrap();
    }

    fn update(store: &mut SqliteStore<'_>, fid: &str, after: FeatureSnapshot) {
        let id = FeatureId::new(fid);
        let before = store.feature(&id).unwrap().unwrap();
        store.allocate_revision("local", "test edit").unwrap();
        store.apply(&FeatureChange::Updated { id, before, after }).unwrap();
    }

    #[test]
    fn open_rejects_unknown_dataset() {
        let db = setup();
        let missing = SqliteStore::open(db.connection(), "buildings");
        assert!(matches!(missing, Err(Error::UnknownDataset(_))));
    }

    #[test]
    fn revisions_allocate_monotonically() {
        let db = setup();
        let mut store = SqliteStore::open(db.connection(), "roads").unwrap();
        assert_eq!(store.current_revision().unwrap(), 0);
        assert_eq!(store.allocate_revision("local", "first").unwrap(), 1);
        assert_eq!(store.allocate_revision("local", "second").unwrap(), 2);
    }

    #[test]
    fn window_diff_folds_to_net_change() {
        let db = setup();
        let mut store = SqliteStore::open(db.connection(), "roads").unwrap();

        insert(&mut store, "f1", snapshot("red", 2)); // revision 1
        update(&mut store, "f1", snapshot("blue", 2)); // revision 2
        update(&mut store, "f1", snapshot("blue", 4)); // revision 3

        // whole window: a single net insert with the final state
        let mut all = store
            .changes(RevisionWindow::new(0, 3), &IdFilter::All)
            .unwrap();
        let change = all.next_change().unwrap().unwrap();
        assert_eq!(change.kind(), ChangeKind::Inserted);
        assert_eq!(change.after(), Some(&snapshot("blue", 4)));
        assert_eq!(all.next_change().unwrap(), None);

        // tail window: a net update from the revision-1 state
        let mut tail = store
            .changes(RevisionWindow::new(1, 3), &IdFilter::All)
            .unwrap();
        let change = tail.next_change().unwrap().unwrap();
        assert_eq!(change.kind(), ChangeKind::Updated);
        assert_eq!(change.before(), Some(&snapshot("red", 2)));
        assert_eq!(change.after(), Some(&snapshot("blue", 4)));
    }

    #[test]
    fn insert_then_delete_nets_to_nothing() {
        let db = setup();
        let mut store = SqliteStore::open(db.connection(), "roads").unwrap();

        insert(&mut store, "f1", snapshot("red", 2));
        let before = store.feature(&FeatureId::new("f1")).unwrap().unwrap();
        store.allocate_revision("local", "test edit").unwrap();
        store
            .apply(&FeatureChange::Deleted {
                id: FeatureId::new("f1"),
                before,
            })
            .unwrap();

        let mut all = store
            .changes(RevisionWindow::new(0, 2), &IdFilter::All)
            .unwrap();
        assert_eq!(all.next_change().unwrap(), None);
    }

    #[test]
    fn changes_are_ordered_by_feature_id() {
        let db = setup();
        let mut store = SqliteStore::open(db.connection(), "roads").unwrap();

        insert(&mut store, "f2", snapshot("red", 1));
        insert(&mut store, "f1", snapshot("blue", 2));

        let mut all = store
            .changes(RevisionWindow::new(0, 2), &IdFilter::All)
            .unwrap();
        assert_eq!(all.next_change().unwrap().unwrap().id().as_str(), "f1");
        assert_eq!(all.next_change().unwrap().unwrap().id().as_str(), "f2");
    }

    #[test]
    fn id_filter_excludes_features() {
        let db = setup();
        let mut store = SqliteStore::open(db.connection(), "roads").unwrap();

        insert(&mut store, "f1", snapshot("red", 1));
        insert(&mut store, "f2", snapshot("blue", 2));

        let filter = IdFilter::Excluding(std::iter::once(FeatureId::new("f1")).collect());
        let mut stream = store
            .changes(RevisionWindow::new(0, 2), &filter)
            .unwrap();
        assert_eq!(stream.next_change().unwrap().unwrap().id().as_str(), "f2");
        assert_eq!(stream.next_change().unwrap(), None);
    }

    #[test]
    fn rollback_restores_past_state() {
        let db = setup();
        let mut store = SqliteStore::open(db.connection(), "roads").unwrap();

        insert(&mut store, "f1", snapshot("red", 2)); // revision 1
        update(&mut store, "f1", snapshot("blue", 2)); // revision 2

        store.allocate_revision("sync", "rollback").unwrap();
        store.rollback_feature(1, &FeatureId::new("f1")).unwrap();
        assert_eq!(
            store.feature(&FeatureId::new("f1")).unwrap(),
            Some(snapshot("red", 2))
        );

        // rolling back before the feature existed removes it
        store.rollback_feature(0, &FeatureId::new("f1")).unwrap();
        assert_eq!(store.feature(&FeatureId::new("f1")).unwrap(), None);
    }

    #[test]
    fn duplicate_insert_is_an_inconsistency() {
        let db = setup();
        let mut store = SqliteStore::open(db.connection(), "roads").unwrap();

        insert(&mut store, "f1", snapshot("red", 2));
        store.allocate_revision("local", "test edit").unwrap();
        let duplicate = store.apply(&FeatureChange::Inserted {
            id: FeatureId::new("f1"),
            feature: snapshot("blue", 1),
        });
        assert!(matches!(duplicate, Err(Error::Inconsistency(_))));
    }

    #[test]
    fn has_changes_since_tracks_the_log() {
        let db = setup();
        let mut store = SqliteStore::open(db.connection(), "roads").unwrap();
        assert!(!store.has_changes_since(0).unwrap());

        insert(&mut store, "f1", snapshot("red", 2));
        assert!(store.has_changes_since(0).unwrap());
        assert!(!store.has_changes_since(1).unwrap());
    }
}
