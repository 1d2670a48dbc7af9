//! The synchronization service.
//!
//! Implements the three peer-visible operations over the local database:
//! query the last acknowledged peer revision, absorb a pushed changeset,
//! and collect the outgoing changeset for a pull. Each push (and each
//! pulled-changeset application) runs in a single `IMMEDIATE` transaction:
//! revision allocation, conflict resolution, changeset application, and
//! the checkpoint append all commit together or not at all, and the write
//! lock the transaction takes serializes concurrent writers on the same
//! database.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::conflict;
use crate::db::{ConflictLog, Database, SqliteConflictLog, SqliteHistoryLog};
use crate::error::{Error, Result};
use crate::merge::MergedChangeStream;
use crate::models::{
    AttrValue, ConflictRecord, DatasetSchema, FeatureChange, FeatureId, FeatureSnapshot, Revision,
    UNKNOWN_REVISION,
};
use crate::protocol::{PullResponse, PushRequest, WireChange};
use crate::store::{ChangeStream, IdFilter, RevisionWindow, SqliteStore, StoreTx};
use crate::tracker::RevisionTracker;

/// A write performed by the local application, as opposed to one arriving
/// from a peer
#[derive(Debug, Clone)]
pub enum LocalEdit {
    Insert {
        /// Minted when omitted
        id: Option<FeatureId>,
        values: BTreeMap<String, AttrValue>,
    },
    Update {
        id: FeatureId,
        values: BTreeMap<String, AttrValue>,
    },
    Delete {
        id: FeatureId,
    },
}

/// Synchronization engine over one local database
pub struct SyncService {
    db: Database,
}

impl SyncService {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database; hosts layer their own tables on it
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Register a dataset for synchronization
    pub fn create_dataset(&self, name: &str, schema: &DatasetSchema) -> Result<()> {
        SqliteStore::create_dataset(self.db.connection(), name, schema)
    }

    /// Names of all datasets enabled for synchronization
    pub fn list_datasets(&self) -> Result<Vec<String>> {
        SqliteStore::list_datasets(self.db.connection())
    }

    /// Last peer revision acknowledged for a dataset (`-1` if never
    /// synced). Pure read.
    pub fn peer_revision(&self, dataset: &str) -> Result<Revision> {
        self.ensure_dataset(dataset)?;
        let history = SqliteHistoryLog::new(self.db.connection());
        let last = RevisionTracker::new(&history).last_checkpoint(dataset)?;
        Ok(last.map_or(UNKNOWN_REVISION, |entry| entry.peer_revision))
    }

    /// Absorb a changeset pushed by the peer.
    ///
    /// `from_version` must match the last acknowledged peer revision; an
    /// empty exchange with no local edits records the new peer revision
    /// without consuming a local one. Everything else allocates a local
    /// revision up front, resolves conflicts against local edits made
    /// since the checkpoint, applies the changeset, and appends the new
    /// checkpoint.
    pub fn apply_incoming(&mut self, dataset: &str, request: &PushRequest) -> Result<()> {
        let tx = self
            .db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        {
            let mut store = SqliteStore::open(&tx, dataset)?;
            let history = SqliteHistoryLog::new(&tx);
            let conflicts = SqliteConflictLog::new(&tx);
            let tracker = RevisionTracker::new(&history);

            let last = tracker.last_checkpoint(dataset)?;
            let (last_local, last_peer) = last
                .as_ref()
                .map_or((UNKNOWN_REVISION, UNKNOWN_REVISION), |entry| {
                    (entry.local_revision, entry.peer_revision)
                });

            if request.from_version != last_peer {
                return Err(Error::Protocol(format!(
                    "invalid fromVersion {}, the last acknowledged peer revision is {last_peer}",
                    request.from_version
                )));
            }
            if request.from_version > request.to_version {
                return Err(Error::Protocol(format!(
                    "invalid toVersion {}, it must not be lower than fromVersion {}",
                    request.to_version, request.from_version
                )));
            }

            // if neither side changed anything there is no point eating a
            // revision number on frequent synchronizations
            if request.changes.is_empty() && !store.has_changes_since(last_local)? {
                tracker.record(dataset, last_local, request.to_version)?;
            } else {
                // grab the revision early; no other writer can allocate
                // one on this dataset until we commit or roll back
                let new_revision = store.allocate_revision(
                    "sync",
                    &format!("applying {} changes pushed by peer", request.changes.len()),
                )?;

                conflict::resolve_incoming(
                    &mut store,
                    &conflicts,
                    last_local,
                    new_revision,
                    &request.incoming(),
                )?;

                for change in &request.changes {
                    apply_wire(&mut store, change)?;
                }

                tracker.record(dataset, new_revision, request.to_version)?;
                info!(
                    dataset,
                    changes = request.changes.len(),
                    revision = new_revision,
                    "applied pushed changeset"
                );
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Collect the local edits since `from_version` for the peer.
    ///
    /// Diffs are taken per checkpoint window so peer-originated changes
    /// committed at the checkpoints themselves are skipped, conflicting
    /// features are withheld entirely, and clean-merged edits the peer
    /// already owns are not echoed back.
    pub fn collect_outgoing(&self, dataset: &str, from_version: Revision) -> Result<PullResponse> {
        let conn = self.db.connection();
        let store = SqliteStore::open(conn, dataset)?;
        let history = SqliteHistoryLog::new(conn);
        let conflicts = SqliteConflictLog::new(conn);
        let tracker = RevisionTracker::new(&history);

        let Some(last) = tracker.last_checkpoint(dataset)? else {
            return Err(Error::Protocol(
                "out of order call: no push exchange has completed for this dataset yet"
                    .to_string(),
            ));
        };
        if from_version > last.local_revision {
            return Err(Error::Protocol(format!(
                "invalid fromVersion {from_version}, it is more recent than the last \
                 completed exchange at revision {}",
                last.local_revision
            )));
        }

        let windows = tracker.pull_windows(dataset, from_version)?;
        let active = conflicts.active_conflicts(dataset)?;

        let mut streams = Vec::with_capacity(windows.len());
        for pull_window in &windows {
            let mut excluded = active.clone();
            excluded.extend(conflicts.clean_merges_at(dataset, pull_window.checkpoint)?);
            streams.push(store.changes(pull_window.window, &IdFilter::Excluding(excluded))?);
        }

        let mut merged = MergedChangeStream::new(streams);
        let mut changes = Vec::new();
        while let Some(change) = merged.next_change()? {
            changes.push(WireChange::from_change(&change));
        }

        info!(dataset, count = changes.len(), "collected outgoing changeset");
        Ok(PullResponse {
            from_version,
            to_version: last.local_revision,
            changes,
        })
    }

    /// Collect the changes a peer is missing, given the revision it has
    /// acknowledged.
    ///
    /// `skip_revision` is the local revision holding changes that
    /// originated from that same peer (applied from its last pull); when
    /// the peer has not yet acknowledged past it, the diff is split into
    /// the windows on either side so the peer's own edits are not sent
    /// back to it. Returns the latest local revision alongside the
    /// changeset; the pair feeds a push as `(to_version, changes)`.
    pub fn changes_for_peer(
        &self,
        dataset: &str,
        acknowledged: Revision,
        skip_revision: Revision,
    ) -> Result<(Revision, Vec<WireChange>)> {
        let conn = self.db.connection();
        let store = SqliteStore::open(conn, dataset)?;
        let latest = store.current_revision()?;

        let windows = if acknowledged >= skip_revision {
            vec![RevisionWindow::new(acknowledged, latest)]
        } else {
            vec![
                RevisionWindow::new(acknowledged, skip_revision - 1),
                RevisionWindow::new(skip_revision, latest),
            ]
        };

        let mut streams = Vec::with_capacity(windows.len());
        for window in windows.into_iter().filter(|w| !w.is_empty()) {
            streams.push(store.changes(window, &IdFilter::All)?);
        }

        let mut merged = MergedChangeStream::new(streams);
        let mut changes = Vec::new();
        while let Some(change) = merged.next_change()? {
            changes.push(WireChange::from_change(&change));
        }
        Ok((latest, changes))
    }

    /// Apply a changeset received from a pull, running `and_then` inside
    /// the same transaction (the caller persists its cursor there). The
    /// closure receives the revision the changes landed at, or `None` when
    /// the changeset was empty and no revision was consumed.
    pub fn apply_pulled<F, E>(
        &mut self,
        dataset: &str,
        changes: &[WireChange],
        and_then: F,
    ) -> std::result::Result<(), E>
    where
        F: FnOnce(&Transaction<'_>, Option<Revision>) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        let tx = self
            .db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(Error::from)?;

        let applied_at = if changes.is_empty() {
            SqliteStore::open(&tx, dataset).map(|_| ())?;
            None
        } else {
            let mut store = SqliteStore::open(&tx, dataset)?;
            let revision = store.allocate_revision(
                "sync",
                &format!("applying {} changes pulled from peer", changes.len()),
            )?;
            for change in changes {
                apply_wire(&mut store, change)?;
            }
            info!(
                dataset,
                changes = changes.len(),
                revision,
                "applied pulled changeset"
            );
            Some(revision)
        };

        and_then(&tx, applied_at)?;
        tx.commit().map_err(Error::from)?;
        Ok(())
    }

    /// Commit edits made by the local application, returning the revision
    /// they landed at
    pub fn commit_local(&mut self, dataset: &str, edits: &[LocalEdit]) -> Result<Revision> {
        let tx = self
            .db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let revision = {
            let mut store = SqliteStore::open(&tx, dataset)?;
            let revision =
                store.allocate_revision("local", &format!("{} local edits", edits.len()))?;

            for edit in edits {
                match edit {
                    LocalEdit::Insert { id, values } => {
                        let id = id.clone().unwrap_or_else(FeatureId::random);
                        store.apply(&FeatureChange::Inserted {
                            id,
                            feature: FeatureSnapshot::new(values.clone()),
                        })?;
                    }
                    LocalEdit::Update { id, values } => {
                        let before = store.feature(id)?.ok_or_else(|| {
                            Error::NotFound(format!("feature '{id}' in dataset '{dataset}'"))
                        })?;
                        let after = before.with_changes(values);
                        if after != before {
                            store.apply(&FeatureChange::Updated {
                                id: id.clone(),
                                before,
                                after,
                            })?;
                        }
                    }
                    LocalEdit::Delete { id } => {
                        let before = store.feature(id)?.ok_or_else(|| {
                            Error::NotFound(format!("feature '{id}' in dataset '{dataset}'"))
                        })?;
                        store.apply(&FeatureChange::Deleted {
                            id: id.clone(),
                            before,
                        })?;
                    }
                }
            }
            revision
        };

        tx.commit()?;
        Ok(revision)
    }

    /// Current state of a feature
    pub fn feature(&self, dataset: &str, id: &FeatureId) -> Result<Option<FeatureSnapshot>> {
        let store = SqliteStore::open(self.db.connection(), dataset)?;
        store.feature(id)
    }

    /// Conflict records, optionally restricted to one dataset
    pub fn list_conflicts(&self, dataset: Option<&str>) -> Result<Vec<ConflictRecord>> {
        SqliteConflictLog::new(self.db.connection()).list(dataset)
    }

    /// Close an active conflict. This is the operator-driven resolution
    /// hook; nothing in the sync paths ever resolves a conflict on its
    /// own.
    pub fn resolve_conflict(&self, dataset: &str, feature_id: &FeatureId) -> Result<()> {
        self.ensure_dataset(dataset)?;
        SqliteConflictLog::new(self.db.connection()).resolve(dataset, feature_id, Utc::now())
    }

    fn ensure_dataset(&self, dataset: &str) -> Result<()> {
        if SqliteStore::dataset_exists(self.db.connection(), dataset)? {
            Ok(())
        } else {
            Err(Error::UnknownDataset(dataset.to_string()))
        }
    }
}

/// Convert one wire change to its typed form and record it.
///
/// Updates and deletes for features that do not exist locally are skipped:
/// a delete may race a clean-merged local deletion, and the original
/// protocol applies both as silent no-ops.
fn apply_wire<S: StoreTx>(store: &mut S, change: &WireChange) -> Result<()> {
    match change {
        WireChange::Insert { id, values } => {
            let feature = FeatureSnapshot::new(coerce_values(store.schema(), values)?);
            store.apply(&FeatureChange::Inserted {
                id: id.clone(),
                feature,
            })
        }
        WireChange::Update { id, values } => {
            let Some(before) = store.feature(id)? else {
                warn!(feature = %id, "skipping update for a feature that does not exist locally");
                return Ok(());
            };
            let after = before.with_changes(&coerce_values(store.schema(), values)?);
            if after == before {
                debug!(feature = %id, "incoming update is a no-op");
                return Ok(());
            }
            store.apply(&FeatureChange::Updated {
                id: id.clone(),
                before,
                after,
            })
        }
        WireChange::Delete { id } => {
            let Some(before) = store.feature(id)? else {
                debug!(feature = %id, "feature already absent, nothing to delete");
                return Ok(());
            };
            store.apply(&FeatureChange::Deleted {
                id: id.clone(),
                before,
            })
        }
    }
}

/// Coerce raw wire values to the dataset's declared attribute types
fn coerce_values(
    schema: &DatasetSchema,
    values: &BTreeMap<String, serde_json::Value>,
) -> Result<BTreeMap<String, AttrValue>> {
    let mut coerced = BTreeMap::new();
    for (name, raw) in values {
        let ty = schema.attribute(name).ok_or_else(|| {
            Error::Protocol(format!("changeset references unknown attribute '{name}'"))
        })?;
        let value = ty.coerce(raw).ok_or_else(|| {
            Error::Protocol(format!(
                "value {raw} for attribute '{name}' cannot be converted to {ty:?}"
            ))
        })?;
        coerced.insert(name.clone(), value);
    }
    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::db::HistoryLog;
    use crate::models::{AttributeType, ConflictState};

    use super::*;

    fn schema() -> DatasetSchema {
        [
            ("color".to_string(), AttributeType::Text),
            ("lanes".to_string(), AttributeType::Integer),
        ]
        .into_iter()
        .collect()
    }

    fn service() -> SyncService {
        let service = SyncService::new(Database::open_in_memory().unwrap());
        service.create_dataset("roads", &schema()).unwrap();
        service
    }

    fn text_values(pairs: &[(&str, &str)]) -> BTreeMap<String, AttrValue> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), AttrValue::Text((*value).to_string())))
            .collect()
    }

    fn insert(service: &mut SyncService, fid: &str, color: &str) -> Revision {
        service
            .commit_local(
                "roads",
                &[LocalEdit::Insert {
                    id: Some(FeatureId::new(fid)),
                    values: text_values(&[("color", color)]),
                }],
            )
            .unwrap()
    }

    fn update(service: &mut SyncService, fid: &str, color: &str) -> Revision {
        service
            .commit_local(
                "roads",
                &[LocalEdit::Update {
                    id: FeatureId::new(fid),
                    values: text_values(&[("color", color)]),
                }],
            )
            .unwrap()
    }

    fn push(
        service: &mut SyncService,
        from: Revision,
        to: Revision,
        changes: Vec<WireChange>,
    ) -> Result<()> {
        service.apply_incoming(
            "roads",
            &PushRequest {
                from_version: from,
                to_version: to,
                changes,
            },
        )
    }

    fn wire_update(fid: &str, values: serde_json::Value) -> WireChange {
        WireChange::Update {
            id: FeatureId::new(fid),
            values: serde_json::from_value(values).unwrap(),
        }
    }

    fn last_checkpoint(service: &SyncService) -> (Revision, Revision) {
        let history = SqliteHistoryLog::new(service.db.connection());
        let entry = history.last("roads").unwrap().unwrap();
        (entry.local_revision, entry.peer_revision)
    }

    #[test]
    fn unknown_dataset_is_rejected_everywhere() {
        let mut service = service();
        assert!(matches!(
            service.peer_revision("buildings"),
            Err(Error::UnknownDataset(_))
        ));
        assert!(matches!(
            push(&mut service, -1, 0, vec![]),
            Ok(())
        ));
        let bad = service.apply_incoming(
            "buildings",
            &PushRequest {
                from_version: -1,
                to_version: 0,
                changes: vec![],
            },
        );
        assert!(matches!(bad, Err(Error::UnknownDataset(_))));
        assert!(matches!(
            service.collect_outgoing("buildings", 0),
            Err(Error::UnknownDataset(_))
        ));
    }

    #[test]
    fn first_push_against_prior_local_revisions() {
        let mut service = service();
        // ten local revisions before the first exchange
        for i in 0..10 {
            insert(&mut service, &format!("g{i}"), "grey");
        }

        push(
            &mut service,
            -1,
            5,
            vec![wire_update("f1", json!({"color": "blue"}))],
        )
        .unwrap();

        // the exchange allocated local revision 11 and checkpointed it
        assert_eq!(last_checkpoint(&service), (11, 5));
        // the update targeted a feature this side never had; skipped
        assert_eq!(service.feature("roads", &FeatureId::new("f1")).unwrap(), None);
        assert_eq!(service.peer_revision("roads").unwrap(), 5);
    }

    #[test]
    fn out_of_order_push_is_rejected() {
        let mut service = service();
        push(&mut service, -1, 5, vec![]).unwrap();

        let stale = push(&mut service, 3, 7, vec![]);
        assert!(matches!(stale, Err(Error::Protocol(_))));

        let inverted = push(&mut service, 5, 4, vec![]);
        assert!(matches!(inverted, Err(Error::Protocol(_))));
    }

    #[test]
    fn empty_exchanges_never_consume_local_revisions() {
        let mut service = service();

        push(&mut service, -1, 5, vec![]).unwrap();
        assert_eq!(last_checkpoint(&service), (-1, 5));

        push(&mut service, 5, 9, vec![]).unwrap();
        assert_eq!(last_checkpoint(&service), (-1, 9));

        // repeating the exact same exchange appends nothing
        push(&mut service, 9, 9, vec![]).unwrap();
        let history = SqliteHistoryLog::new(service.db.connection());
        assert_eq!(history.entries_after("roads", -2).unwrap().len(), 2);

        // the local revision counter never moved
        let store = SqliteStore::open(service.db.connection(), "roads").unwrap();
        assert_eq!(store.current_revision().unwrap(), 0);
    }

    #[test]
    fn identical_updates_clean_merge_without_observable_difference() {
        let mut service = service();
        insert(&mut service, "f2", "grey"); // revision 1
        push(&mut service, -1, 3, vec![]).unwrap(); // checkpoint (2, 3)

        update(&mut service, "f2", "red"); // revision 3

        // the peer pushes the very same update
        push(
            &mut service,
            3,
            6,
            vec![wire_update("f2", json!({"color": "red"}))],
        )
        .unwrap();

        let conflicts = service.list_conflicts(Some("roads")).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].state, ConflictState::CleanMerge);
        assert_eq!(conflicts[0].local_snapshot, None);
        assert_eq!(
            service.feature("roads", &FeatureId::new("f2")).unwrap(),
            Some(text_values(&[("color", "red")]).into_iter().collect())
        );
    }

    #[test]
    fn conflicting_update_preserves_local_state_and_applies_remote() {
        let mut service = service();
        insert(&mut service, "f2", "grey"); // revision 1
        push(&mut service, -1, 3, vec![]).unwrap(); // checkpoint (2, 3)

        update(&mut service, "f2", "red"); // revision 3

        push(
            &mut service,
            3,
            6,
            vec![wire_update("f2", json!({"color": "blue"}))],
        )
        .unwrap();

        let conflicts = service.list_conflicts(Some("roads")).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].state, ConflictState::Conflict);
        assert_eq!(
            conflicts[0].local_snapshot,
            Some(text_values(&[("color", "red")]).into_iter().collect())
        );
        // the incoming value won
        assert_eq!(
            service.feature("roads", &FeatureId::new("f2")).unwrap(),
            Some(text_values(&[("color", "blue")]).into_iter().collect())
        );
    }

    #[test]
    fn failed_push_leaves_no_trace() {
        let mut service = service();
        insert(&mut service, "f1", "red"); // revision 1
        push(&mut service, -1, 3, vec![]).unwrap(); // checkpoint (2, 3)
        let checkpoint_before = last_checkpoint(&service);

        // the second change collides with an existing feature and fails
        // after the first was already applied
        let failing = push(
            &mut service,
            3,
            6,
            vec![
                wire_update("f1", json!({"color": "blue"})),
                WireChange::Insert {
                    id: FeatureId::new("f1"),
                    values: serde_json::from_value(json!({"color": "green"})).unwrap(),
                },
            ],
        );
        assert!(matches!(failing, Err(Error::Inconsistency(_))));

        // everything rolled back: feature state, revision counter, history
        assert_eq!(
            service.feature("roads", &FeatureId::new("f1")).unwrap(),
            Some(text_values(&[("color", "red")]).into_iter().collect())
        );
        assert_eq!(last_checkpoint(&service), checkpoint_before);
        let store = SqliteStore::open(service.db.connection(), "roads").unwrap();
        assert_eq!(store.current_revision().unwrap(), 2);
    }

    #[test]
    fn pull_before_any_push_is_rejected() {
        let service = service();
        let early = service.collect_outgoing("roads", 0);
        assert!(matches!(early, Err(Error::Protocol(_))));
    }

    #[test]
    fn pull_with_no_later_checkpoints_is_empty() {
        let mut service = service();
        insert(&mut service, "f1", "red"); // revision 1
        push(&mut service, -1, 3, vec![]).unwrap(); // checkpoint (2, 3)

        let response = service.collect_outgoing("roads", 2).unwrap();
        assert_eq!(response.from_version, 2);
        assert_eq!(response.to_version, 2);
        assert_eq!(response.changes, vec![]);

        let future = service.collect_outgoing("roads", 3);
        assert!(matches!(future, Err(Error::Protocol(_))));
    }

    #[test]
    fn pull_returns_local_edits_and_skips_echoes() {
        let mut service = service();
        insert(&mut service, "f1", "red"); // revision 1
        push(&mut service, -1, 3, vec![]).unwrap(); // checkpoint (2, 3)

        update(&mut service, "f1", "blue"); // revision 3
        insert(&mut service, "f2", "grey"); // revision 4
        // peer pushes a change of its own; it lands at revision 5 and
        // must never be offered back
        push(
            &mut service,
            3,
            8,
            vec![WireChange::Insert {
                id: FeatureId::new("p1"),
                values: serde_json::from_value(json!({"color": "white"})).unwrap(),
            }],
        )
        .unwrap(); // checkpoint (5, 8)

        let response = service.collect_outgoing("roads", 2).unwrap();
        assert_eq!(response.to_version, 5);

        let ids: Vec<_> = response
            .changes
            .iter()
            .map(|c| c.id().as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["f1", "f2"]);
    }

    #[test]
    fn pull_withholds_conflicting_features() {
        let mut service = service();
        insert(&mut service, "f1", "red"); // revision 1
        insert(&mut service, "f2", "grey"); // revision 2
        push(&mut service, -1, 3, vec![]).unwrap(); // checkpoint (3, 3)

        update(&mut service, "f1", "blue"); // revision 4
        update(&mut service, "f2", "green"); // revision 5

        // incoming update conflicts on f1 and clean-merges nothing
        push(
            &mut service,
            3,
            7,
            vec![wire_update("f1", json!({"color": "black"}))],
        )
        .unwrap(); // checkpoint (6, 7)

        let response = service.collect_outgoing("roads", 3).unwrap();
        let ids: Vec<_> = response
            .changes
            .iter()
            .map(|c| c.id().as_str().to_string())
            .collect();
        // f1 is in conflict and withheld; f2's genuine edit is offered
        assert_eq!(ids, vec!["f2"]);
    }

    #[test]
    fn pull_does_not_echo_clean_merged_edits() {
        let mut service = service();
        insert(&mut service, "f1", "red"); // revision 1
        push(&mut service, -1, 3, vec![]).unwrap(); // checkpoint (2, 3)

        update(&mut service, "f1", "blue"); // revision 3: local edit
        // the peer pushes the identical change; clean merge at revision 4
        push(
            &mut service,
            3,
            6,
            vec![wire_update("f1", json!({"color": "blue"}))],
        )
        .unwrap(); // checkpoint (4, 6)

        // the peer already owns that change; nothing comes back
        let response = service.collect_outgoing("roads", 2).unwrap();
        assert_eq!(response.changes, vec![]);
    }

    #[test]
    fn apply_pulled_runs_cursor_update_in_the_same_transaction() {
        let mut service = service();

        let changes = vec![WireChange::Insert {
            id: FeatureId::new("u1"),
            values: serde_json::from_value(json!({"color": "white"})).unwrap(),
        }];
        service
            .apply_pulled("roads", &changes, |_tx, applied| {
                assert_eq!(applied, Some(1));
                Ok::<_, Error>(())
            })
            .unwrap();

        // a failing closure rolls the application back too
        let more = vec![WireChange::Delete {
            id: FeatureId::new("u1"),
        }];
        let failed = service.apply_pulled("roads", &more, |_tx, _applied| {
            Err(Error::Inconsistency("cursor write failed".to_string()))
        });
        assert!(failed.is_err());
        assert!(service
            .feature("roads", &FeatureId::new("u1"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn resolve_conflict_closes_only_active_conflicts() {
        let mut service = service();
        insert(&mut service, "f1", "red");
        push(&mut service, -1, 3, vec![]).unwrap();
        update(&mut service, "f1", "blue");
        push(
            &mut service,
            3,
            6,
            vec![wire_update("f1", json!({"color": "black"}))],
        )
        .unwrap();

        service
            .resolve_conflict("roads", &FeatureId::new("f1"))
            .unwrap();
        let again = service.resolve_conflict("roads", &FeatureId::new("f1"));
        assert!(matches!(again, Err(Error::NotFound(_))));

        let records = service.list_conflicts(Some("roads")).unwrap();
        assert_eq!(records[0].state, ConflictState::Resolved);
        assert!(records[0].resolved_at.is_some());
    }

    #[test]
    fn changes_for_peer_skips_the_round_trip_window() {
        let mut service = service();
        insert(&mut service, "f1", "red"); // revision 1
        // the peer's own pulled changes were applied at revision 2
        service
            .apply_pulled(
                "roads",
                &[WireChange::Insert {
                    id: FeatureId::new("p1"),
                    values: serde_json::from_value(json!({"color": "white"})).unwrap(),
                }],
                |_tx, applied| {
                    assert_eq!(applied, Some(2));
                    Ok::<_, Error>(())
                },
            )
            .unwrap();
        insert(&mut service, "f2", "grey"); // revision 3

        // the peer acknowledged nothing yet: two windows around revision 2
        let (to_version, changes) = service.changes_for_peer("roads", -1, 2).unwrap();
        assert_eq!(to_version, 3);
        let ids: Vec<_> = changes.iter().map(|c| c.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["f1", "f2"]);

        // once the peer has acknowledged past it, a single window suffices
        let (to_version, changes) = service.changes_for_peer("roads", 2, 2).unwrap();
        assert_eq!(to_version, 3);
        let ids: Vec<_> = changes.iter().map(|c| c.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["f2"]);
    }

    #[test]
    fn malformed_values_reject_the_push() {
        let mut service = service();
        insert(&mut service, "f1", "red");
        push(&mut service, -1, 2, vec![]).unwrap();

        let unknown_attr = push(
            &mut service,
            2,
            4,
            vec![wire_update("f1", json!({"height": 3}))],
        );
        assert!(matches!(unknown_attr, Err(Error::Protocol(_))));

        let bad_value = push(
            &mut service,
            2,
            4,
            vec![wire_update("f1", json!({"lanes": [1, 2]}))],
        );
        assert!(matches!(bad_value, Err(Error::Protocol(_))));
    }
}
