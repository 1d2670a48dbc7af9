//! Conflict detection and resolution.
//!
//! Runs once per push exchange, after the revision preconditions hold:
//! every feature edited locally since the last checkpoint that is also
//! touched by the incoming changeset is classified as a clean merge or a
//! conflict, and conflicting local edits are rolled back so the incoming
//! changes have their expected base to apply against.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, info};

use crate::db::ConflictLog;
use crate::error::{Error, Result};
use crate::models::{
    AttrValue, ConflictRecord, ConflictState, DatasetSchema, FeatureChange, FeatureId,
    FeatureSnapshot, Revision,
};
use crate::store::{ChangeStream, IdFilter, RevisionWindow, StoreTx};

/// The delete/update surface of an incoming changeset, keyed by feature
/// id. Inserts are absent: a remote insert colliding with a local edit can
/// only mean broken id generation and is caught separately.
#[derive(Debug, Default)]
pub struct IncomingChanges {
    updates: BTreeMap<FeatureId, BTreeMap<String, serde_json::Value>>,
    deletes: BTreeSet<FeatureId>,
}

impl IncomingChanges {
    #[must_use]
    pub fn new(
        updates: BTreeMap<FeatureId, BTreeMap<String, serde_json::Value>>,
        deletes: BTreeSet<FeatureId>,
    ) -> Self {
        Self { updates, deletes }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Every feature id the incoming changeset updates or deletes
    #[must_use]
    pub fn touched_ids(&self) -> BTreeSet<FeatureId> {
        self.updates
            .keys()
            .chain(self.deletes.iter())
            .cloned()
            .collect()
    }
}

/// Classify and absorb local edits colliding with an incoming changeset.
///
/// `checkpoint` is the local revision of the last checkpoint (`-1` when
/// none exists) and the rollback target for conflicting features;
/// `new_revision` is the revision allocated for this exchange, under which
/// all conflict records and rollback writes are filed.
pub fn resolve_incoming<S: StoreTx>(
    store: &mut S,
    conflicts: &impl ConflictLog,
    checkpoint: Revision,
    new_revision: Revision,
    incoming: &IncomingChanges,
) -> Result<()> {
    if incoming.is_empty() {
        return Ok(());
    }

    let filter = IdFilter::Only(incoming.touched_ids());
    let mut local_changes = store.changes(RevisionWindow::new(checkpoint, new_revision), &filter)?;

    while let Some(local) = local_changes.next_change()? {
        let id = local.id().clone();
        match &local {
            FeatureChange::Inserted { .. } => {
                local_changes.close();
                return Err(Error::Inconsistency(format!(
                    "feature '{id}' was inserted locally but is also targeted by an \
                     incoming change; ids can never collide this way unless id \
                     generation is broken or the data was tampered with"
                )));
            }
            FeatureChange::Deleted { .. } => {
                if incoming.deletes.contains(&id) {
                    // both sides deleted it; nothing to roll back
                    record_outcome(conflicts, store, new_revision, &id, ConflictState::CleanMerge, None)?;
                } else {
                    debug!(feature = %id, "local deletion conflicts with incoming update");
                    record_outcome(conflicts, store, new_revision, &id, ConflictState::Conflict, None)?;
                    store.rollback_feature(checkpoint, &id)?;
                }
            }
            FeatureChange::Updated { .. } => {
                let matches = incoming
                    .updates
                    .get(&id)
                    .is_some_and(|values| same_update(store.schema(), &local, values));
                if matches {
                    record_outcome(conflicts, store, new_revision, &id, ConflictState::CleanMerge, None)?;
                } else {
                    debug!(feature = %id, "local update conflicts with incoming change");
                    let snapshot = store.feature(&id)?;
                    record_outcome(
                        conflicts,
                        store,
                        new_revision,
                        &id,
                        ConflictState::Conflict,
                        snapshot,
                    )?;
                    store.rollback_feature(checkpoint, &id)?;
                }
            }
        }
    }

    Ok(())
}

fn record_outcome<S: StoreTx>(
    conflicts: &impl ConflictLog,
    store: &S,
    new_revision: Revision,
    id: &FeatureId,
    state: ConflictState,
    local_snapshot: Option<FeatureSnapshot>,
) -> Result<()> {
    if state == ConflictState::Conflict {
        info!(dataset = store.dataset(), feature = %id, "recording conflict");
    }
    conflicts.record(&ConflictRecord {
        dataset: store.dataset().to_string(),
        feature_id: id.clone(),
        local_revision: new_revision,
        created_at: Utc::now(),
        state,
        resolved_at: None,
        local_snapshot,
    })
}

/// Whether the incoming update would set exactly the values the local edit
/// already set.
///
/// Raw incoming values are converted to the attribute's declared type
/// before comparison; a failed conversion means "not equal", since
/// treating it as equal could silently discard a real conflict.
fn same_update(
    schema: &DatasetSchema,
    local: &FeatureChange,
    incoming: &BTreeMap<String, serde_json::Value>,
) -> bool {
    let changed = local.changed_attributes();
    let Some(after) = local.after() else {
        return false;
    };
    if incoming.len() != changed.len() {
        return false;
    }

    for (name, raw) in incoming {
        if !changed.contains(name) {
            return false;
        }
        let Some(coerced) = schema.attribute(name).and_then(|ty| ty.coerce(raw)) else {
            return false;
        };
        let local_value = after.value(name).cloned().unwrap_or(AttrValue::Null);
        if local_value != coerced {
            return false;
        }
    }

    true
}
