//! Wire protocol payloads for the peer-facing RPC surface.
//!
//! Values travel as raw JSON and are converted to the target attribute's
//! declared type on receipt; updates carry only the changed attributes,
//! deletes only the feature id.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::conflict::IncomingChanges;
use crate::models::{AttrValue, FeatureChange, FeatureId, Revision};

/// One change on the wire, tagged by operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WireChange {
    Insert {
        id: FeatureId,
        values: BTreeMap<String, serde_json::Value>,
    },
    Update {
        id: FeatureId,
        values: BTreeMap<String, serde_json::Value>,
    },
    Delete {
        id: FeatureId,
    },
}

impl WireChange {
    #[must_use]
    pub const fn id(&self) -> &FeatureId {
        match self {
            Self::Insert { id, .. } | Self::Update { id, .. } | Self::Delete { id } => id,
        }
    }

    /// Translate a net change into its wire form
    #[must_use]
    pub fn from_change(change: &FeatureChange) -> Self {
        match change {
            FeatureChange::Inserted { id, feature } => Self::Insert {
                id: id.clone(),
                values: feature
                    .values()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            },
            FeatureChange::Updated { id, after, .. } => Self::Update {
                id: id.clone(),
                values: change
                    .changed_attributes()
                    .into_iter()
                    .map(|name| {
                        let value = after
                            .value(&name)
                            .map_or(serde_json::Value::Null, AttrValue::to_json);
                        (name, value)
                    })
                    .collect(),
            },
            FeatureChange::Deleted { id, .. } => Self::Delete { id: id.clone() },
        }
    }
}

/// Response to a revision query
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RevisionResponse {
    /// Last peer revision acknowledged for the dataset, `-1` if never
    /// synced
    pub revision: Revision,
}

/// A peer pushing its changes into this side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub from_version: Revision,
    pub to_version: Revision,
    pub changes: Vec<WireChange>,
}

impl PushRequest {
    /// The delete/update surface the conflict detector works against
    #[must_use]
    pub fn incoming(&self) -> IncomingChanges {
        let mut updates = BTreeMap::new();
        let mut deletes = BTreeSet::new();
        for change in &self.changes {
            match change {
                WireChange::Update { id, values } => {
                    updates.insert(id.clone(), values.clone());
                }
                WireChange::Delete { id } => {
                    deletes.insert(id.clone());
                }
                WireChange::Insert { .. } => {}
            }
        }
        IncomingChanges::new(updates, deletes)
    }
}

/// A peer asking for this side's local edits since a revision
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PullRequest {
    pub from_version: Revision,
}

/// The collected local edits, net-folded per feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    /// Echo of the requested starting revision
    pub from_version: Revision,
    /// Local revision of the last checkpoint; the peer records it as its
    /// pull cursor
    pub to_version: Revision,
    pub changes: Vec<WireChange>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::models::{AttrValue, FeatureSnapshot};

    use super::*;

    #[test]
    fn wire_change_round_trips_with_op_tag() {
        let change = WireChange::Update {
            id: FeatureId::new("f1"),
            values: std::iter::once(("color".to_string(), json!("blue"))).collect(),
        };
        let raw = serde_json::to_value(&change).unwrap();
        assert_eq!(raw["op"], "update");
        assert_eq!(serde_json::from_value::<WireChange>(raw).unwrap(), change);
    }

    #[test]
    fn updates_carry_only_changed_attributes() {
        let before: FeatureSnapshot = [
            ("color".to_string(), AttrValue::Text("red".into())),
            ("lanes".to_string(), AttrValue::Integer(2)),
        ]
        .into_iter()
        .collect();
        let after: FeatureSnapshot = [
            ("color".to_string(), AttrValue::Text("blue".into())),
            ("lanes".to_string(), AttrValue::Integer(2)),
        ]
        .into_iter()
        .collect();

        let wire = WireChange::from_change(&FeatureChange::Updated {
            id: FeatureId::new("f1"),
            before,
            after,
        });
        match wire {
            WireChange::Update { values, .. } => {
                assert_eq!(values.len(), 1);
                assert_eq!(values["color"], json!("blue"));
            }
            other => panic!("unexpected wire change {other:?}"),
        }
    }

    #[test]
    fn push_request_splits_updates_and_deletes() {
        let request = PushRequest {
            from_version: 1,
            to_version: 4,
            changes: vec![
                WireChange::Insert {
                    id: FeatureId::new("f0"),
                    values: BTreeMap::new(),
                },
                WireChange::Update {
                    id: FeatureId::new("f1"),
                    values: BTreeMap::new(),
                },
                WireChange::Delete {
                    id: FeatureId::new("f2"),
                },
            ],
        };
        let incoming = request.incoming();
        // inserts never participate in conflict detection
        assert_eq!(
            incoming.touched_ids(),
            [FeatureId::new("f1"), FeatureId::new("f2")].into_iter().collect()
        );
    }
}
