//! The atomic unit of a diff: one net change to one feature

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{FeatureId, FeatureSnapshot};

/// Classification of a change, as persisted in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inserted" => Some(Self::Inserted),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One change to one feature between two revisions.
///
/// Produced by the versioned store; immutable once produced. Each variant
/// carries only the snapshots that exist for it: an insert has no
/// before-state, a delete has no after-state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureChange {
    Inserted {
        id: FeatureId,
        feature: FeatureSnapshot,
    },
    Updated {
        id: FeatureId,
        before: FeatureSnapshot,
        after: FeatureSnapshot,
    },
    Deleted {
        id: FeatureId,
        before: FeatureSnapshot,
    },
}

impl FeatureChange {
    #[must_use]
    pub const fn id(&self) -> &FeatureId {
        match self {
            Self::Inserted { id, .. } | Self::Updated { id, .. } | Self::Deleted { id, .. } => id,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Inserted { .. } => ChangeKind::Inserted,
            Self::Updated { .. } => ChangeKind::Updated,
            Self::Deleted { .. } => ChangeKind::Deleted,
        }
    }

    /// Feature state before this change, if the feature existed
    #[must_use]
    pub const fn before(&self) -> Option<&FeatureSnapshot> {
        match self {
            Self::Inserted { .. } => None,
            Self::Updated { before, .. } | Self::Deleted { before, .. } => Some(before),
        }
    }

    /// Feature state after this change, if the feature still exists
    #[must_use]
    pub const fn after(&self) -> Option<&FeatureSnapshot> {
        match self {
            Self::Inserted { feature, .. } => Some(feature),
            Self::Updated { after, .. } => Some(after),
            Self::Deleted { .. } => None,
        }
    }

    /// Attributes whose values differ between before and after.
    ///
    /// Empty for inserts and deletes, where the whole feature appears or
    /// disappears rather than individual attributes changing.
    #[must_use]
    pub fn changed_attributes(&self) -> BTreeSet<String> {
        match self {
            Self::Updated { before, after, .. } => before.changed_attributes(after),
            _ => BTreeSet::new(),
        }
    }

    /// Build the net change between two endpoint states.
    ///
    /// Returns `None` when the endpoints describe no observable change:
    /// absent on both sides, or value-identical snapshots.
    #[must_use]
    pub fn from_endpoints(
        id: FeatureId,
        from: Option<FeatureSnapshot>,
        to: Option<FeatureSnapshot>,
    ) -> Option<Self> {
        match (from, to) {
            (None, None) => None,
            (None, Some(feature)) => Some(Self::Inserted { id, feature }),
            (Some(before), None) => Some(Self::Deleted { id, before }),
            (Some(before), Some(after)) => {
                if before == after {
                    None
                } else {
                    Some(Self::Updated { id, before, after })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::AttrValue;
    use super::*;

    fn snapshot(color: &str) -> FeatureSnapshot {
        [("color".to_string(), AttrValue::Text(color.into()))]
            .into_iter()
            .collect()
    }

    #[test]
    fn endpoints_classify_kinds() {
        let id = FeatureId::new("f1");
        let insert = FeatureChange::from_endpoints(id.clone(), None, Some(snapshot("red")));
        assert_eq!(insert.unwrap().kind(), ChangeKind::Inserted);

        let delete = FeatureChange::from_endpoints(id.clone(), Some(snapshot("red")), None);
        assert_eq!(delete.unwrap().kind(), ChangeKind::Deleted);

        let update =
            FeatureChange::from_endpoints(id, Some(snapshot("red")), Some(snapshot("blue")));
        assert_eq!(update.unwrap().kind(), ChangeKind::Updated);
    }

    #[test]
    fn identical_endpoints_are_dropped() {
        let id = FeatureId::new("f1");
        assert_eq!(FeatureChange::from_endpoints(id.clone(), None, None), None);
        assert_eq!(
            FeatureChange::from_endpoints(id, Some(snapshot("red")), Some(snapshot("red"))),
            None
        );
    }

    #[test]
    fn changed_attributes_of_update() {
        let change = FeatureChange::Updated {
            id: FeatureId::new("f1"),
            before: snapshot("red"),
            after: snapshot("blue"),
        };
        assert_eq!(
            change.changed_attributes().into_iter().collect::<Vec<_>>(),
            vec!["color"]
        );
    }
}
