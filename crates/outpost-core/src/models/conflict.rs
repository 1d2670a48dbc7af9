//! Conflict record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FeatureId, FeatureSnapshot, Revision};

/// Outcome recorded for a feature touched by an incoming changeset that
/// also had local edits since the last checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    /// Local edit collided with the incoming change; the local state was
    /// rolled back and preserved for inspection
    Conflict,
    /// Local edit and incoming change were identical; nothing to resolve
    CleanMerge,
    /// Conflict closed by an operator
    Resolved,
}

impl ConflictState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::CleanMerge => "clean_merge",
            Self::Resolved => "resolved",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "conflict" => Some(Self::Conflict),
            "clean_merge" => Some(Self::CleanMerge),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// One row per feature touched by a push exchange whose local edit collided
/// with, or exactly matched, the incoming change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub dataset: String,
    pub feature_id: FeatureId,
    /// Local revision allocated by the exchange that recorded this row
    pub local_revision: Revision,
    pub created_at: DateTime<Utc>,
    pub state: ConflictState,
    pub resolved_at: Option<DateTime<Utc>>,
    /// The rolled-back local state, kept for conflicts on still-existing
    /// features; absent for clean merges and local deletions
    pub local_snapshot: Option<FeatureSnapshot>,
}
