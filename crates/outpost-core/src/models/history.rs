//! Synchronization checkpoint model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Revision;

/// A recorded correspondence between a local revision and the peer's
/// revision at the moment of a completed sync exchange.
///
/// Entries are append-only. For one dataset they are ordered by
/// `local_revision`; several entries may share a local revision when a
/// no-op exchange advanced the peer revision without consuming a local one,
/// in which case the higher `peer_revision` is the more recent entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub dataset: String,
    pub local_revision: Revision,
    pub peer_revision: Revision,
    /// Recording timestamp (informational only; ordering uses revisions)
    pub created_at: DateTime<Utc>,
}
