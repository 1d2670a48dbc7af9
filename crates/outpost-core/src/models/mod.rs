//! Data models for Outpost

mod change;
mod conflict;
mod feature;
mod history;

pub use change::{ChangeKind, FeatureChange};
pub use conflict::{ConflictRecord, ConflictState};
pub use feature::{AttrValue, AttributeType, DatasetSchema, FeatureId, FeatureSnapshot};
pub use history::HistoryEntry;

/// A committed state of a dataset, identified by a monotonically
/// increasing integer.
pub type Revision = i64;

/// Sentinel revision meaning "never synchronized".
pub const UNKNOWN_REVISION: Revision = -1;
