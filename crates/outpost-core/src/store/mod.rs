//! The narrow contract against the versioned feature store.
//!
//! The synchronization engine consumes the store exclusively through
//! [`StoreTx`]; one instance covers one dataset for the duration of one
//! exchange. Allocating a revision takes the dataset's write lock, which
//! serves as the only mutual-exclusion primitive between concurrent
//! writers and sync exchanges.

mod sqlite;

use std::collections::BTreeSet;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::{DatasetSchema, FeatureChange, FeatureId, FeatureSnapshot, Revision};

/// A half-open revision window `(from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionWindow {
    pub from: Revision,
    pub to: Revision,
}

impl RevisionWindow {
    #[must_use]
    pub const fn new(from: Revision, to: Revision) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.to <= self.from
    }
}

/// Restricts a change stream to a subset of feature ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdFilter {
    All,
    Only(BTreeSet<FeatureId>),
    Excluding(BTreeSet<FeatureId>),
}

impl IdFilter {
    #[must_use]
    pub fn matches(&self, id: &FeatureId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(id),
            Self::Excluding(ids) => !ids.contains(id),
        }
    }
}

/// A lazy, single-pass sequence of net changes in ascending feature-id
/// order.
///
/// Implementations release their underlying resources on [`close`]; a
/// stream must be closed exactly once, either on exhaustion or when the
/// consumer abandons it early.
///
/// [`close`]: ChangeStream::close
pub trait ChangeStream {
    /// The next change, or `None` once the stream is exhausted
    fn next_change(&mut self) -> Result<Option<FeatureChange>>;

    /// Release underlying resources; further calls yield nothing
    fn close(&mut self);
}

/// Transaction-scoped operations on the versioned store for one dataset.
///
/// All mutations become visible together when the surrounding database
/// transaction commits, and disappear together when it rolls back.
pub trait StoreTx {
    type Stream: ChangeStream;

    /// Dataset this transaction covers
    fn dataset(&self) -> &str;

    /// Declared attribute schema of the dataset
    fn schema(&self) -> &DatasetSchema;

    /// The latest committed (or allocated-within-this-transaction) revision
    fn current_revision(&self) -> Result<Revision>;

    /// Allocate the next revision number, tagging it with commit metadata.
    ///
    /// Blocks any concurrent allocation on the same dataset until the
    /// surrounding transaction commits or rolls back.
    fn allocate_revision(&mut self, author: &str, message: &str) -> Result<Revision>;

    /// Whether any change was committed after the given revision
    fn has_changes_since(&self, revision: Revision) -> Result<bool>;

    /// Net changes within a revision window, one record per feature,
    /// ordered by feature id
    fn changes(&self, window: RevisionWindow, filter: &IdFilter) -> Result<Self::Stream>;

    /// Current state of a feature, if it exists
    fn feature(&self, id: &FeatureId) -> Result<Option<FeatureSnapshot>>;

    /// Restore a feature to its state as of the given revision. The
    /// restoring write is itself recorded at the currently allocated
    /// revision.
    fn rollback_feature(&mut self, to: Revision, id: &FeatureId) -> Result<()>;

    /// Record a change at the currently allocated revision
    fn apply(&mut self, change: &FeatureChange) -> Result<()>;
}
