//! Revision and history tracking.
//!
//! Anchors every sync exchange: which peer revision was last acknowledged,
//! and which local revision windows hold genuine local edits as opposed to
//! peer-originated changes that already round-tripped through here.

use chrono::Utc;

use crate::db::HistoryLog;
use crate::error::Result;
use crate::models::{HistoryEntry, Revision};
use crate::store::RevisionWindow;

/// A pull window paired with the checkpoint that closes it. Clean merges
/// recorded at that checkpoint are excluded from the window's diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullWindow {
    pub window: RevisionWindow,
    pub checkpoint: Revision,
}

/// Checkpoint bookkeeping over a [`HistoryLog`]
pub struct RevisionTracker<'a, L: HistoryLog> {
    log: &'a L,
}

impl<'a, L: HistoryLog> RevisionTracker<'a, L> {
    pub const fn new(log: &'a L) -> Self {
        Self { log }
    }

    /// The most recent checkpoint for a dataset, if any exchange completed
    pub fn last_checkpoint(&self, dataset: &str) -> Result<Option<HistoryEntry>> {
        self.log.last(dataset)
    }

    /// Checkpoints with a local revision above the given one, ascending
    pub fn checkpoints_after(&self, dataset: &str, revision: Revision) -> Result<Vec<HistoryEntry>> {
        self.log.entries_after(dataset, revision)
    }

    /// Record a completed exchange.
    ///
    /// Skips the append when an identical checkpoint already heads the
    /// log, so repeated no-op exchanges do not grow it. Returns whether an
    /// entry was written.
    pub fn record(&self, dataset: &str, local: Revision, peer: Revision) -> Result<bool> {
        if let Some(last) = self.log.last(dataset)? {
            if last.local_revision == local && last.peer_revision == peer {
                return Ok(false);
            }
        }
        self.log.append(&HistoryEntry {
            dataset: dataset.to_string(),
            local_revision: local,
            peer_revision: peer,
            created_at: Utc::now(),
        })?;
        Ok(true)
    }

    /// Revision windows holding genuine local edits since `from`.
    ///
    /// Taking the checkpoint revisions after `from` pair-wise yields the
    /// windows to diff; each window stops one revision short of the next
    /// checkpoint so the peer-originated changes committed at the
    /// checkpoint itself are skipped. Checkpoints sharing a local revision
    /// (no-op exchanges) collapse into one boundary, and empty windows
    /// between adjacent revisions are dropped.
    pub fn pull_windows(&self, dataset: &str, from: Revision) -> Result<Vec<PullWindow>> {
        let mut boundaries = vec![from];
        for entry in self.checkpoints_after(dataset, from)? {
            if entry.local_revision != *boundaries.last().unwrap_or(&from) {
                boundaries.push(entry.local_revision);
            }
        }

        let windows = boundaries
            .windows(2)
            .map(|pair| PullWindow {
                window: RevisionWindow::new(pair[0], pair[1] - 1),
                checkpoint: pair[1],
            })
            .filter(|w| !w.window.is_empty())
            .collect();
        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::db::{Database, SqliteHistoryLog};

    use super::*;

    #[test]
    fn record_skips_identical_checkpoints() {
        let db = Database::open_in_memory().unwrap();
        let log = SqliteHistoryLog::new(db.connection());
        let tracker = RevisionTracker::new(&log);

        assert!(tracker.record("roads", 4, 10).unwrap());
        assert!(!tracker.record("roads", 4, 10).unwrap());
        assert!(tracker.record("roads", 4, 12).unwrap());

        let last = tracker.last_checkpoint("roads").unwrap().unwrap();
        assert_eq!((last.local_revision, last.peer_revision), (4, 12));
    }

    #[test]
    fn pull_windows_skip_checkpoint_revisions() {
        let db = Database::open_in_memory().unwrap();
        let log = SqliteHistoryLog::new(db.connection());
        let tracker = RevisionTracker::new(&log);

        tracker.record("roads", 8, 2).unwrap();
        tracker.record("roads", 13, 5).unwrap();

        let windows = tracker.pull_windows("roads", 5).unwrap();
        assert_eq!(
            windows,
            vec![
                PullWindow {
                    window: RevisionWindow::new(5, 7),
                    checkpoint: 8
                },
                PullWindow {
                    window: RevisionWindow::new(8, 12),
                    checkpoint: 13
                },
            ]
        );
    }

    #[test]
    fn pull_windows_collapse_duplicate_boundaries() {
        let db = Database::open_in_memory().unwrap();
        let log = SqliteHistoryLog::new(db.connection());
        let tracker = RevisionTracker::new(&log);

        // a no-op exchange re-records local revision 8 with a newer peer
        // revision
        tracker.record("roads", 8, 2).unwrap();
        tracker.record("roads", 8, 6).unwrap();

        let windows = tracker.pull_windows("roads", 5).unwrap();
        assert_eq!(
            windows,
            vec![PullWindow {
                window: RevisionWindow::new(5, 7),
                checkpoint: 8
            }]
        );
    }

    #[test]
    fn pull_windows_drop_empty_gaps() {
        let db = Database::open_in_memory().unwrap();
        let log = SqliteHistoryLog::new(db.connection());
        let tracker = RevisionTracker::new(&log);

        // adjacent checkpoint revisions leave no room for local edits
        tracker.record("roads", 6, 2).unwrap();
        tracker.record("roads", 7, 3).unwrap();

        assert_eq!(tracker.pull_windows("roads", 5).unwrap(), vec![]);
    }

    #[test]
    fn no_checkpoints_means_no_windows() {
        let db = Database::open_in_memory().unwrap();
        let log = SqliteHistoryLog::new(db.connection());
        let tracker = RevisionTracker::new(&log);

        assert_eq!(tracker.pull_windows("roads", 5).unwrap(), vec![]);
    }
}
