//! The synchronization scheduler.
//!
//! Periodically drives one full push/pull cycle for every due
//! (unit, dataset) pair. Failures are isolated per pair: a failing unit is
//! stamped for retry, flagged for monitoring, and blacklisted for the rest
//! of the run so a dead peer costs one connection timeout instead of one
//! per dataset.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use outpost_core::protocol::PushRequest;
use outpost_core::SyncService;
use tracing::{debug, info, warn};

use crate::client::UnitTransport;
use crate::cursor::{CursorStore, SqliteCursorStore, UnitCursor};
use crate::error::Result;
use crate::registry::{SqliteUnitRegistry, UnitRegistration, UnitRegistry};

/// A (unit, dataset) pair selected for synchronization
#[derive(Debug, Clone)]
pub struct DuePair {
    pub unit: UnitRegistration,
    pub dataset: String,
    pub cursor: UnitCursor,
}

/// Outcome counts of one scheduler run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Drives unit synchronizations against Central's own copy
pub struct Scheduler<T: UnitTransport> {
    service: SyncService,
    transport: T,
}

impl<T: UnitTransport> Scheduler<T> {
    pub const fn new(service: SyncService, transport: T) -> Self {
        Self { service, transport }
    }

    pub const fn service(&self) -> &SyncService {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut SyncService {
        &mut self.service
    }

    /// Run forever, starting one scheduler run per period
    pub async fn run(&mut self, period: std::time::Duration) {
        let mut timer = tokio::time::interval(period);
        loop {
            timer.tick().await;
            match self.run_once().await {
                Ok(report) => {
                    if report != RunReport::default() {
                        info!(
                            synced = report.synced,
                            failed = report.failed,
                            skipped = report.skipped,
                            "scheduler run finished"
                        );
                    }
                }
                Err(error) => warn!(%error, "scheduler run aborted"),
            }
        }
    }

    /// Select every due pair and synchronize each in turn
    pub async fn run_once(&mut self) -> Result<RunReport> {
        let due = self.due_pairs(Utc::now())?;
        if !due.is_empty() {
            debug!(pairs = due.len(), "due for synchronization");
        }

        // units that failed earlier in *this* run; deliberately a value
        // local to the run, not process-wide state
        let mut blacklist: BTreeSet<String> = BTreeSet::new();
        let mut report = RunReport::default();

        for pair in due {
            if blacklist.contains(&pair.unit.id) {
                debug!(
                    unit = %pair.unit.id,
                    dataset = %pair.dataset,
                    "unit failed earlier in this run, skipping pair"
                );
                report.skipped += 1;
                continue;
            }

            match self.sync_pair(&pair).await {
                Ok(()) => {
                    report.synced += 1;
                    let registry = SqliteUnitRegistry::new(self.service.database().connection());
                    registry.set_error_flag(&pair.unit.id, false)?;
                }
                Err(error) => {
                    warn!(
                        unit = %pair.unit.id,
                        dataset = %pair.dataset,
                        %error,
                        "synchronization failed, will retry after the retry interval"
                    );
                    report.failed += 1;
                    let conn = self.service.database().connection();
                    SqliteCursorStore::new(conn).record_failure(
                        &pair.unit.id,
                        &pair.dataset,
                        Utc::now(),
                    )?;
                    SqliteUnitRegistry::new(conn).set_error_flag(&pair.unit.id, true)?;
                    blacklist.insert(pair.unit.id.clone());
                }
            }
        }

        Ok(report)
    }

    /// Pairs due at the given instant: inside the unit's active window,
    /// past the sync interval (or never synced), and past the retry
    /// interval since the last failure. Oldest-synced pairs come first.
    pub fn due_pairs(&self, now: DateTime<Utc>) -> Result<Vec<DuePair>> {
        let conn = self.service.database().connection();
        let registry = SqliteUnitRegistry::new(conn);
        let cursors = SqliteCursorStore::new(conn);
        let datasets = self.service.list_datasets()?;

        let mut due = Vec::new();
        for unit in registry.list()? {
            if !unit.is_active_at(now) {
                continue;
            }
            for dataset in &datasets {
                let cursor = cursors.get(&unit.id, dataset)?;
                let sync_due = cursor
                    .last_sync_at
                    .is_none_or(|at| now - at > Duration::minutes(unit.sync_interval_minutes));
                let retry_ok = cursor
                    .last_failure_at
                    .is_none_or(|at| now - at > Duration::minutes(unit.retry_interval_minutes));
                if sync_due && retry_ok {
                    due.push(DuePair {
                        unit: unit.clone(),
                        dataset: dataset.clone(),
                        cursor,
                    });
                }
            }
        }

        due.sort_by_key(|pair| pair.cursor.last_sync_at);
        Ok(due)
    }

    /// One full cycle for one pair: query, push, pull, and persist the new
    /// cursor in the same transaction that applies the pulled changes
    async fn sync_pair(&mut self, pair: &DuePair) -> Result<()> {
        let DuePair {
            unit,
            dataset,
            cursor,
        } = pair;

        let acknowledged = self.transport.query_revision(unit, dataset).await?;

        let (to_version, changes) =
            self.service
                .changes_for_peer(dataset, acknowledged, cursor.last_push_revision)?;
        let pushed = changes.len();
        self.transport
            .push(
                unit,
                dataset,
                &PushRequest {
                    from_version: acknowledged,
                    to_version,
                    changes,
                },
            )
            .await?;

        let response = self
            .transport
            .pull(unit, dataset, cursor.last_pull_revision)
            .await?;
        let pulled = response.changes.len();

        let now = Utc::now();
        let mut updated = cursor.clone();
        self.service
            .apply_pulled(dataset, &response.changes, |tx, applied| {
                updated.last_sync_at = Some(now);
                updated.last_failure_at = None;
                updated.last_pull_revision = response.to_version;
                if let Some(revision) = applied {
                    updated.last_push_revision = revision;
                }
                SqliteCursorStore::new(tx).upsert(&updated)
            })?;

        info!(
            unit = %unit.id,
            dataset = %dataset,
            pushed,
            pulled,
            "synchronized pair"
        );
        Ok(())
    }
}
