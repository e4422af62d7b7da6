//! Periodic ledger sweep
//!
//! One scanner per host walks every slot from `MIN_INDEX` to `max_index` on
//! each cycle and hands occupied slots to a [`ReclaimWorker`]. A failure on
//! one slot is logged and the sweep moves on; no scan position survives
//! between cycles.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::liveness::ProcessLiveness;
use crate::mount::MountGuard;
use crate::persistence::PersistenceManager;
use crate::reclaim::{Outcome, ReclaimWorker};
use crate::record::{Record, BLANK, MIN_INDEX};
use crate::unix_now;

/// Default pause between sweeps
pub const DEFAULT_SCAN_PERIOD: Duration = Duration::from_secs(120);

/// Tally of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub occupied: usize,
    pub erased: usize,
    pub reclaimed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub kept: usize,
    pub errors: usize,
}

impl ScanReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Erased => self.erased += 1,
            Outcome::Reclaimed => self.reclaimed += 1,
            Outcome::SkippedUnmounted => self.skipped += 1,
            Outcome::DeleteFailed => self.failed += 1,
            Outcome::Kept => self.kept += 1,
        }
    }
}

pub struct BackgroundScanner {
    persistence: Arc<PersistenceManager>,
    liveness: Box<dyn ProcessLiveness>,
    mounts: MountGuard,
}

impl BackgroundScanner {
    pub fn new(
        persistence: Arc<PersistenceManager>,
        liveness: impl ProcessLiveness + 'static,
        mounts: MountGuard,
    ) -> Self {
        Self {
            persistence,
            liveness: Box::new(liveness),
            mounts,
        }
    }

    /// One full sweep at the current time.
    pub fn scan_once(&self) -> ScanReport {
        self.scan_at(unix_now())
    }

    /// One full sweep, treating `now` as the current unix time.
    pub fn scan_at(&self, now: u64) -> ScanReport {
        let worker = ReclaimWorker::new(&self.persistence, self.liveness.as_ref(), &self.mounts);
        let mut report = ScanReport::default();

        for index in MIN_INDEX..=self.persistence.max_index() {
            match self.process_slot(&worker, index, now) {
                Ok(Some(outcome)) => {
                    report.occupied += 1;
                    report.record(outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    report.occupied += 1;
                    report.errors += 1;
                    error!(index, error = %e, "Failed to process slot");
                }
            }
        }

        report
    }

    fn process_slot(&self, worker: &ReclaimWorker<'_>, index: u32, now: u64) -> Result<Option<Outcome>> {
        let bytes = self.persistence.read(index)?;
        if bytes[0] == BLANK {
            return Ok(None);
        }
        let record = Record::decode(&bytes)?;
        worker.process(index, &record, now).map(Some)
    }

    /// Sweep every `period` until `shutdown` flips to true or its sender is dropped.
    /// The first sweep starts immediately.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_secs = period.as_secs(),
            slots = self.persistence.max_slots(),
            "Background scanner started"
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Background scanner stopping");
                        return;
                    }
                    continue;
                }
            }

            debug!("Starting ledger sweep");
            let scanner = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || scanner.scan_once()).await {
                Ok(report) => {
                    if report.errors > 0 || report.failed > 0 {
                        warn!(?report, "Ledger sweep finished with failures");
                    } else {
                        debug!(?report, "Ledger sweep finished");
                    }
                }
                Err(e) => error!(error = %e, "Ledger sweep aborted"),
            }
        }
    }
}
