//! Per-slot reclamation state machine
//!
//! | status | condition                    | action                       |
//! |--------|------------------------------|------------------------------|
//! | `n`    | always                       | erase slot, keep file        |
//! | `y`    | `now >= delete_timestamp`    | delete file, erase on success|
//! | `u`    | owner `(pid, start)` is gone | delete file, erase on success|
//! | other  |                              | nothing this pass            |
//!
//! Deletions under a detached mount point are skipped without touching
//! the file or the record.

use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::liveness::ProcessLiveness;
use crate::mount::MountGuard;
use crate::persistence::PersistenceManager;
use crate::record::{Record, Status};

/// Why a target file is due for deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    /// Owner confirmed and the delay has elapsed
    Due,
    /// Owner never decided and is no longer running
    OwnerGone,
}

/// What the scanner should do with one occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Owner cancelled: drop the record only
    EraseOnly,
    /// Delete the target, then erase the record if that succeeded
    Delete(DeleteReason),
    /// Not reclaimable yet
    Keep,
}

/// Result of processing one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Record erased, file kept
    Erased,
    /// File deleted (or already absent) and record erased
    Reclaimed,
    /// Target under a detached mount point; untouched
    SkippedUnmounted,
    /// Deletion failed; record kept for the next pass
    DeleteFailed,
    /// Nothing to do yet
    Kept,
}

pub struct ReclaimWorker<'a> {
    persistence: &'a PersistenceManager,
    liveness: &'a dyn ProcessLiveness,
    mounts: &'a MountGuard,
}

impl<'a> ReclaimWorker<'a> {
    pub fn new(
        persistence: &'a PersistenceManager,
        liveness: &'a dyn ProcessLiveness,
        mounts: &'a MountGuard,
    ) -> Self {
        Self {
            persistence,
            liveness,
            mounts,
        }
    }

    /// Pure decision for one record at time `now` (unix seconds).
    pub fn decide(&self, record: &Record, now: u64) -> Decision {
        match record.status {
            Status::NotDelete => Decision::EraseOnly,
            Status::WaitDelete => match record.delete_timestamp {
                Some(due) if now >= due => Decision::Delete(DeleteReason::Due),
                _ => Decision::Keep,
            },
            Status::Unknown => {
                if self
                    .liveness
                    .is_alive(record.pid, record.pid_create_timestamp)
                {
                    Decision::Keep
                } else {
                    Decision::Delete(DeleteReason::OwnerGone)
                }
            }
        }
    }

    /// Decide and act on the record stored in `slot`.
    pub fn process(&self, slot: u32, record: &Record, now: u64) -> Result<Outcome> {
        if record.index != slot {
            return Err(LedgerError::MisroutedRecord {
                slot,
                claimed: record.index,
            });
        }

        match self.decide(record, now) {
            Decision::Keep => Ok(Outcome::Kept),
            Decision::EraseOnly => {
                info!(index = slot, path = %record.file_path, "Deletion cancelled, erasing record");
                self.persistence.erase(slot)?;
                Ok(Outcome::Erased)
            }
            Decision::Delete(reason) => {
                let path = Path::new(&record.file_path);
                if self.mounts.should_skip(path) {
                    debug!(index = slot, path = %path.display(), "Target under unmounted mount point, skipping");
                    return Ok(Outcome::SkippedUnmounted);
                }

                info!(index = slot, path = %path.display(), ?reason, "Target due for deletion");
                match delete_target(path) {
                    Ok(()) => {
                        self.persistence.erase(slot)?;
                        info!(index = slot, path = %path.display(), "Target deleted, record erased");
                        Ok(Outcome::Reclaimed)
                    }
                    Err(e) => {
                        warn!(index = slot, path = %path.display(), error = %e, "Failed to delete target");
                        Ok(Outcome::DeleteFailed)
                    }
                }
            }
        }
    }
}

/// Remove a file, or a directory recursively. An absent target counts as removed.
pub fn delete_target(path: &Path) -> io::Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
