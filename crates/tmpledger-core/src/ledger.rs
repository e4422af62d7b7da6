//! The owned ledger and the allocation contract
//!
//! A [`Ledger`] is the canonical owner of one ledger file on a host. It
//! holds the mapping, the allocator, and hands out scanners wired to the
//! same mapping. Remote clients never allocate against the file directly;
//! they go through a [`SlotAllocator`] and then [`ClientHandle::attach`].
//!
//! [`ClientHandle::attach`]: crate::client::ClientHandle::attach

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::allocator::IndexAllocator;
use crate::error::{LedgerError, Result};
use crate::liveness::ProcessLiveness;
use crate::mount::MountGuard;
use crate::persistence::PersistenceManager;
use crate::record::{Record, Status, BLANK, MIN_INDEX, RECORD_VERSION};
use crate::scanner::BackgroundScanner;
use crate::unix_now;

/// Default pause between allocation attempts while the ledger is full
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(120);

/// Request to reserve one slot for a target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub pid: u32,
    pub pid_create_timestamp: u64,
    pub file_path: String,
    pub caller_msg: String,
    pub delete_timestamp: Option<u64>,
}

/// A reserved slot and the ledger it lives in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub index: u32,
    pub ledger_path: PathBuf,
}

/// Anything that can reserve a slot on behalf of a client
pub trait SlotAllocator: Send + Sync {
    fn allocate(&self, request: &AllocateRequest) -> Result<Allocation>;
}

pub struct Ledger {
    persistence: Arc<PersistenceManager>,
    allocator: IndexAllocator,
}

impl Ledger {
    pub fn open_or_create(path: &Path, max_slots: u32) -> Result<Self> {
        let persistence = Arc::new(PersistenceManager::open_or_create(path, max_slots)?);
        info!(
            path = %path.display(),
            max_slots,
            occupied = count_occupied(&persistence),
            "Ledger opened"
        );
        Ok(Self {
            allocator: IndexAllocator::new(Arc::clone(&persistence)),
            persistence,
        })
    }

    /// Open an existing ledger, taking its slot count from the file size.
    pub fn open(path: &Path) -> Result<Self> {
        let persistence = Arc::new(PersistenceManager::open(path)?);
        Ok(Self {
            allocator: IndexAllocator::new(Arc::clone(&persistence)),
            persistence,
        })
    }

    pub fn path(&self) -> &Path {
        self.persistence.path()
    }

    pub fn max_slots(&self) -> u32 {
        self.persistence.max_slots()
    }

    pub fn persistence(&self) -> &Arc<PersistenceManager> {
        &self.persistence
    }

    /// A scanner sharing this ledger's mapping.
    pub fn scanner(&self, liveness: impl ProcessLiveness + 'static, mounts: MountGuard) -> BackgroundScanner {
        BackgroundScanner::new(Arc::clone(&self.persistence), liveness, mounts)
    }

    /// Number of occupied slots
    pub fn occupancy(&self) -> usize {
        count_occupied(&self.persistence)
    }

    /// All decodable occupied records, in slot order. Slots that fail to
    /// decode are logged and left out.
    pub fn records(&self) -> Vec<Record> {
        let mut records = Vec::new();
        for index in MIN_INDEX..=self.persistence.max_index() {
            let bytes = match self.persistence.read(index) {
                Ok(bytes) if bytes[0] != BLANK => bytes,
                Ok(_) => continue,
                Err(e) => {
                    warn!(index, error = %e, "Failed to read slot");
                    continue;
                }
            };
            match Record::decode(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(index, error = %e, "Skipping undecodable slot"),
            }
        }
        records
    }
}

impl SlotAllocator for Ledger {
    fn allocate(&self, request: &AllocateRequest) -> Result<Allocation> {
        let create_timestamp = unix_now();
        let index = self.allocator.allocate(|index| {
            Record {
                index,
                version: RECORD_VERSION.to_string(),
                status: Status::Unknown,
                create_timestamp,
                change_timestamp: None,
                delete_timestamp: request.delete_timestamp,
                pid: request.pid,
                pid_create_timestamp: request.pid_create_timestamp,
                file_path: request.file_path.clone(),
                caller_msg: request.caller_msg.clone(),
            }
            .encode()
        })?;

        Ok(Allocation {
            index,
            ledger_path: self.persistence.path().to_path_buf(),
        })
    }
}

impl<A: SlotAllocator + ?Sized> SlotAllocator for Arc<A> {
    fn allocate(&self, request: &AllocateRequest) -> Result<Allocation> {
        (**self).allocate(request)
    }
}

/// Allocate, sleeping `backoff` after every `PoolExhausted` and retrying
/// until a slot frees up. Any other error is returned immediately. Drop the
/// future to give up.
pub async fn allocate_with_backoff<A>(
    allocator: &A,
    request: &AllocateRequest,
    backoff: Duration,
) -> Result<Allocation>
where
    A: SlotAllocator + ?Sized,
{
    retry_while_full(request, backoff, || std::future::ready(allocator.allocate(request))).await
}

/// Like [`allocate_with_backoff`], but every attempt runs on the blocking
/// pool so a long probe scan never stalls an async worker thread.
pub async fn spawn_allocate_with_backoff<A>(
    allocator: Arc<A>,
    request: AllocateRequest,
    backoff: Duration,
) -> Result<Allocation>
where
    A: SlotAllocator + ?Sized + 'static,
{
    retry_while_full(&request, backoff, || {
        let allocator = Arc::clone(&allocator);
        let request = request.clone();
        async move {
            match tokio::task::spawn_blocking(move || allocator.allocate(&request)).await {
                Ok(result) => result,
                Err(e) => Err(LedgerError::TaskFailed(e.to_string())),
            }
        }
    })
    .await
}

async fn retry_while_full<F, Fut>(
    request: &AllocateRequest,
    backoff: Duration,
    mut attempt: F,
) -> Result<Allocation>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Allocation>>,
{
    loop {
        match attempt().await {
            Err(e) if e.is_retryable() => {
                warn!(
                    file = %request.file_path,
                    backoff_secs = backoff.as_secs_f64(),
                    "Ledger full, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

fn count_occupied(persistence: &PersistenceManager) -> usize {
    (MIN_INDEX..=persistence.max_index())
        .filter(|&i| matches!(persistence.is_empty(i), Ok(false)))
        .count()
}
