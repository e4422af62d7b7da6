//! tmpledger core: a crash-safe ledger of temporary files awaiting deletion
//!
//! Processes that create shared scratch files register each one in a
//! fixed-size, memory-mapped ledger before producing it. When they are done
//! they either cancel (keep the file) or confirm (delete it after a delay).
//! A single background scanner per host reclaims confirmed files once due,
//! and files whose owner died without deciding.
//!
//! # Architecture
//!
//! ```text
//!  client process                    ledger host
//! ┌──────────────┐  allocate  ┌──────────────────────────┐
//! │ ClientHandle │───────────▶│ Ledger ── IndexAllocator │
//! │  (own slot)  │            │    │                     │
//! └──────┬───────┘            │    ▼                     │
//!        │ cancel/confirm     │ PersistenceManager (mmap)│
//!        └───────────────────▶│    ▲                     │
//!                             │ BackgroundScanner        │
//!                             │   └─ ReclaimWorker       │
//!                             └──────────────────────────┘
//! ```

pub mod allocator;
pub mod client;
pub mod error;
pub mod ledger;
pub mod liveness;
pub mod mount;
pub mod persistence;
pub mod reclaim;
pub mod record;
pub mod scanner;

pub use client::ClientHandle;
pub use error::{LedgerError, Result};
pub use ledger::{allocate_with_backoff, spawn_allocate_with_backoff, AllocateRequest, Allocation, Ledger, SlotAllocator, DEFAULT_BACKOFF};
pub use liveness::{current_process_identity, ProcessLiveness, SystemLiveness};
pub use mount::{MountGuard, MountTable, PathInMount, SystemMounts, UnmountedPolicy, DEFAULT_MOUNT_ROOT};
pub use persistence::PersistenceManager;
pub use record::{Record, Status, DEFAULT_MAX_SLOTS, SLOT_SIZE};
pub use scanner::{BackgroundScanner, ScanReport, DEFAULT_SCAN_PERIOD};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
