//! Free-slot allocation
//!
//! Slots are handed out round-robin from a rotating pointer instead of
//! lowest-index-first, spreading reuse evenly across the ledger. A scan gives
//! up after `MAX_SCAN_ROUNDS * max_slots` probes.

use std::sync::{Arc, Mutex};
use tracing::{debug, error};

use crate::error::{LedgerError, Result};
use crate::persistence::PersistenceManager;
use crate::record::{MIN_INDEX, SLOT_SIZE};

/// Full passes over the ledger before an allocation gives up
pub const MAX_SCAN_ROUNDS: usize = 2;

pub struct IndexAllocator {
    persistence: Arc<PersistenceManager>,
    pointer: Mutex<u32>,
}

impl IndexAllocator {
    pub fn new(persistence: Arc<PersistenceManager>) -> Self {
        Self {
            persistence,
            pointer: Mutex::new(MIN_INDEX),
        }
    }

    pub fn persistence(&self) -> &Arc<PersistenceManager> {
        &self.persistence
    }

    /// Reserve one free slot and commit its initial record.
    ///
    /// `init` builds the record for the chosen index. It runs, and the
    /// record is written, while the allocator lock is still held, so no
    /// other caller can observe the slot as free in between.
    pub fn allocate<F>(&self, init: F) -> Result<u32>
    where
        F: FnOnce(u32) -> Result<[u8; SLOT_SIZE]>,
    {
        let max_index = self.persistence.max_index();
        let max_probes = MAX_SCAN_ROUNDS * max_index as usize;
        let mut pointer = self.pointer.lock().unwrap_or_else(|e| e.into_inner());

        for _ in 0..max_probes {
            if *pointer > max_index || *pointer < MIN_INDEX {
                *pointer = MIN_INDEX;
            }
            let index = *pointer;
            *pointer += 1;

            if self.persistence.is_empty(index)? {
                let record = init(index)?;
                self.persistence.write(index, &record)?;
                debug!(index, "Allocated slot");
                return Ok(index);
            }
        }

        error!(probes = max_probes, "No free slot in ledger");
        Err(LedgerError::PoolExhausted { probes: max_probes })
    }
}
