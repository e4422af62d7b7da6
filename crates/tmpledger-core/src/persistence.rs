//! Ledger file mapping and slot-level byte access
//!
//! All slot mutation funnels through [`PersistenceManager`]. Writes and
//! erasures are two-phase so a concurrent reader (another process with its
//! own mapping) never observes a committed-looking but incomplete record:
//!
//! - write: bytes `1..SLOT_SIZE` first, flush, then the status byte, flush
//! - erase: the status byte first, flush, then bytes `1..SLOT_SIZE`, flush

use memmap2::MmapMut;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{LedgerError, Result};
use crate::record::{blank_slot, BLANK, MIN_INDEX, SLOT_SIZE};

/// Owner of one process-local mapping of a ledger file
pub struct PersistenceManager {
    path: PathBuf,
    max_slots: u32,
    mmap: Mutex<MmapMut>,
}

impl PersistenceManager {
    /// Open the ledger at `path`, creating and blank-filling it first if absent.
    pub fn open_or_create(path: &Path, max_slots: u32) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), max_slots, "Ledger file not found, creating");
            create_blank_ledger(path, max_slots)?;
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let expected = ledger_size(max_slots);
        let size = file.metadata()?.len();
        if size != expected {
            return Err(LedgerError::LedgerSizeMismatch {
                path: path.to_path_buf(),
                size,
                expected,
            });
        }

        Self::map(path, file, max_slots)
    }

    /// Open an existing ledger, deriving the slot count from its length.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        if size == 0 || size % SLOT_SIZE as u64 != 0 {
            return Err(LedgerError::LedgerSizeMismatch {
                path: path.to_path_buf(),
                size,
                expected: size.next_multiple_of(SLOT_SIZE as u64).max(SLOT_SIZE as u64),
            });
        }
        let max_slots = u32::try_from(size / SLOT_SIZE as u64).map_err(|_| {
            LedgerError::LedgerSizeMismatch {
                path: path.to_path_buf(),
                size,
                expected: ledger_size(u32::MAX),
            }
        })?;

        Self::map(path, file, max_slots)
    }

    fn map(path: &Path, file: File, max_slots: u32) -> Result<Self> {
        // SAFETY: the ledger is only ever resized at creation time, before
        // it is linked into place; other processes write whole slots in place.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), max_slots, "Ledger mapped");
        Ok(Self {
            path: path.to_path_buf(),
            max_slots,
            mmap: Mutex::new(mmap),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    /// Largest valid slot index
    pub fn max_index(&self) -> u32 {
        self.max_slots
    }

    fn lock(&self) -> MutexGuard<'_, MmapMut> {
        self.mmap.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot_range(&self, index: u32) -> Result<Range<usize>> {
        if !(MIN_INDEX..=self.max_index()).contains(&index) {
            return Err(LedgerError::IndexOutOfRange {
                index,
                max: self.max_index(),
            });
        }
        let start = SLOT_SIZE * (index - MIN_INDEX) as usize;
        Ok(start..start + SLOT_SIZE)
    }

    /// Commit a full record: body first, status byte last.
    pub fn write(&self, index: u32, record: &[u8]) -> Result<()> {
        if record.len() != SLOT_SIZE {
            return Err(LedgerError::InvalidRecordLength {
                expected: SLOT_SIZE,
                actual: record.len(),
            });
        }
        let range = self.slot_range(index)?;
        let mut mmap = self.lock();

        mmap[range.start + 1..range.end].copy_from_slice(&record[1..]);
        mmap.flush_range(range.start, SLOT_SIZE)?;
        mmap[range.start] = record[0];
        mmap.flush_range(range.start, 1)?;
        Ok(())
    }

    /// Free a slot: status byte first, body last.
    pub fn erase(&self, index: u32) -> Result<()> {
        let range = self.slot_range(index)?;
        let blank = blank_slot();
        let mut mmap = self.lock();

        mmap[range.start] = BLANK;
        mmap.flush_range(range.start, 1)?;
        mmap[range.start + 1..range.end].copy_from_slice(&blank[1..]);
        mmap.flush_range(range.start, SLOT_SIZE)?;
        Ok(())
    }

    pub fn read(&self, index: u32) -> Result<[u8; SLOT_SIZE]> {
        let range = self.slot_range(index)?;
        let mmap = self.lock();
        let mut out = [0u8; SLOT_SIZE];
        out.copy_from_slice(&mmap[range]);
        Ok(out)
    }

    /// A slot is free iff its status byte is blank.
    pub fn is_empty(&self, index: u32) -> Result<bool> {
        let range = self.slot_range(index)?;
        Ok(self.lock()[range.start] == BLANK)
    }

    /// True iff every slot is free.
    pub fn is_ledger_empty(&self) -> bool {
        let mmap = self.lock();
        mmap.chunks_exact(SLOT_SIZE).all(|slot| slot[0] == BLANK)
    }

    /// Write only the record body, leaving the status byte untouched.
    /// Reproduces a writer that died between the two commit phases.
    #[cfg(test)]
    pub(crate) fn write_body_only(&self, index: u32, record: &[u8]) -> Result<()> {
        let range = self.slot_range(index)?;
        let mut mmap = self.lock();
        mmap[range.start + 1..range.end].copy_from_slice(&record[1..]);
        mmap.flush_range(range.start, SLOT_SIZE)?;
        Ok(())
    }
}

fn ledger_size(max_slots: u32) -> u64 {
    SLOT_SIZE as u64 * max_slots as u64
}

/// Build a blank ledger next to `path` and link it into place, so no
/// process can map a partially initialised file. A ledger that appeared
/// meanwhile wins and is left untouched.
fn create_blank_ledger(path: &Path, max_slots: u32) -> Result<()> {
    static STAGING_SEQ: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let staging = path.with_extension(format!(
        "init-{}-{}",
        std::process::id(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    {
        let file = File::create(&staging)?;
        let mut writer = BufWriter::new(&file);
        let blank = blank_slot();
        for _ in 0..max_slots {
            writer.write_all(&blank)?;
        }
        writer.flush()?;
        drop(writer);
        file.sync_all()?;
    }

    // hard_link never replaces an existing destination, unlike rename
    let linked = fs::hard_link(&staging, path);
    let _ = fs::remove_file(&staging);
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "Ledger created concurrently, using existing file");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
