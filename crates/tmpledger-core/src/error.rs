use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every slot was observed occupied during a bounded allocation scan.
    /// Recoverable: callers back off and retry.
    #[error("No free slot after probing {probes} slots")]
    PoolExhausted { probes: usize },

    #[error("Malformed record: {reason}")]
    MalformedRecord { reason: String },

    #[error("Invalid record length: expected {expected} bytes, got {actual}")]
    InvalidRecordLength { expected: usize, actual: usize },

    #[error("Slot index {index} out of range [1, {max}]")]
    IndexOutOfRange { index: u32, max: u32 },

    #[error("Record in slot {slot} claims index {claimed}")]
    MisroutedRecord { slot: u32, claimed: u32 },

    #[error("Invalid status byte: {0:?}")]
    InvalidStatus(char),

    #[error("File path too long: {len} bytes (max {max})")]
    FilePathTooLong { len: usize, max: usize },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Ledger file {path} has size {size}, expected {expected}")]
    LedgerSizeMismatch {
        path: PathBuf,
        size: u64,
        expected: u64,
    },

    #[error("Slot {index} has already transitioned")]
    DuplicateTransition { index: u32 },

    #[error("Blocking task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            reason: reason.into(),
        }
    }

    /// True for conditions a caller is expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}
