//! Fixed-width slot record codec
//!
//! A record occupies exactly one 512-byte slot. Fields are pipe-delimited
//! lowercase-hex/text, right-padded with blanks and terminated by `\n`:
//!
//! ```text
//! status|index|version|create_ts|change_ts|delete_ts|pid|pid_create_ts|file_path|caller_msg<blanks>\n
//! ```
//!
//! The status character sits at byte 0 and doubles as the commit marker:
//! a blank byte 0 means the slot is free, whatever follows it.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Size of one slot in bytes
pub const SLOT_SIZE: usize = 512;

/// Smallest valid slot index
pub const MIN_INDEX: u32 = 1;

/// Default number of slots in a ledger (20 MiB)
pub const DEFAULT_MAX_SLOTS: u32 = 40960;

/// Placeholder byte for free slots and padding
pub const BLANK: u8 = b' ';

pub const RECORD_VERSION: &str = "1";
pub const FILE_PATH_MAX_LENGTH: usize = 255;
pub const CALLER_MSG_MAX_LENGTH: usize = 201;

/// Encoded form of "no timestamp"
pub const EMPTY_TIMESTAMP: &str = "00000000";

const FIELD_COUNT: usize = 10;
const VERSION_MAX_LENGTH: usize = 8;

/// Lifecycle status of a slot's target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Owner cancelled: keep the file, drop the record
    NotDelete,
    /// Owner confirmed: delete once `delete_timestamp` is reached
    WaitDelete,
    /// Owner has not decided yet
    Unknown,
}

impl Status {
    pub const fn as_char(self) -> char {
        match self {
            Status::NotDelete => 'n',
            Status::WaitDelete => 'y',
            Status::Unknown => 'u',
        }
    }

    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'n' => Ok(Status::NotDelete),
            'y' => Ok(Status::WaitDelete),
            'u' => Ok(Status::Unknown),
            other => Err(LedgerError::InvalidStatus(other)),
        }
    }
}

/// Decoded contents of an occupied slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub index: u32,
    pub version: String,
    pub status: Status,
    pub create_timestamp: u64,
    pub change_timestamp: Option<u64>,
    pub delete_timestamp: Option<u64>,
    pub pid: u32,
    pub pid_create_timestamp: u64,
    pub file_path: String,
    pub caller_msg: String,
}

impl Record {
    /// Encode into exactly [`SLOT_SIZE`] bytes.
    ///
    /// `caller_msg` is provenance text and is normalised rather than
    /// rejected: `|` and `\n` become blanks, trailing blanks are dropped and
    /// the result is cut to fit the slot. `decode(encode(r)) == r` therefore
    /// holds only when `caller_msg` is already in that form; every other
    /// field round-trips exactly or fails to encode.
    pub fn encode(&self) -> Result<[u8; SLOT_SIZE]> {
        self.validate()?;

        let mut line = format!(
            "{}|{:04x}|{}|{:x}|{}|{}|{:08x}|{:x}|{}|",
            self.status.as_char(),
            self.index,
            self.version,
            self.create_timestamp,
            format_timestamp(self.change_timestamp),
            format_timestamp(self.delete_timestamp),
            self.pid,
            self.pid_create_timestamp,
            self.file_path,
        );

        let budget = (SLOT_SIZE - 1)
            .saturating_sub(line.len())
            .min(CALLER_MSG_MAX_LENGTH);
        line.push_str(&sanitize_caller_msg(&self.caller_msg, budget));

        let mut out = [BLANK; SLOT_SIZE];
        let len = line.len().min(SLOT_SIZE - 1);
        out[..len].copy_from_slice(&line.as_bytes()[..len]);
        out[SLOT_SIZE - 1] = b'\n';
        Ok(out)
    }

    /// Decode one slot. Never returns a partially parsed record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SLOT_SIZE {
            return Err(LedgerError::InvalidRecordLength {
                expected: SLOT_SIZE,
                actual: bytes.len(),
            });
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|e| LedgerError::malformed(format!("not UTF-8: {}", e)))?;
        let body = text
            .strip_suffix('\n')
            .ok_or_else(|| LedgerError::malformed("missing record terminator"))?;

        let fields: Vec<&str> = body.split('|').collect();
        if fields.len() != FIELD_COUNT {
            return Err(LedgerError::malformed(format!(
                "expected {} fields, found {}",
                FIELD_COUNT,
                fields.len()
            )));
        }

        let mut status_chars = fields[0].chars();
        let status = match (status_chars.next(), status_chars.next()) {
            (Some(c), None) => Status::from_char(c)?,
            _ => return Err(LedgerError::malformed("status must be one character")),
        };

        Ok(Self {
            status,
            index: parse_hex32(fields[1], "index")?,
            version: fields[2].to_string(),
            create_timestamp: parse_hex(fields[3], "create_timestamp")?,
            change_timestamp: parse_timestamp(fields[4], "change_timestamp")?,
            delete_timestamp: parse_timestamp(fields[5], "delete_timestamp")?,
            pid: parse_hex32(fields[6], "pid")?,
            pid_create_timestamp: parse_hex(fields[7], "pid_create_timestamp")?,
            file_path: fields[8].to_string(),
            caller_msg: fields[9].trim_end_matches(BLANK as char).to_string(),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.file_path.len() > FILE_PATH_MAX_LENGTH {
            return Err(LedgerError::FilePathTooLong {
                len: self.file_path.len(),
                max: FILE_PATH_MAX_LENGTH,
            });
        }
        if self.file_path.contains(['|', '\n']) {
            return Err(LedgerError::InvalidField {
                field: "file_path",
                reason: "contains a field delimiter".to_string(),
            });
        }
        if self.version.is_empty()
            || self.version.len() > VERSION_MAX_LENGTH
            || self.version.contains(['|', '\n', ' '])
        {
            return Err(LedgerError::InvalidField {
                field: "version",
                reason: format!("{:?}", self.version),
            });
        }
        Ok(())
    }
}

/// Contents of a free slot: blanks with a trailing newline
pub fn blank_slot() -> [u8; SLOT_SIZE] {
    let mut out = [BLANK; SLOT_SIZE];
    out[SLOT_SIZE - 1] = b'\n';
    out
}

fn format_timestamp(ts: Option<u64>) -> String {
    match ts {
        Some(ts) => format!("{:x}", ts),
        None => EMPTY_TIMESTAMP.to_string(),
    }
}

fn parse_timestamp(field: &str, name: &str) -> Result<Option<u64>> {
    if field == EMPTY_TIMESTAMP {
        return Ok(None);
    }
    parse_hex(field, name).map(Some)
}

fn parse_hex(field: &str, name: &str) -> Result<u64> {
    u64::from_str_radix(field, 16)
        .map_err(|_| LedgerError::malformed(format!("bad {}: {:?}", name, field)))
}

fn parse_hex32(field: &str, name: &str) -> Result<u32> {
    u32::try_from(parse_hex(field, name)?)
        .map_err(|_| LedgerError::malformed(format!("{} out of range: {:?}", name, field)))
}

/// Strip delimiters and trailing blanks, then cut to `max` bytes on a char
/// boundary so the encoded record stays valid UTF-8.
fn sanitize_caller_msg(msg: &str, max: usize) -> String {
    let cleaned: String = msg
        .chars()
        .map(|c| if c == '|' || c == '\n' { ' ' } else { c })
        .collect();
    let mut end = cleaned.trim_end().len().min(max);
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    cleaned[..end].trim_end().to_string()
}
