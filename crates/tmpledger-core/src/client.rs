//! Client side of a slot's lifetime
//!
//! A [`ClientHandle`] is a guard over one allocated slot. It maps the ledger
//! itself but only ever writes its own slot, exactly once: either an
//! explicit [`cancel`](ClientHandle::cancel) / [`confirm`](ClientHandle::confirm),
//! or the automatic confirm with the construction delay when the handle is
//! dropped.
//!
//! ```no_run
//! use std::time::Duration;
//! use tmpledger_core::{ClientHandle, Ledger};
//!
//! # fn main() -> tmpledger_core::Result<()> {
//! let ledger = Ledger::open_or_create("/var/lib/tmpledger/ledger".as_ref(), 40960)?;
//! let handle = ClientHandle::register(&ledger, "/data/scratch/part-0001", Duration::from_secs(600), None)?;
//! // ... produce the file ...
//! handle.finish()?; // delete it in ten minutes
//! # Ok(())
//! # }
//! ```

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};

use crate::error::{LedgerError, Result};
use crate::ledger::{AllocateRequest, Allocation, SlotAllocator};
use crate::liveness::current_process_identity;
use crate::persistence::PersistenceManager;
use crate::record::{Record, Status};
use crate::unix_now;

pub struct ClientHandle {
    index: u32,
    persistence: PersistenceManager,
    delay: Duration,
    transitioned: bool,
}

impl ClientHandle {
    /// Allocate a slot for `file_path` and take ownership of it.
    ///
    /// The path is resolved to an absolute real path; a file that does not
    /// exist yet is resolved through its parent directory. Without a
    /// `caller_msg` the call site's source location is recorded instead.
    #[track_caller]
    pub fn register<A>(
        allocator: &A,
        file_path: impl AsRef<Path>,
        delay: Duration,
        caller_msg: Option<&str>,
    ) -> Result<Self>
    where
        A: SlotAllocator + ?Sized,
    {
        let caller_msg = match caller_msg {
            Some(msg) => msg.to_string(),
            None => {
                let location = Location::caller();
                format!("{}:{}", location.file(), location.line())
            }
        };

        let allocation = allocator.allocate(&Self::request_for(file_path.as_ref(), caller_msg)?)?;
        Self::attach(&allocation, delay)
    }

    /// Allocation request for `file_path` owned by the calling process.
    pub fn request_for(file_path: &Path, caller_msg: String) -> Result<AllocateRequest> {
        let resolved = resolve_path(file_path)?;
        let file_path = resolved
            .to_str()
            .ok_or_else(|| LedgerError::InvalidField {
                field: "file_path",
                reason: format!("not valid UTF-8: {}", resolved.display()),
            })?
            .to_string();

        let (pid, pid_create_timestamp) = current_process_identity()?;
        Ok(AllocateRequest {
            pid,
            pid_create_timestamp,
            file_path,
            caller_msg,
            delete_timestamp: None,
        })
    }

    /// Take ownership of a slot allocated elsewhere, e.g. by the daemon.
    pub fn attach(allocation: &Allocation, delay: Duration) -> Result<Self> {
        let persistence = PersistenceManager::open(&allocation.ledger_path)?;
        let record = Record::decode(&persistence.read(allocation.index)?)?;
        if record.index != allocation.index {
            return Err(LedgerError::MisroutedRecord {
                slot: allocation.index,
                claimed: record.index,
            });
        }

        debug!(index = allocation.index, file = %record.file_path, "Attached to slot");
        Ok(Self {
            index: allocation.index,
            persistence,
            delay,
            transitioned: false,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn ledger_path(&self) -> &Path {
        self.persistence.path()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_transitioned(&self) -> bool {
        self.transitioned
    }

    /// Current contents of this handle's slot.
    pub fn record(&self) -> Result<Record> {
        Record::decode(&self.persistence.read(self.index)?)
    }

    /// Keep the file; the scanner will only drop the record.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(Status::NotDelete, None)
    }

    /// Schedule the file for deletion `delay` from now.
    pub fn confirm(&mut self, delay: Duration) -> Result<()> {
        let due = unix_now().saturating_add(delay.as_secs());
        self.transition(Status::WaitDelete, Some(due))
    }

    /// Release the handle now, confirming with the construction delay
    /// unless it already transitioned.
    pub fn finish(mut self) -> Result<()> {
        if self.transitioned {
            return Ok(());
        }
        self.confirm(self.delay)
    }

    fn transition(&mut self, status: Status, due: Option<u64>) -> Result<()> {
        if self.transitioned {
            if cfg!(debug_assertions) {
                panic!("slot {} transitioned twice", self.index);
            }
            return Err(LedgerError::DuplicateTransition { index: self.index });
        }
        // A failed write still counts: the drop path must not turn a
        // failed cancel into a delete.
        self.transitioned = true;

        let mut record = self.record()?;
        record.status = status;
        record.change_timestamp = Some(unix_now());
        if due.is_some() {
            record.delete_timestamp = due;
        }
        self.persistence.write(self.index, &record.encode()?)?;

        debug!(
            index = self.index,
            status = %status.as_char(),
            delete_at = ?record.delete_timestamp,
            "Slot transitioned"
        );
        Ok(())
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if self.transitioned {
            return;
        }
        if let Err(e) = self.confirm(self.delay) {
            error!(index = self.index, error = %e, "Failed to confirm slot on release");
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("index", &self.index)
            .field("ledger", &self.persistence.path())
            .field("delay", &self.delay)
            .field("transitioned", &self.transitioned)
            .finish()
    }
}

/// Absolute real path of `path`, resolving through the parent directory
/// when the file itself does not exist.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(real) => Ok(real),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let name = path.file_name().ok_or_else(|| LedgerError::InvalidField {
                field: "file_path",
                reason: format!("no file name in {}", path.display()),
            })?;
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.canonicalize()?,
                _ => std::env::current_dir()?,
            };
            Ok(parent.join(name))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, Ledger) {
        let temp = tempdir().unwrap();
        let ledger = Ledger::open_or_create(&temp.path().join("ledger"), 8).unwrap();
        (temp, ledger)
    }

    #[test]
    fn test_register_records_owner_and_path() {
        let (temp, ledger) = setup();
        let target = temp.path().join("target.bin");
        std::fs::write(&target, b"data").unwrap();

        let mut handle =
            ClientHandle::register(&ledger, &target, Duration::from_secs(60), Some("unit test")).unwrap();
        let record = handle.record().unwrap();
        let (pid, start) = current_process_identity().unwrap();

        assert_eq!(record.status, Status::Unknown);
        assert_eq!(record.pid, pid);
        assert_eq!(record.pid_create_timestamp, start);
        assert_eq!(Path::new(&record.file_path), target.canonicalize().unwrap());
        assert_eq!(record.caller_msg, "unit test");
        handle.cancel().unwrap();
    }

    #[test]
    fn test_register_default_caller_msg_is_call_site() {
        let (temp, ledger) = setup();
        let mut handle =
            ClientHandle::register(&ledger, temp.path().join("x"), Duration::ZERO, None).unwrap();
        let msg = handle.record().unwrap().caller_msg;
        assert!(msg.contains("client.rs:"), "caller_msg was {:?}", msg);
        handle.cancel().unwrap();
    }

    #[test]
    fn test_register_resolves_missing_file_through_parent() {
        let (temp, ledger) = setup();
        let sub = temp.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let target = sub.join("..").join("sub").join("later.bin");

        let mut handle = ClientHandle::register(&ledger, &target, Duration::ZERO, Some("t")).unwrap();
        let expected = sub.canonicalize().unwrap().join("later.bin");
        assert_eq!(Path::new(&handle.record().unwrap().file_path), expected);
        handle.cancel().unwrap();
    }

    #[test]
    fn test_register_missing_parent_fails() {
        let (temp, ledger) = setup();
        let err = ClientHandle::register(&ledger, temp.path().join("nope/file"), Duration::ZERO, Some("t"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Io(_)));
        assert_eq!(ledger.occupancy(), 0);
    }

    #[test]
    fn test_cancel_sets_not_delete() {
        let (temp, ledger) = setup();
        let mut handle =
            ClientHandle::register(&ledger, temp.path().join("f"), Duration::from_secs(5), Some("t")).unwrap();
        handle.cancel().unwrap();

        let record = handle.record().unwrap();
        assert_eq!(record.status, Status::NotDelete);
        assert!(record.change_timestamp.is_some());
        assert_eq!(record.delete_timestamp, None);

        // Dropping after a transition writes nothing more
        let index = handle.index();
        drop(handle);
        let record = Record::decode(&ledger.persistence().read(index).unwrap()).unwrap();
        assert_eq!(record.status, Status::NotDelete);
    }

    #[test]
    fn test_confirm_sets_due_time() {
        let (temp, ledger) = setup();
        let mut handle =
            ClientHandle::register(&ledger, temp.path().join("f"), Duration::ZERO, Some("t")).unwrap();
        let before = unix_now();
        handle.confirm(Duration::from_secs(300)).unwrap();

        let record = handle.record().unwrap();
        assert_eq!(record.status, Status::WaitDelete);
        let due = record.delete_timestamp.unwrap();
        assert!(due >= before + 300 && due <= unix_now() + 300);
    }

    #[test]
    fn test_drop_confirms_with_construction_delay() {
        let (temp, ledger) = setup();
        let before = unix_now();
        let index = {
            let handle =
                ClientHandle::register(&ledger, temp.path().join("f"), Duration::from_secs(90), Some("t")).unwrap();
            handle.index()
        };

        let record = Record::decode(&ledger.persistence().read(index).unwrap()).unwrap();
        assert_eq!(record.status, Status::WaitDelete);
        assert!(record.delete_timestamp.unwrap() >= before + 90);
    }

    #[test]
    fn test_drop_confirms_during_unwind() {
        let (temp, ledger) = setup();
        let target = temp.path().join("f");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _handle = ClientHandle::register(&ledger, &target, Duration::ZERO, Some("t")).unwrap();
            panic!("worker failed");
        }));
        assert!(result.is_err());

        let record = &ledger.records()[0];
        assert_eq!(record.status, Status::WaitDelete);
    }

    #[test]
    fn test_finish_confirms() {
        let (temp, ledger) = setup();
        let handle =
            ClientHandle::register(&ledger, temp.path().join("f"), Duration::ZERO, Some("t")).unwrap();
        let index = handle.index();
        handle.finish().unwrap();

        let record = Record::decode(&ledger.persistence().read(index).unwrap()).unwrap();
        assert_eq!(record.status, Status::WaitDelete);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "transitioned twice")]
    fn test_second_transition_panics() {
        let (temp, ledger) = setup();
        let mut handle =
            ClientHandle::register(&ledger, temp.path().join("f"), Duration::ZERO, Some("t")).unwrap();
        handle.cancel().unwrap();
        let _ = handle.confirm(Duration::ZERO);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_second_transition_is_an_error() {
        let (temp, ledger) = setup();
        let mut handle =
            ClientHandle::register(&ledger, temp.path().join("f"), Duration::ZERO, Some("t")).unwrap();
        handle.cancel().unwrap();
        let err = handle.confirm(Duration::ZERO).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTransition { .. }));
        assert_eq!(handle.record().unwrap().status, Status::NotDelete);
    }

    #[test]
    fn test_attach_to_remote_allocation() {
        let (temp, ledger) = setup();
        let allocation = ledger
            .allocate(&AllocateRequest {
                pid: 1,
                pid_create_timestamp: 2,
                file_path: temp.path().join("remote").to_string_lossy().into_owned(),
                caller_msg: "remote".to_string(),
                delete_timestamp: None,
            })
            .unwrap();

        let mut handle = ClientHandle::attach(&allocation, Duration::ZERO).unwrap();
        assert_eq!(handle.ledger_path(), ledger.path());
        handle.cancel().unwrap();

        // The daemon's own mapping sees the client's write
        assert_eq!(ledger.records()[0].status, Status::NotDelete);
    }

    #[test]
    fn test_attach_to_free_slot_fails() {
        let (_temp, ledger) = setup();
        let allocation = Allocation {
            index: 5,
            ledger_path: ledger.path().to_path_buf(),
        };
        assert!(matches!(
            ClientHandle::attach(&allocation, Duration::ZERO),
            Err(LedgerError::MalformedRecord { .. })
        ));
    }
}
