//! End-to-end slot lifecycles: allocate, transition, sweep.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use tmpledger_core::{
    current_process_identity, AllocateRequest, ClientHandle, Ledger, LedgerError, MountGuard,
    SlotAllocator, Status, SystemLiveness, UnmountedPolicy,
};

struct Host {
    temp: TempDir,
    ledger: Ledger,
}

impl Host {
    fn new(slots: u32) -> Self {
        let temp = tempdir().unwrap();
        let ledger = Ledger::open_or_create(&temp.path().join("ledger"), slots).unwrap();
        Self { temp, ledger }
    }

    fn root(&self) -> PathBuf {
        self.temp.path().canonicalize().unwrap()
    }

    fn mount_root(&self) -> PathBuf {
        self.root().join("nodes")
    }

    fn sweep(&self, policy: UnmountedPolicy) {
        let mounts = MountGuard::new(self.mount_root(), policy);
        self.ledger.scanner(SystemLiveness, mounts).scan_once();
    }

    fn create(&self, rel: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"payload").unwrap();
        path.canonicalize().unwrap()
    }

    fn request(&self, pid: u32, start: u64, path: &Path) -> AllocateRequest {
        AllocateRequest {
            pid,
            pid_create_timestamp: start,
            file_path: path.to_string_lossy().into_owned(),
            caller_msg: "lifecycle".to_string(),
            delete_timestamp: None,
        }
    }
}

#[test]
fn not_delete_keeps_file_and_frees_slot() {
    let host = Host::new(16);
    let target = host.create("keep.bin");

    let mut handle = ClientHandle::register(&host.ledger, &target, Duration::ZERO, None).unwrap();
    let index = handle.index();
    handle.cancel().unwrap();
    drop(handle);

    host.sweep(UnmountedPolicy::SkipUntilMounted);

    assert!(target.exists());
    assert!(host.ledger.persistence().is_empty(index).unwrap());
}

#[test]
fn released_handle_is_deleted_on_next_sweep() {
    let host = Host::new(16);
    let target = host.create("scratch.bin");

    let index = {
        let handle = ClientHandle::register(&host.ledger, &target, Duration::ZERO, None).unwrap();
        assert_eq!(handle.record().unwrap().status, Status::Unknown);
        handle.index()
    };
    assert_eq!(host.ledger.records()[0].status, Status::WaitDelete);

    host.sweep(UnmountedPolicy::SkipUntilMounted);

    assert!(!target.exists());
    assert!(host.ledger.persistence().is_empty(index).unwrap());
}

#[test]
fn undecided_slot_of_live_owner_survives_sweep() {
    let host = Host::new(16);
    let target = host.create("busy.bin");

    let mut handle = ClientHandle::register(&host.ledger, &target, Duration::ZERO, None).unwrap();
    host.sweep(UnmountedPolicy::SkipUntilMounted);

    assert!(target.exists());
    assert_eq!(handle.record().unwrap().status, Status::Unknown);
    handle.cancel().unwrap();
}

#[test]
fn orphaned_slot_is_reclaimed() {
    let host = Host::new(16);
    let target = host.create("orphan.bin");

    let allocation = host
        .ledger
        .allocate(&host.request(10_000_000, 1_700_000_000, &target))
        .unwrap();

    host.sweep(UnmountedPolicy::SkipUntilMounted);

    assert!(!target.exists());
    assert!(host.ledger.persistence().is_empty(allocation.index).unwrap());
}

#[test]
fn orphan_directory_is_removed_recursively() {
    let host = Host::new(16);
    host.create("outdir/a/b.bin");
    let dir = host.temp.path().join("outdir").canonicalize().unwrap();

    host.ledger
        .allocate(&host.request(10_000_000, 1, &dir))
        .unwrap();
    host.sweep(UnmountedPolicy::SkipUntilMounted);

    assert!(!dir.exists());
    assert_eq!(host.ledger.occupancy(), 0);
}

#[test]
fn unmounted_target_is_left_alone() {
    let host = Host::new(16);
    // nodes/disk1 is a plain directory, so it is a detached mount point
    let target = host.create("nodes/disk1/shard.bin");

    let allocation = host
        .ledger
        .allocate(&host.request(10_000_000, 1, &target))
        .unwrap();

    host.sweep(UnmountedPolicy::SkipUntilMounted);
    assert!(target.exists());
    assert!(!host.ledger.persistence().is_empty(allocation.index).unwrap());

    host.sweep(UnmountedPolicy::SkipAlways);
    assert!(target.exists());
    assert!(!host.ledger.persistence().is_empty(allocation.index).unwrap());
}

#[test]
fn symlink_into_unmounted_target_is_left_alone() {
    let host = Host::new(16);
    let target = host.create("nodes/disk1/shard.bin");
    std::os::unix::fs::symlink(host.root().join("nodes/disk1"), host.root().join("scratch")).unwrap();

    // Recorded through the link, not the real path
    let allocation = host
        .ledger
        .allocate(&host.request(10_000_000, 1, &host.root().join("scratch/shard.bin")))
        .unwrap();
    host.ledger
        .allocate(&host.request(10_000_000, 1, &host.root().join("other/../nodes/disk1/shard.bin")))
        .unwrap();

    host.sweep(UnmountedPolicy::SkipUntilMounted);

    assert!(target.exists());
    assert!(!host.ledger.persistence().is_empty(allocation.index).unwrap());
    assert_eq!(host.ledger.occupancy(), 2);
}

#[test]
fn full_ledger_reports_pool_exhausted() {
    let host = Host::new(8);
    let (pid, start) = current_process_identity().unwrap();
    let path = host.temp.path().join("f");

    for _ in 0..8 {
        host.ledger.allocate(&host.request(pid, start, &path)).unwrap();
    }

    let err = host.ledger.allocate(&host.request(pid, start, &path)).unwrap_err();
    assert!(matches!(err, LedgerError::PoolExhausted { probes } if probes <= 16));
}

#[test]
fn concurrent_registrations_get_distinct_slots() {
    let host = Host::new(128);
    let ledger = Arc::new(host.ledger);
    let dir = host.temp.path().to_path_buf();

    let handles: Vec<_> = (0..16)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            let dir = dir.clone();
            thread::spawn(move || {
                (0..4)
                    .map(|i| {
                        let path = dir.join(format!("t{}-{}", t, i));
                        let mut handle =
                            ClientHandle::register(&ledger, &path, Duration::ZERO, Some("race")).unwrap();
                        let index = handle.index();
                        handle.cancel().unwrap();
                        index
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for index in handle.join().unwrap() {
            assert!(seen.insert(index), "slot {} allocated twice", index);
        }
    }
    assert_eq!(seen.len(), 64);
    assert_eq!(ledger.occupancy(), 64);
}

#[test]
fn slot_is_reusable_after_reclaim() {
    let host = Host::new(2);
    let (pid, start) = current_process_identity().unwrap();
    let target = host.create("reuse.bin");

    for round in 0..3 {
        let mut a = ClientHandle::register(&host.ledger, &target, Duration::ZERO, None).unwrap();
        let mut b = ClientHandle::register(&host.ledger, &target, Duration::ZERO, None).unwrap();
        assert!(matches!(
            host.ledger.allocate(&host.request(pid, start, &target)),
            Err(LedgerError::PoolExhausted { .. })
        ));
        a.cancel().unwrap();
        b.cancel().unwrap();
        host.sweep(UnmountedPolicy::SkipUntilMounted);
        assert_eq!(host.ledger.occupancy(), 0, "round {}", round);
    }
}
