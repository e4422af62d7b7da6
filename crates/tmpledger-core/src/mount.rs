//! Mount-point awareness for reclamation
//!
//! Targets can live under administratively managed mount points
//! (`<root>/<mount_point>/...`). Deleting through such a path while the
//! mount point is detached would hit the empty directory underneath, so the
//! scanner asks a [`MountGuard`] before touching the file.

use serde::{Deserialize, Serialize};
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

/// Default root below which every directory is a managed mount point
pub const DEFAULT_MOUNT_ROOT: &str = "/home/mnt/nodes";

/// Capability to ask whether a directory currently has a filesystem mounted on it
pub trait MountTable: Send + Sync {
    fn is_mounted(&self, mount_point: &Path) -> bool;
}

/// Mount detection by device id: a directory is a mount point when it lives
/// on a different device than its parent, or is its own parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMounts;

impl MountTable for SystemMounts {
    fn is_mounted(&self, mount_point: &Path) -> bool {
        let Ok(meta) = std::fs::symlink_metadata(mount_point) else {
            return false;
        };
        if meta.file_type().is_symlink() {
            return false;
        }
        let parent = mount_point.join("..");
        let Ok(parent_meta) = std::fs::metadata(&parent) else {
            return false;
        };
        meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino()
    }
}

/// What to do with targets that live under a managed mount point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmountedPolicy {
    /// Skip while the mount point is detached; reclaim normally once mounted
    #[default]
    SkipUntilMounted,
    /// Never reclaim anything under a managed mount point
    SkipAlways,
}

/// Where a target path sits relative to the managed mount root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathInMount {
    NotInMount,
    Mounted,
    Unmounted,
}

pub struct MountGuard {
    root: PathBuf,
    policy: UnmountedPolicy,
    table: Box<dyn MountTable>,
}

impl MountGuard {
    pub fn new(root: impl Into<PathBuf>, policy: UnmountedPolicy) -> Self {
        Self::with_table(root, policy, SystemMounts)
    }

    pub fn with_table(
        root: impl Into<PathBuf>,
        policy: UnmountedPolicy,
        table: impl MountTable + 'static,
    ) -> Self {
        Self {
            root: root.into(),
            policy,
            table: Box::new(table),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> UnmountedPolicy {
        self.policy
    }

    /// The mount point a path lives under, if any. The path must reach at
    /// least one level below the mount point itself. Both the path and the
    /// root are resolved first, so symlinks and `..` cannot hide a mount point.
    pub fn mount_point_of(&self, path: &Path) -> Option<PathBuf> {
        let root = real_path(&self.root);
        let path = real_path(path);
        let rest = path.strip_prefix(&root).ok()?;
        let mut parts = rest.components().filter(|c| matches!(c, Component::Normal(_)));
        let mount_name = parts.next()?;
        parts.next()?;
        Some(root.join(mount_name))
    }

    pub fn classify(&self, path: &Path) -> PathInMount {
        match self.mount_point_of(path) {
            None => PathInMount::NotInMount,
            Some(mp) if self.table.is_mounted(&mp) => PathInMount::Mounted,
            Some(_) => PathInMount::Unmounted,
        }
    }

    /// True if reclamation of `path` must be skipped this pass.
    pub fn should_skip(&self, path: &Path) -> bool {
        match (self.policy, self.classify(path)) {
            (_, PathInMount::NotInMount) => false,
            (UnmountedPolicy::SkipUntilMounted, state) => state == PathInMount::Unmounted,
            (UnmountedPolicy::SkipAlways, _) => true,
        }
    }
}

/// Resolve `path` like `realpath(3)` without requiring it to exist: the
/// longest existing prefix is canonicalized and the remaining components are
/// applied lexically.
pub fn real_path(path: &Path) -> PathBuf {
    let components: Vec<Component<'_>> = path.components().collect();
    for split in (1..=components.len()).rev() {
        let head: PathBuf = components[..split].iter().collect();
        if let Ok(mut resolved) = head.canonicalize() {
            push_lexical(&mut resolved, &components[split..]);
            return resolved;
        }
    }
    let mut resolved = PathBuf::new();
    push_lexical(&mut resolved, &components);
    resolved
}

fn push_lexical(base: &mut PathBuf, rest: &[Component<'_>]) {
    for component in rest {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            other => base.push(other),
        }
    }
}

impl Default for MountGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNT_ROOT, UnmountedPolicy::default())
    }
}

impl std::fmt::Debug for MountGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountGuard")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
