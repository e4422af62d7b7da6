//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Isolated ledger and socket paths
//! - A scratch directory for target files
//! - A mount root whose subdirectories are never real mount points
//!
//! # Usage
//!
//! ```ignore
//! use tmpledger_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.ledger.path, config.daemon.socket are all isolated
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Slot count for test ledgers
pub const TEST_MAX_SLOTS: u32 = 128;

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Ledger file for this test (not created yet)
    pub ledger_path: PathBuf,
    /// Unique socket path for this test
    pub socket_path: PathBuf,
    /// Directory for target files
    pub data_dir: PathBuf,
    /// Managed mount root; its subdirectories are plain directories
    pub mount_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        // Canonical, so resolved target paths share the mount root's prefix
        let root = temp_dir.path().canonicalize()?;

        let data_dir = root.join("data");
        let mount_root = root.join("nodes");
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&mount_root)?;

        Ok(Self {
            ledger_path: root.join(format!("ledger-{}.dat", test_id)),
            socket_path: root.join(format!("tmpledger-test-{}.sock", test_id)),
            data_dir,
            mount_root,
            test_id,
            _temp_dir: temp_dir,
        })
    }

    /// Config pointing every path at this environment, with a small ledger
    /// and a short scan period.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.ledger.path = self.ledger_path.clone();
        cfg.ledger.max_slots = TEST_MAX_SLOTS;
        cfg.daemon.socket = self.socket_path.clone();
        cfg.mounts.root = self.mount_root.clone();
        cfg.scanner.period_secs = 1;
        cfg.allocator.backoff_secs = 1;
        cfg
    }

    /// Create a target file under the data directory
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.data_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path.canonicalize()?)
    }

    /// Create a target file below `<mount_root>/<mount_point>/`
    pub fn create_mounted_file(&self, mount_point: &str, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.mount_root.join(mount_point).join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, b"mounted")?;
        Ok(path.canonicalize()?)
    }

    /// Check if socket exists (daemon may be running)
    pub fn is_socket_present(&self) -> bool {
        self.socket_path.exists()
    }

    /// Environment variables that point a spawned daemon at this environment
    pub fn daemon_env(&self) -> Vec<(String, String)> {
        vec![
            (
                crate::ENV_LEDGER_PATH.to_string(),
                self.ledger_path.display().to_string(),
            ),
            (
                crate::ENV_SOCKET.to_string(),
                self.socket_path.display().to_string(),
            ),
            (crate::ENV_SCAN_PERIOD.to_string(), "1".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.data_dir.exists());
        assert!(env.mount_root.exists());
        assert!(!env.ledger_path.exists());
        assert!(!env.is_socket_present());
    }

    #[test]
    fn test_environment_has_unique_paths() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.socket_path, env2.socket_path);
        assert_ne!(env1.ledger_path, env2.ledger_path);
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("out/part-1.bin", b"data").unwrap();
        assert!(path.is_absolute());
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }

    #[test]
    fn test_config_points_at_environment() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config();
        assert_eq!(cfg.ledger.path, env.ledger_path);
        assert_eq!(cfg.daemon.socket, env.socket_path);
        assert_eq!(cfg.mounts.root, env.mount_root);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_daemon_env_round_trips_through_overrides() {
        let env = TestEnvironment::new().unwrap();
        let vars = env.daemon_env();
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|key| {
            vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap();
        assert_eq!(cfg.ledger.path, env.ledger_path);
        assert_eq!(cfg.daemon.socket, env.socket_path);
        assert_eq!(cfg.scanner.period_secs, 1);
    }
}
