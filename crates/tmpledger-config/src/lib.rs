//! # tmpledger-config
//!
//! Configuration management for tmpledger.
//!
//! Loads configuration from:
//! 1. `~/.tmpledger/config.toml` (global)
//! 2. `.tmpledger/config.toml` (project-local, overrides global key by key)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tmpledger_core::{UnmountedPolicy, DEFAULT_MAX_SLOTS, DEFAULT_MOUNT_ROOT};
use tracing::debug;

pub const ENV_LEDGER_PATH: &str = "TMPLEDGER_LEDGER_PATH";
pub const ENV_SOCKET: &str = "TMPLEDGER_SOCKET";
pub const ENV_SCAN_PERIOD: &str = "TMPLEDGER_SCAN_PERIOD";

const PROJECT_CONFIG_PATH: &str = ".tmpledger/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub scanner: ScannerConfig,
    pub allocator: AllocatorConfig,
    pub mounts: MountsConfig,
    pub daemon: DaemonConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Some(Path::new(PROJECT_CONFIG_PATH)))?;
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load and layer config files without consulting the environment.
    /// Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Table = toml::from_str(&contents)?;
                merge_tables(&mut merged, layer);
            }
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Global config path: ~/.tmpledger/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".tmpledger/config.toml"))
    }

    /// Apply environment variable overrides, reading variables through `lookup`
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_LEDGER_PATH) {
            self.ledger.path = PathBuf::from(path);
        }
        if let Some(socket) = lookup(ENV_SOCKET) {
            self.daemon.socket = PathBuf::from(socket);
        }
        if let Some(period) = lookup(ENV_SCAN_PERIOD) {
            self.scanner.period_secs = period.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_SCAN_PERIOD,
                value: period.clone(),
            })?;
        }
        Ok(())
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.max_slots == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ledger.max_slots",
                value: self.ledger.max_slots.to_string(),
            });
        }
        if self.scanner.period_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scanner.period_secs",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Later layers win; nested tables merge key by key.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Ledger file location and size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
    /// Slot count used when the file is created
    pub max_slots: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/tmpledger/ledger.dat"),
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Pause between full sweeps
    pub period_secs: u64,
}

impl ScannerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { period_secs: 120 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Wait before retrying when the ledger is full
    pub backoff_secs: u64,
}

impl AllocatorConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self { backoff_secs: 120 }
    }
}

/// Managed mount points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountsConfig {
    /// Every directory directly below this root is a mount point
    pub root: PathBuf,
    pub policy: UnmountedPolicy,
}

impl Default for MountsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            policy: UnmountedPolicy::default(),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path
    pub socket: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/tmpledger/tmpledgerd.sock"),
        }
    }
}
