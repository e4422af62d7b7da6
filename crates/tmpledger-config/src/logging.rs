//! Structured logging utilities for tmpledger components.
//!
//! Provides consistent logging with component tags and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use tmpledger_config::{log_daemon_info, log_scanner_warn};
//!
//! log_daemon_info!("Client connected", peer_pid = 1234);
//! log_scanner_warn!("Sweep finished with failures", failed = 2, socket = %path.display());
//! ```

use once_cell::sync::OnceCell;
use std::str::FromStr;

/// Component identifiers for log filtering, emitted as the `component` field
pub struct Component;

impl Component {
    pub const DAEMON: &'static str = "DAEMON";
    pub const SCANNER: &'static str = "SCANNER";
    pub const IPC: &'static str = "IPC";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

// === DAEMON logging macros ===

#[macro_export]
macro_rules! log_daemon_error {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::error!(component = $crate::logging::Component::DAEMON, $($($field)+ ,)? $msg)
    };
}

#[macro_export]
macro_rules! log_daemon_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = $crate::logging::Component::DAEMON, $($($field)+ ,)? $msg)
    };
}

#[macro_export]
macro_rules! log_daemon_info {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::info!(component = $crate::logging::Component::DAEMON, $($($field)+ ,)? $msg)
    };
}

#[macro_export]
macro_rules! log_daemon_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = $crate::logging::Component::DAEMON, $($($field)+ ,)? $msg)
    };
}

// === SCANNER logging macros ===

#[macro_export]
macro_rules! log_scanner_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = $crate::logging::Component::SCANNER, $($($field)+ ,)? $msg)
    };
}

#[macro_export]
macro_rules! log_scanner_info {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::info!(component = $crate::logging::Component::SCANNER, $($($field)+ ,)? $msg)
    };
}

// === IPC logging macros ===

#[macro_export]
macro_rules! log_ipc_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = $crate::logging::Component::IPC, $($($field)+ ,)? $msg)
    };
}

#[macro_export]
macro_rules! log_ipc_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = $crate::logging::Component::IPC, $($($field)+ ,)? $msg)
    };
}

static LOGGING: OnceCell<()> = OnceCell::new();

/// Initialize logging with the given level filter. `RUST_LOG` takes
/// precedence when set. Later calls are no-ops.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    LOGGING.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

        // Another subscriber may already be installed (e.g. by a test harness)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::DAEMON, "DAEMON");
        assert_eq!(Component::SCANNER, "SCANNER");
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging(LogLevel::Debug);
        init_logging(LogLevel::Info);
        log_daemon_info!("logging initialized", attempt = 2);
        log_scanner_warn!("scanner macro expands");
        log_scanner_info!("sweep finished", reclaimed = 3, policy = ?LogLevel::Info);
        log_daemon_debug!("debug macro expands", socket = %"/run/x.sock");
    }
}
