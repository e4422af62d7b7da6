//! # tmpledger-daemon
//!
//! Host daemon for the temporary-file ledger.
//!
//! ## Architecture
//!
//! One `tmpledgerd` per host:
//! - Owns the canonical ledger mapping and its allocator
//! - Runs the background scanner that reclaims due and orphaned files
//! - Serves allocation requests to client processes
//!
//! ## Communication
//!
//! Clients talk to the daemon over a Unix domain socket using the
//! length-prefixed bincode protocol in `tmpledger-ipc`. After allocation a
//! client maps the ledger itself and writes only its own slot.

pub mod inspect;
pub mod server;

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tmpledger_config::{log_daemon_info, log_daemon_warn, log_scanner_info, log_scanner_warn, Config};
use tmpledger_core::{Ledger, MountGuard, SystemLiveness};
use tokio::sync::watch;

use crate::server::Server;

/// Main daemon entry point. Runs until SIGINT or SIGTERM.
pub async fn run_daemon(config: Config) -> Result<()> {
    run_until(config, shutdown_signal()).await
}

/// Run the daemon until `shutdown` resolves.
pub async fn run_until<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    log_daemon_info!(
        "Starting tmpledgerd",
        ledger = %config.ledger.path.display(),
        socket = %config.daemon.socket.display(),
        max_slots = config.ledger.max_slots,
        period_secs = config.scanner.period_secs
    );

    if let Some(parent) = config.ledger.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create ledger directory {}", parent.display()))?;
    }
    let ledger = Arc::new(
        Ledger::open_or_create(&config.ledger.path, config.ledger.max_slots)
            .with_context(|| format!("Failed to open ledger {}", config.ledger.path.display()))?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mounts = MountGuard::new(config.mounts.root.clone(), config.mounts.policy);
    let scanner = Arc::new(ledger.scanner(SystemLiveness, mounts));
    let scanner_handle = tokio::spawn(scanner.run(config.scanner.period(), shutdown_rx.clone()));
    log_scanner_info!(
        "Background scanner started",
        period_secs = config.scanner.period_secs,
        mount_root = %config.mounts.root.display(),
        policy = ?config.mounts.policy
    );

    let listener = server::bind(&config.daemon.socket)?;
    let server = Server::new(Arc::clone(&ledger), config.allocator.backoff());
    let serve_handle = tokio::spawn(server.serve(listener, shutdown_rx));

    shutdown.await;
    log_daemon_info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    match scanner_handle.await {
        Ok(()) => log_scanner_info!("Background scanner stopped"),
        Err(e) => log_scanner_warn!("Scanner task ended abnormally", error = %e),
    }
    match serve_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log_daemon_warn!("Listener ended with error", error = %e),
        Err(e) => log_daemon_warn!("Listener task ended abnormally", error = %e),
    }

    if config.daemon.socket.exists() {
        std::fs::remove_file(&config.daemon.socket)?;
    }
    log_daemon_info!("tmpledgerd stopped", occupied = ledger.occupancy());
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            log_daemon_warn!("Cannot watch SIGTERM, relying on SIGINT", error = %e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
