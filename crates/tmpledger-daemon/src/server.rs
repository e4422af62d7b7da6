//! Unix domain socket listener for tmpledgerd
//!
//! Each connection is served by its own task. Requests on one connection
//! are answered in order; an `Allocate` against a full ledger holds its
//! connection until a slot frees up.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tmpledger_config::{log_daemon_debug, log_daemon_error, log_daemon_info, log_ipc_debug, log_ipc_warn};
use tmpledger_core::{spawn_allocate_with_backoff, Ledger};
use tmpledger_ipc::{read_frame, write_frame, IpcError, LedgerRequest, LedgerResponse, LedgerStatus};
use tokio::io::Interest;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

/// How often a waiting connection with unread bytes is re-checked for hang-up
const HANGUP_POLL: Duration = Duration::from_millis(100);

/// Bind the daemon socket, replacing a stale socket file
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create socket directory {}", parent.display()))?;
    }
    if socket_path.exists() {
        log_daemon_debug!("Removing stale socket", socket = %socket_path.display());
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    log_daemon_info!("Listening for connections", socket = %socket_path.display());
    Ok(listener)
}

#[derive(Clone)]
pub struct Server {
    ledger: Arc<Ledger>,
    backoff: Duration,
}

impl Server {
    pub fn new(ledger: Arc<Ledger>, backoff: Duration) -> Self {
        Self { ledger, backoff }
    }

    /// Accept connections until `shutdown` flips to true
    pub async fn serve(self, listener: UnixListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_client(stream).await {
                                log_ipc_warn!("Client handler error", error = %e);
                            }
                        });
                    }
                    Err(e) => log_daemon_error!("Accept failed", error = %e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_client(&self, mut stream: UnixStream) -> Result<()> {
        let peer_pid = stream.peer_cred().ok().and_then(|cred| cred.pid());
        log_ipc_debug!("New client connected", peer_pid = ?peer_pid);

        loop {
            let request: LedgerRequest = match read_frame(&mut stream).await {
                Ok(request) => request,
                Err(IpcError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log_ipc_debug!("Client disconnected", peer_pid = ?peer_pid);
                    return Ok(());
                }
                Err(IpcError::Encoding(e)) => {
                    log_ipc_warn!("Failed to deserialize request", error = %e);
                    let response = LedgerResponse::Error(format!("Deserialize error: {}", e));
                    write_frame(&mut stream, &response).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            log_ipc_debug!("Received request", request = ?request);
            let response = match request {
                LedgerRequest::Allocate(_) => tokio::select! {
                    biased;
                    response = self.handle_request(request) => response,
                    _ = peer_hung_up(&stream) => {
                        log_ipc_warn!("Client left while waiting for a slot", peer_pid = ?peer_pid);
                        return Ok(());
                    }
                },
                other => self.handle_request(other).await,
            };
            write_frame(&mut stream, &response).await?;
        }
    }

    pub async fn handle_request(&self, request: LedgerRequest) -> LedgerResponse {
        match request {
            LedgerRequest::Handshake { client_version } => {
                log_ipc_debug!("Handshake", client_version = %client_version);
                LedgerResponse::HandshakeAck {
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                }
            }
            LedgerRequest::Allocate(request) => {
                let attempt = spawn_allocate_with_backoff(Arc::clone(&self.ledger), request.clone(), self.backoff);
                match attempt.await {
                    Ok(allocation) => {
                        log_daemon_info!(
                            "Slot allocated",
                            index = allocation.index,
                            pid = request.pid,
                            file = %request.file_path
                        );
                        LedgerResponse::Allocated(allocation)
                    }
                    Err(e) => LedgerResponse::Error(e.to_string()),
                }
            }
            LedgerRequest::Status => LedgerResponse::StatusAck(LedgerStatus {
                ledger_path: self.ledger.path().to_path_buf(),
                capacity: self.ledger.max_slots(),
                occupied: self.ledger.occupancy() as u64,
            }),
            LedgerRequest::Inspect => LedgerResponse::Records(self.ledger.records()),
        }
    }
}

/// Resolves once the peer has closed its end of the connection.
async fn peer_hung_up(stream: &UnixStream) {
    loop {
        match stream.ready(Interest::READABLE).await {
            Ok(ready) if ready.is_read_closed() => return,
            // Pipelined bytes keep the socket readable; poll until hang-up
            Ok(_) => tokio::time::sleep(HANGUP_POLL).await,
            Err(_) => return,
        }
    }
}
