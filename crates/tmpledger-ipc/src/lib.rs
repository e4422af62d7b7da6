//! Wire protocol between clients and `tmpledgerd`
//!
//! Every message is a bincode-encoded [`LedgerRequest`] or [`LedgerResponse`]
//! preceded by its length as a little-endian `u32`. One connection carries
//! any number of request/response pairs, strictly alternating.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use tmpledger_core::{AllocateRequest, Allocation, Record};

/// Upper bound on one frame; an `Inspect` reply of a full default ledger fits
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub enum LedgerRequest {
    Handshake { client_version: String },
    /// Reserve a slot; waits while the ledger is full
    Allocate(AllocateRequest),
    Status,
    /// Dump every occupied record
    Inspect,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum LedgerResponse {
    HandshakeAck { server_version: String },
    Allocated(Allocation),
    StatusAck(LedgerStatus),
    Records(Vec<Record>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub ledger_path: PathBuf,
    pub capacity: u32,
    pub occupied: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: u64, max: u32 },
}

/// Write one length-prefixed frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(message)?;
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_LEN)
        .ok_or(IpcError::FrameTooLarge {
            len: bytes.len() as u64,
            max: MAX_FRAME_LEN,
        })?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. A clean disconnect before the length
/// prefix surfaces as `UnexpectedEof`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, IpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge {
            len: len as u64,
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}

/// Default daemon socket path
pub fn default_socket_path() -> &'static Path {
    Path::new("/run/tmpledger/tmpledgerd.sock")
}

/// IPC client for communicating with tmpledgerd
pub mod client {
    use super::*;
    use std::time::Duration;
    use tmpledger_core::ClientHandle;
    use tokio::net::UnixStream;
    use tracing::debug;

    pub struct LedgerClient {
        stream: UnixStream,
    }

    impl LedgerClient {
        /// Connect to daemon at default socket path
        pub async fn connect() -> anyhow::Result<Self> {
            Self::connect_to(default_socket_path()).await
        }

        /// Connect to daemon at custom socket path
        pub async fn connect_to(socket_path: &Path) -> anyhow::Result<Self> {
            let stream = UnixStream::connect(socket_path).await.map_err(|e| {
                anyhow::anyhow!("Failed to connect to {}: {}", socket_path.display(), e)
            })?;
            Ok(Self { stream })
        }

        /// Send a request and receive response
        pub async fn send(&mut self, request: &LedgerRequest) -> anyhow::Result<LedgerResponse> {
            write_frame(&mut self.stream, request).await?;
            Ok(read_frame(&mut self.stream).await?)
        }

        /// Handshake with daemon
        pub async fn handshake(&mut self) -> anyhow::Result<String> {
            let request = LedgerRequest::Handshake {
                client_version: env!("CARGO_PKG_VERSION").to_string(),
            };
            match self.send(&request).await? {
                LedgerResponse::HandshakeAck { server_version } => Ok(server_version),
                LedgerResponse::Error(e) => anyhow::bail!("Handshake failed: {}", e),
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }

        /// Reserve a slot. The daemon holds the reply while its ledger is full.
        pub async fn allocate(&mut self, request: AllocateRequest) -> anyhow::Result<Allocation> {
            match self.send(&LedgerRequest::Allocate(request)).await? {
                LedgerResponse::Allocated(allocation) => Ok(allocation),
                LedgerResponse::Error(e) => anyhow::bail!("Allocate failed: {}", e),
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }

        /// Allocate a slot for `file_path` and attach a handle to it.
        pub async fn register(
            &mut self,
            file_path: &Path,
            delay: Duration,
            caller_msg: &str,
        ) -> anyhow::Result<ClientHandle> {
            let request = ClientHandle::request_for(file_path, caller_msg.to_string())?;
            let allocation = self.allocate(request).await?;
            debug!(index = allocation.index, "Slot allocated by daemon");
            Ok(ClientHandle::attach(&allocation, delay)?)
        }

        /// Get daemon status
        pub async fn status(&mut self) -> anyhow::Result<LedgerStatus> {
            match self.send(&LedgerRequest::Status).await? {
                LedgerResponse::StatusAck(status) => Ok(status),
                LedgerResponse::Error(e) => anyhow::bail!("Status failed: {}", e),
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }

        /// Fetch every occupied record
        pub async fn inspect(&mut self) -> anyhow::Result<Vec<Record>> {
            match self.send(&LedgerRequest::Inspect).await? {
                LedgerResponse::Records(records) => Ok(records),
                LedgerResponse::Error(e) => anyhow::bail!("Inspect failed: {}", e),
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }
    }
}
