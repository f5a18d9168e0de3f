//! Control socket for managing a running instance
//!
//! A Unix domain socket carrying one line-delimited JSON request and one
//! response per connection. The management CLI is the only intended client;
//! the socket is created owner read/write only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::manager::{ManagerStatus, WgManager};
use crate::store::PeerView;

/// Default socket path for the control socket
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/wgward.sock";

/// Request messages sent to the control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
    /// Get interface status
    #[serde(rename = "status")]
    Status,

    /// List peers with live link state
    #[serde(rename = "list_peers")]
    ListPeers,

    /// Create a peer
    #[serde(rename = "create_peer")]
    CreatePeer { name: String },

    /// Delete a peer
    #[serde(rename = "delete_peer")]
    DeletePeer { id: String },

    /// Enable or disable a peer
    #[serde(rename = "set_peer_enabled")]
    SetPeerEnabled { id: String, enabled: bool },

    /// Rename a peer
    #[serde(rename = "rename_peer")]
    RenamePeer { id: String, name: String },

    /// Move a peer to a specific tunnel address
    #[serde(rename = "readdress_peer")]
    ReaddressPeer { id: String, address: String },

    /// Render a peer's client profile
    #[serde(rename = "peer_profile")]
    PeerProfile { id: String },

    /// Serialize the whole configuration
    #[serde(rename = "backup")]
    Backup,

    /// Replace the whole configuration from a backup document
    #[serde(rename = "restore")]
    Restore { document: String },

    /// Request graceful shutdown
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response messages from the control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlResponse {
    /// Status response
    #[serde(rename = "status")]
    Status(ManagerStatus),

    /// Peer list
    #[serde(rename = "peers")]
    Peers { peers: Vec<PeerView> },

    /// A single peer
    #[serde(rename = "peer")]
    Peer(PeerView),

    /// Rendered text (profile or backup document)
    #[serde(rename = "text")]
    Text { text: String },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },

    /// Success acknowledgment
    #[serde(rename = "ok")]
    Ok,
}

/// Control socket server
pub struct ControlServer {
    socket_path: PathBuf,
    manager: Arc<WgManager>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ControlServer {
    pub fn new(
        socket_path: impl AsRef<Path>,
        manager: Arc<WgManager>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            manager,
            shutdown_tx,
        }
    }

    /// Bind the socket and serve requests until the task is dropped
    pub async fn start(&self) -> Result<()> {
        // A stale socket file from a previous run would block the bind
        let _ = std::fs::remove_file(&self.socket_path);
        if let Some(parent) = self.socket_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| Error::ControlSocket(format!("failed to bind {:?}: {}", self.socket_path, e)))?;

        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&self.socket_path, perms);
        }

        log::info!("control socket listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let manager = self.manager.clone();
                    let shutdown_tx = self.shutdown_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, manager, shutdown_tx).await {
                            log::debug!("control connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    log::warn!("control socket accept error: {}", e);
                }
            }
        }
    }

    /// Remove the socket file
    pub fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn handle_connection(
    stream: UnixStream,
    manager: Arc<WgManager>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| Error::ControlSocket(format!("failed to read request: {}", e)))?;
    if line.trim().is_empty() {
        return Ok(());
    }

    let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
        Ok(request) => handle_request(request, &manager, &shutdown_tx).await,
        Err(e) => ControlResponse::Error {
            message: format!("invalid request: {}", e),
        },
    };

    let response_json = serde_json::to_string(&response)
        .map_err(|e| Error::ControlSocket(format!("failed to serialize response: {}", e)))?;

    writer
        .write_all(response_json.as_bytes())
        .await
        .map_err(|e| Error::ControlSocket(format!("failed to write response: {}", e)))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| Error::ControlSocket(format!("failed to write newline: {}", e)))?;

    Ok(())
}

async fn handle_request(
    request: ControlRequest,
    manager: &WgManager,
    shutdown_tx: &broadcast::Sender<()>,
) -> ControlResponse {
    let result = match request {
        ControlRequest::Status => manager.status().await.map(ControlResponse::Status),
        ControlRequest::ListPeers => manager
            .list_peers()
            .await
            .map(|peers| ControlResponse::Peers { peers }),
        ControlRequest::CreatePeer { name } => {
            manager.create_peer(&name).await.map(ControlResponse::Peer)
        }
        ControlRequest::DeletePeer { id } => {
            manager.delete_peer(&id).await.map(|_| ControlResponse::Ok)
        }
        ControlRequest::SetPeerEnabled { id, enabled } => manager
            .set_enabled(&id, enabled)
            .await
            .map(|_| ControlResponse::Ok),
        ControlRequest::RenamePeer { id, name } => manager
            .rename_peer(&id, &name)
            .await
            .map(|_| ControlResponse::Ok),
        ControlRequest::ReaddressPeer { id, address } => manager
            .readdress_peer(&id, &address)
            .await
            .map(|_| ControlResponse::Ok),
        ControlRequest::PeerProfile { id } => manager
            .peer_profile(&id)
            .await
            .map(|text| ControlResponse::Text { text }),
        ControlRequest::Backup => manager
            .backup()
            .await
            .map(|text| ControlResponse::Text { text }),
        ControlRequest::Restore { document } => {
            manager.restore(&document).await.map(|_| ControlResponse::Ok)
        }
        ControlRequest::Shutdown => {
            let _ = shutdown_tx.send(());
            Ok(ControlResponse::Ok)
        }
    };

    result.unwrap_or_else(|e| ControlResponse::Error {
        message: e.to_string(),
    })
}

/// Control socket client for a running instance
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Send a request and wait for the response
    pub async fn request(&self, request: ControlRequest) -> Result<ControlResponse> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::ControlSocket(format!(
                "failed to connect to {:?}: {}. Is the server running?",
                self.socket_path, e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request_json = serde_json::to_string(&request)
            .map_err(|e| Error::ControlSocket(format!("failed to serialize request: {}", e)))?;
        writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| Error::ControlSocket(format!("failed to send request: {}", e)))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| Error::ControlSocket(format!("failed to send newline: {}", e)))?;

        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .map_err(|_| Error::ControlSocket("timeout waiting for response".into()))?
            .map_err(|e| Error::ControlSocket(format!("failed to read response: {}", e)))?;

        let response: ControlResponse = serde_json::from_str(line.trim())
            .map_err(|e| Error::ControlSocket(format!("invalid response: {}", e)))?;

        Ok(response)
    }
}
