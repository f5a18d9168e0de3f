//! Persisted configuration document and its store
//!
//! The whole server state lives in one JSON document: the server identity
//! plus a map of peer records keyed by id. Every mutation re-serializes the
//! whole document; there is no peer-level partial update on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Error, Result};
use crate::status::PeerStatus;

/// The server's own key pair and tunnel address
///
/// Created once at bootstrap; immutable afterwards except by full restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIdentity {
    pub private_key: String,
    pub public_key: String,
    pub address: Ipv4Addr,
}

/// A peer authorized to join the VPN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub display_name: String,
    pub address: Ipv4Addr,
    pub public_key: String,
    /// Absent for peers whose private key was never stored server-side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_shared_key: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Per-peer override of the profile AllowedIPs policy
    #[serde(default, rename = "allowedIPs", skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<String>,
}

/// The single unit of persistence and of atomic replace during restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRoot {
    pub server_identity: ServerIdentity,
    #[serde(default)]
    pub peers: BTreeMap<String, PeerRecord>,
}

impl ConfigRoot {
    /// Create a root with no peers
    pub fn new(server_identity: ServerIdentity) -> Self {
        Self {
            server_identity,
            peers: BTreeMap::new(),
        }
    }

    /// All addresses currently assigned, server included
    pub fn assigned_addresses(&self) -> BTreeSet<Ipv4Addr> {
        let mut assigned: BTreeSet<Ipv4Addr> =
            self.peers.values().map(|p| p.address).collect();
        assigned.insert(self.server_identity.address);
        assigned
    }

    /// Look up a peer by id
    pub fn peer(&self, id: &str) -> Result<&PeerRecord> {
        self.peers
            .get(id)
            .ok_or_else(|| Error::PeerNotFound(id.to_string()))
    }

    /// Look up a peer by id for mutation
    pub fn peer_mut(&mut self, id: &str) -> Result<&mut PeerRecord> {
        self.peers
            .get_mut(id)
            .ok_or_else(|| Error::PeerNotFound(id.to_string()))
    }

    /// Check whether an address is taken by the server or any peer other
    /// than `exclude_id`
    pub fn address_taken(&self, address: Ipv4Addr, exclude_id: Option<&str>) -> bool {
        if self.server_identity.address == address {
            return true;
        }
        self.peers
            .iter()
            .any(|(id, p)| p.address == address && Some(id.as_str()) != exclude_id)
    }
}

/// A peer as seen by collaborators: the persisted record merged with live
/// link state read from the running interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerView {
    pub id: String,
    pub display_name: String,
    pub address: Ipv4Addr,
    pub public_key: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Option<String>,
    /// Whether a full profile (with private key) can be rendered
    pub downloadable_config: bool,
    /// Live link state; never persisted
    #[serde(flatten)]
    pub status: PeerStatus,
}

impl PeerView {
    /// Build a view from a stored record, with empty live status
    pub fn from_record(id: &str, record: &PeerRecord) -> Self {
        Self {
            id: id.to_string(),
            display_name: record.display_name.clone(),
            address: record.address,
            public_key: record.public_key.clone(),
            enabled: record.enabled,
            created_at: record.created_at,
            updated_at: record.updated_at,
            allowed_ips: record.allowed_ips.clone(),
            downloadable_config: record.private_key.is_some(),
            status: PeerStatus::default(),
        }
    }
}

/// On-disk store for the configuration document
///
/// `persist` is crash-atomic: the document is written to a temp file in the
/// same directory and renamed over the target, so a reader observes either
/// the previous document or the new one, never a partial write.
pub struct ConfigStore {
    document_path: PathBuf,
    control_file_path: PathBuf,
}

impl ConfigStore {
    /// Create a store rooted at `config_dir` for the given interface
    pub fn new(config_dir: &Path, interface: &str) -> Self {
        Self {
            document_path: config_dir.join(format!("{}.json", interface)),
            control_file_path: config_dir.join(format!("{}.conf", interface)),
        }
    }

    /// Path of the persisted document
    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    /// Path of the rendered control file
    pub fn control_file_path(&self) -> &Path {
        &self.control_file_path
    }

    /// Load the persisted document, or `None` when it does not exist yet
    pub async fn load(&self) -> Result<Option<ConfigRoot>> {
        let bytes = match fs::read(&self.document_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let root: ConfigRoot = serde_json::from_slice(&bytes)?;
        Ok(Some(root))
    }

    /// Write the document durably
    pub async fn persist(&self, root: &ConfigRoot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(root)?;
        write_atomic(&self.document_path, &bytes).await
    }

    /// Write the rendered control file durably
    pub async fn write_control_file(&self, content: &str) -> Result<()> {
        write_atomic(&self.control_file_path, content.as_bytes()).await
    }
}

/// Write bytes via temp file + rename in the same directory
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    // Appending keeps the document and the control file on distinct temp
    // paths even though they share a stem.
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, bytes).await?;
    fs::rename(&tmp_path, path).await?;

    Ok(())
}
