//! Lifecycle manager for the WireGuard interface
//!
//! The manager owns the configuration root and sequences everything around
//! it: loading or bootstrapping the persisted document, rendering and
//! applying the control file, and serializing peer mutations so the
//! document, the in-memory state and the running interface never diverge.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::alloc::AddressTemplate;
use crate::command::CommandRunner;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::firewall::Firewall;
use crate::render;
use crate::status::{overlay, parse_dump};
use crate::store::{ConfigRoot, ConfigStore, PeerRecord, PeerView, ServerIdentity};
use crate::wg::{validate_key, WgControl};

/// Manager lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Created but not started
    Uninitialized,
    /// Loading the persisted document
    Loading,
    /// First run: generating the server identity
    Bootstrapping,
    /// Interface up and synced; operations accepted
    Ready,
    /// Graceful teardown in progress
    ShuttingDown,
    /// Terminal state
    Stopped,
}

impl ManagerState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ManagerState::Ready)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ManagerState::Uninitialized => "Uninitialized",
            ManagerState::Loading => "Loading...",
            ManagerState::Bootstrapping => "Bootstrapping...",
            ManagerState::Ready => "Ready",
            ManagerState::ShuttingDown => "Shutting down...",
            ManagerState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Point-in-time summary of the managed interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub state: String,
    pub interface: String,
    pub listen_port: u16,
    pub server_address: Ipv4Addr,
    pub server_public_key: String,
    pub peer_count: usize,
    pub peers_enabled: usize,
}

/// The lifecycle manager
///
/// All mutating operations serialize through a single writer lock for their
/// full validate → persist → commit → sync span; reads clone a snapshot of
/// the root and may run concurrently.
pub struct WgManager {
    settings: Settings,
    template: AddressTemplate,
    store: ConfigStore,
    wg: WgControl,
    firewall: Mutex<Firewall>,
    root: RwLock<Option<ConfigRoot>>,
    state: RwLock<ManagerState>,
    write_lock: Mutex<()>,
}

impl WgManager {
    /// Create a manager; validates settings but touches nothing on disk
    pub fn new(settings: Settings, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        settings.validate()?;
        let template = AddressTemplate::parse(&settings.address_template)?;
        let store = ConfigStore::new(&settings.config_dir, &settings.interface);
        let wg = WgControl::new(runner.clone(), settings.interface.clone());
        let firewall = Mutex::new(Firewall::new(runner));

        Ok(Self {
            settings,
            template,
            store,
            wg,
            firewall,
            root: RwLock::new(None),
            state: RwLock::new(ManagerState::Uninitialized),
            write_lock: Mutex::new(()),
        })
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    /// Settings the manager was built with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn set_state(&self, state: ManagerState) {
        *self.state.write().await = state;
    }

    async fn ensure_ready(&self) -> Result<()> {
        if self.state().await.is_ready() {
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    async fn snapshot(&self) -> Result<ConfigRoot> {
        self.root.read().await.clone().ok_or(Error::NotRunning)
    }

    /// Load or bootstrap the configuration and bring the interface up
    ///
    /// Sequencing: persist → write control file → tear down any previous
    /// instance (idempotent) → bring up → firewall → one-shot sync. After
    /// this, peer edits use the incremental sync path.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.state().await != ManagerState::Uninitialized {
            return Err(Error::AlreadyRunning);
        }
        self.set_state(ManagerState::Loading).await;

        match self.start_inner().await {
            Ok(()) => {
                self.set_state(ManagerState::Ready).await;
                log::info!(
                    "interface {} up on udp/{}",
                    self.settings.interface,
                    self.settings.port
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ManagerState::Stopped).await;
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<()> {
        let root = match self.store.load().await? {
            Some(root) => {
                log::info!("configuration loaded from {:?}", self.store.document_path());
                root
            }
            None => {
                self.set_state(ManagerState::Bootstrapping).await;
                let root = self.bootstrap().await?;
                log::info!("configuration generated; server {}", root.server_identity.address);
                root
            }
        };

        self.store.persist(&root).await?;
        self.write_rendered(&root).await?;

        // The previous instance may or may not exist; a failed teardown of
        // a nonexistent interface is not fatal.
        if let Err(e) = self.wg.interface_down().await {
            log::debug!("previous interface not torn down: {}", e);
        }

        self.wg.interface_up().await?;

        if self.settings.nat.enabled {
            self.firewall
                .lock()
                .await
                .apply(
                    root.server_identity.address,
                    self.settings.port,
                    &self.settings.interface,
                    &self.settings.nat.interface,
                )
                .await?;
        }

        self.wg.sync().await?;

        *self.root.write().await = Some(root);
        Ok(())
    }

    async fn bootstrap(&self) -> Result<ConfigRoot> {
        let private_key = self.wg.generate_private_key().await?;
        let public_key = self.wg.derive_public_key(&private_key).await?;
        let address = self.template.server_address()?;

        Ok(ConfigRoot::new(ServerIdentity {
            private_key,
            public_key,
            address,
        }))
    }

    async fn write_rendered(&self, root: &ConfigRoot) -> Result<()> {
        let rendered = render::interface_config(root, self.settings.port, &self.settings.hooks);
        self.store.write_control_file(&rendered).await
    }

    /// Apply one mutation: validate against a cloned root, persist, commit,
    /// then push the delta at the running interface
    ///
    /// Persistence precedes sync, so a crash or sync failure can never
    /// leave the on-disk document behind an already-applied live change.
    /// When sync fails the store and the document still agree; only the
    /// interface is stale, and the caller sees that as a distinct error.
    async fn mutate<F>(&self, apply: F) -> Result<ConfigRoot>
    where
        F: FnOnce(&mut ConfigRoot) -> Result<()>,
    {
        let _guard = self.write_lock.lock().await;
        self.ensure_ready().await?;

        let mut next = self.snapshot().await?;
        apply(&mut next)?;

        self.store.persist(&next).await?;
        self.write_rendered(&next).await?;
        *self.root.write().await = Some(next.clone());

        if let Err(e) = self.wg.sync().await {
            return Err(Error::InterfaceOutOfSync(e.to_string()));
        }

        Ok(next)
    }

    /// List peers with best-effort live status overlaid
    pub async fn list_peers(&self) -> Result<Vec<PeerView>> {
        self.ensure_ready().await?;
        let root = self.snapshot().await?;

        let mut views: Vec<PeerView> = root
            .peers
            .iter()
            .map(|(id, record)| PeerView::from_record(id, record))
            .collect();
        views.sort_by_key(|v| v.address);

        match self.wg.show_dump().await {
            Ok(dump) => overlay(&mut views, &parse_dump(&dump)),
            Err(e) => log::warn!("could not read interface status: {}", e),
        }

        Ok(views)
    }

    /// Create a peer: generate its key material, allocate the lowest free
    /// address, persist and sync
    pub async fn create_peer(&self, name: &str) -> Result<PeerView> {
        self.ensure_ready().await?;
        if name.trim().is_empty() {
            return Err(Error::NameRequired);
        }

        let private_key = self.wg.generate_private_key().await?;
        let public_key = self.wg.derive_public_key(&private_key).await?;
        let pre_shared_key = self.wg.generate_preshared_key().await?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let template = self.template.clone();
        let name = name.trim().to_string();

        let record_id = id.clone();
        let root = self
            .mutate(move |root| {
                let address = template.allocate(&root.assigned_addresses())?;
                root.peers.insert(
                    record_id,
                    PeerRecord {
                        display_name: name,
                        address,
                        public_key,
                        private_key: Some(private_key),
                        pre_shared_key: Some(pre_shared_key),
                        enabled: true,
                        created_at: now,
                        updated_at: now,
                        allowed_ips: None,
                    },
                );
                Ok(())
            })
            .await?;

        let record = root.peer(&id)?;
        log::info!("peer \"{}\" created at {}", record.display_name, record.address);
        Ok(PeerView::from_record(&id, record))
    }

    /// Delete a peer
    pub async fn delete_peer(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.mutate(move |root| {
            root.peers
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| Error::PeerNotFound(id.clone()))
        })
        .await?;
        Ok(())
    }

    /// Enable or disable a peer without losing its stored metadata
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let id = id.to_string();
        self.mutate(move |root| {
            let peer = root.peer_mut(&id)?;
            peer.enabled = enabled;
            peer.updated_at = Utc::now();
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Rename a peer
    pub async fn rename_peer(&self, id: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::NameRequired);
        }
        let id = id.to_string();
        let name = name.trim().to_string();
        self.mutate(move |root| {
            let peer = root.peer_mut(&id)?;
            peer.display_name = name;
            peer.updated_at = Utc::now();
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Move a peer to a specific address within the tunnel network
    pub async fn readdress_peer(&self, id: &str, address: &str) -> Result<()> {
        let parsed: Ipv4Addr = address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        if self.template.host_of(parsed).is_none() {
            return Err(Error::InvalidAddress(format!(
                "{} is outside the tunnel network {}",
                parsed, self.settings.address_template
            )));
        }

        let id = id.to_string();
        self.mutate(move |root| {
            root.peer(&id)?;
            if root.address_taken(parsed, Some(&id)) {
                return Err(Error::AddressInUse(parsed.to_string()));
            }
            let peer = root.peer_mut(&id)?;
            peer.address = parsed;
            peer.updated_at = Utc::now();
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Render the client-facing profile for a peer
    pub async fn peer_profile(&self, id: &str) -> Result<String> {
        self.ensure_ready().await?;
        let root = self.snapshot().await?;
        let peer = root.peer(id)?;
        Ok(render::peer_profile(
            &root.server_identity,
            peer,
            &self.settings.peer_defaults,
            &self.settings.host,
            self.settings.port,
        ))
    }

    /// Serialize the whole configuration root
    pub async fn backup(&self) -> Result<String> {
        self.ensure_ready().await?;
        let root = self.snapshot().await?;
        Ok(serde_json::to_string_pretty(&root)?)
    }

    /// Replace the whole configuration root from a backup document
    ///
    /// Unlike per-peer edits this performs a full interface cycle: an
    /// incremental sync cannot change the interface's own private key, so a
    /// restored server identity only reaches the data plane through a
    /// fresh bring-up.
    pub async fn restore(&self, document: &str) -> Result<()> {
        let root: ConfigRoot = serde_json::from_str(document)?;
        Self::validate_root(&root, &self.template)?;

        let _guard = self.write_lock.lock().await;
        self.ensure_ready().await?;

        self.store.persist(&root).await?;
        self.write_rendered(&root).await?;
        *self.root.write().await = Some(root.clone());

        let mut firewall = self.firewall.lock().await;
        firewall.remove().await;
        if let Err(e) = self.wg.interface_down().await {
            log::debug!("interface not torn down before restore bring-up: {}", e);
        }
        self.wg.interface_up().await?;
        if self.settings.nat.enabled {
            firewall
                .apply(
                    root.server_identity.address,
                    self.settings.port,
                    &self.settings.interface,
                    &self.settings.nat.interface,
                )
                .await?;
        }
        self.wg.sync().await?;

        log::info!("configuration restored ({} peers)", root.peers.len());
        Ok(())
    }

    fn validate_root(root: &ConfigRoot, template: &AddressTemplate) -> Result<()> {
        validate_key(&root.server_identity.private_key)?;
        validate_key(&root.server_identity.public_key)?;

        let mut seen = std::collections::BTreeSet::new();
        seen.insert(root.server_identity.address);

        for (id, peer) in &root.peers {
            if peer.display_name.trim().is_empty() {
                return Err(Error::NameRequired);
            }
            validate_key(&peer.public_key)?;
            if template.host_of(peer.address).is_none() {
                return Err(Error::InvalidAddress(format!(
                    "peer {} at {} is outside the tunnel network",
                    id, peer.address
                )));
            }
            if !seen.insert(peer.address) {
                return Err(Error::AddressInUse(peer.address.to_string()));
            }
            if let Some(policy) = &peer.allowed_ips {
                crate::config::validate_allowed_ips(policy).map_err(|_| {
                    Error::InvalidAddress(format!("peer {} allowedIPs \"{}\"", id, policy))
                })?;
            }
        }
        Ok(())
    }

    /// Summary for status queries
    pub async fn status(&self) -> Result<ManagerStatus> {
        let state = self.state().await;
        let root = self.snapshot().await?;
        Ok(ManagerStatus {
            state: state.to_string(),
            interface: self.settings.interface.clone(),
            listen_port: self.settings.port,
            server_address: root.server_identity.address,
            server_public_key: root.server_identity.public_key.clone(),
            peer_count: root.peers.len(),
            peers_enabled: root.peers.values().filter(|p| p.enabled).count(),
        })
    }

    /// Tear down the interface and firewall rules
    ///
    /// Idempotent: shutting down an already-stopped manager is a no-op, and
    /// teardown failures are logged rather than propagated.
    pub async fn shutdown(&self) {
        let _guard = self.write_lock.lock().await;
        if self.state().await == ManagerState::Stopped {
            return;
        }
        self.set_state(ManagerState::ShuttingDown).await;

        self.firewall.lock().await.remove().await;
        if let Err(e) = self.wg.interface_down().await {
            log::warn!("interface teardown failed: {}", e);
        }

        self.set_state(ManagerState::Stopped).await;
        log::info!("stopped");
    }
}
