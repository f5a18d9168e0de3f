//! Integration tests for the lifecycle manager
//!
//! External tools are replaced by a scripted runner so the whole
//! load/bootstrap → render → apply → sync sequence can be exercised against
//! a temp directory, including its failure paths.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use tempfile::tempdir;

use wgward_engine::{
    CommandRunner, ConfigRoot, ConfigStore, Error, ManagerState, PeerRecord, Result,
    ServerIdentity, Settings, WgManager,
};

/// Scripted stand-in for `wg`, `wg-quick` and `iptables`
#[derive(Default)]
struct FakeRunner {
    calls: Mutex<Vec<String>>,
    counter: AtomicUsize,
    dump: Mutex<String>,
    fail: Mutex<Option<(String, String)>>,
}

impl FakeRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn set_dump(&self, dump: &str) {
        *self.dump.lock().unwrap() = dump.to_string();
    }

    /// Make every command whose line contains `needle` fail with `stderr`
    fn fail_on(&self, needle: &str, stderr: &str) {
        *self.fail.lock().unwrap() = Some((needle.to_string(), stderr.to_string()));
    }

    fn clear_failure(&self) {
        *self.fail.lock().unwrap() = None;
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let line = format!("{} {}", command, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        if let Some((needle, stderr)) = self.fail.lock().unwrap().clone() {
            if line.contains(&needle) {
                return Err(Error::Command {
                    command: line,
                    code: 1,
                    stderr,
                });
            }
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(match (command, args.first().copied()) {
            ("wg", Some("genkey")) => format!("priv{}", n),
            ("wg", Some("pubkey")) => format!("pub-for-{}", stdin.unwrap_or("")),
            ("wg", Some("genpsk")) => format!("psk{}", n),
            ("wg", Some("show")) => self.dump.lock().unwrap().clone(),
            ("wg-quick", Some("strip")) => "stripped".to_string(),
            _ => String::new(),
        })
    }
}

fn test_settings(dir: &Path) -> Settings {
    Settings::from_toml(&format!(
        "host = \"vpn.example.com\"\nconfig_dir = \"{}\"\ncontrol_socket = \"{}\"\n",
        dir.display(),
        dir.join("ctl.sock").display()
    ))
    .unwrap()
}

async fn started_manager(dir: &Path) -> (Arc<WgManager>, Arc<FakeRunner>) {
    let runner = FakeRunner::new();
    let manager = Arc::new(WgManager::new(test_settings(dir), runner.clone()).unwrap());
    manager.start().await.unwrap();
    (manager, runner)
}

fn key() -> String {
    STANDARD.encode([9u8; 32])
}

#[tokio::test]
async fn first_boot_bootstraps_and_reaches_ready() {
    let dir = tempdir().unwrap();
    let (manager, runner) = started_manager(dir.path()).await;

    assert_eq!(manager.state().await, ManagerState::Ready);

    // Server identity generated and persisted as host 1
    let store = ConfigStore::new(dir.path(), "wg0");
    let root = store.load().await.unwrap().unwrap();
    assert_eq!(root.server_identity.address, Ipv4Addr::new(10, 8, 0, 1));
    assert!(root.peers.is_empty());

    // Control file rendered next to the document
    let conf = std::fs::read_to_string(dir.path().join("wg0.conf")).unwrap();
    assert!(conf.contains("[Interface]"));
    assert!(conf.contains("ListenPort = 51820"));

    // Teardown precedes bring-up; the one-shot sync follows it
    let calls = runner.calls();
    let down = calls.iter().position(|c| c == "wg-quick down wg0").unwrap();
    let up = calls.iter().position(|c| c == "wg-quick up wg0").unwrap();
    let sync = calls.iter().position(|c| c.starts_with("wg syncconf wg0")).unwrap();
    assert!(down < up && up < sync);

    // Masquerade, input-accept and both forward rules
    assert_eq!(calls.iter().filter(|c| c.starts_with("iptables")).count(), 4);
}

#[tokio::test]
async fn second_boot_loads_without_generating_keys() {
    let dir = tempdir().unwrap();
    {
        let (manager, _) = started_manager(dir.path()).await;
        manager.shutdown().await;
    }

    let runner = FakeRunner::new();
    let manager = Arc::new(WgManager::new(test_settings(dir.path()), runner.clone()).unwrap());
    manager.start().await.unwrap();

    assert!(!runner.calls().iter().any(|c| c == "wg genkey"));
    assert_eq!(manager.state().await, ManagerState::Ready);
}

#[tokio::test]
async fn peers_get_the_lowest_free_addresses() {
    let dir = tempdir().unwrap();
    let (manager, _) = started_manager(dir.path()).await;

    let first = manager.create_peer("alice").await.unwrap();
    let second = manager.create_peer("bob").await.unwrap();
    assert_eq!(first.address, Ipv4Addr::new(10, 8, 0, 2));
    assert_eq!(second.address, Ipv4Addr::new(10, 8, 0, 3));
    assert!(first.downloadable_config);
}

#[tokio::test]
async fn concurrent_creates_never_share_an_address() {
    let dir = tempdir().unwrap();
    let (manager, _) = started_manager(dir.path()).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.create_peer(&format!("peer-{}", i)).await.unwrap()
        }));
    }

    let mut addresses = std::collections::BTreeSet::new();
    for handle in handles {
        addresses.insert(handle.await.unwrap().address);
    }
    assert_eq!(addresses.len(), 8);
}

#[tokio::test]
async fn empty_name_is_rejected_before_anything_happens() {
    let dir = tempdir().unwrap();
    let (manager, runner) = started_manager(dir.path()).await;
    let baseline = runner.call_count();

    let err = manager.create_peer("  ").await.unwrap_err();
    assert!(matches!(err, Error::NameRequired));

    // No key generation, no allocation, no persist, no sync
    assert_eq!(runner.call_count(), baseline);
    let root = ConfigStore::new(dir.path(), "wg0").load().await.unwrap().unwrap();
    assert!(root.peers.is_empty());
}

#[tokio::test]
async fn disabling_removes_the_block_but_keeps_the_peer() {
    let dir = tempdir().unwrap();
    let (manager, _) = started_manager(dir.path()).await;

    let peer = manager.create_peer("alice").await.unwrap();
    manager.set_enabled(&peer.id, false).await.unwrap();

    let conf = std::fs::read_to_string(dir.path().join("wg0.conf")).unwrap();
    assert!(!conf.contains(&peer.public_key));

    let peers = manager.list_peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert!(!peers[0].enabled);

    manager.set_enabled(&peer.id, true).await.unwrap();
    let conf = std::fs::read_to_string(dir.path().join("wg0.conf")).unwrap();
    assert!(conf.contains(&peer.public_key));
}

#[tokio::test]
async fn readdress_distinguishes_malformed_taken_and_foreign() {
    let dir = tempdir().unwrap();
    let (manager, _) = started_manager(dir.path()).await;

    let alice = manager.create_peer("alice").await.unwrap();
    let bob = manager.create_peer("bob").await.unwrap();

    let err = manager.readdress_peer(&bob.id, "not-an-address").await.unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)));

    let err = manager.readdress_peer(&bob.id, "192.168.1.5").await.unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)));

    let err = manager
        .readdress_peer(&bob.id, &alice.address.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AddressInUse(_)));

    let err = manager.readdress_peer(&bob.id, "10.8.0.1").await.unwrap_err();
    assert!(matches!(err, Error::AddressInUse(_)));

    manager.readdress_peer(&bob.id, "10.8.0.100").await.unwrap();
    let peers = manager.list_peers().await.unwrap();
    let bob_now = peers.iter().find(|p| p.id == bob.id).unwrap();
    assert_eq!(bob_now.address, Ipv4Addr::new(10, 8, 0, 100));

    // Failed attempts left the store untouched apart from the last edit
    let root = ConfigStore::new(dir.path(), "wg0").load().await.unwrap().unwrap();
    assert_eq!(root.peers.len(), 2);
}

#[tokio::test]
async fn unknown_peer_operations_return_not_found() {
    let dir = tempdir().unwrap();
    let (manager, _) = started_manager(dir.path()).await;

    assert!(matches!(
        manager.delete_peer("ghost").await.unwrap_err(),
        Error::PeerNotFound(_)
    ));
    assert!(matches!(
        manager.peer_profile("ghost").await.unwrap_err(),
        Error::PeerNotFound(_)
    ));
    assert!(matches!(
        manager.set_enabled("ghost", false).await.unwrap_err(),
        Error::PeerNotFound(_)
    ));
}

#[tokio::test]
async fn live_status_is_overlaid_by_public_key() {
    let dir = tempdir().unwrap();
    let (manager, runner) = started_manager(dir.path()).await;

    let alice = manager.create_peer("alice").await.unwrap();
    let bob = manager.create_peer("bob").await.unwrap();

    runner.set_dump(&format!(
        "PRIV\tPUB\t51820\toff\n{}\t(none)\t203.0.113.9:7001\t{}/32\t1700000000\t1111\t2222\t25\nSTRANGER\t-\t-\t-\t0\t5\t5\toff",
        alice.public_key, alice.address
    ));

    let peers = manager.list_peers().await.unwrap();
    let alice_view = peers.iter().find(|p| p.id == alice.id).unwrap();
    let bob_view = peers.iter().find(|p| p.id == bob.id).unwrap();

    assert!(alice_view.status.latest_handshake_at.is_some());
    assert_eq!(alice_view.status.transfer_rx, Some(1111));
    assert_eq!(alice_view.status.transfer_tx, Some(2222));

    // No dump line for bob: empty status, not an error
    assert_eq!(bob_view.status.latest_handshake_at, None);
    assert_eq!(bob_view.status.transfer_rx, None);
}

#[tokio::test]
async fn dump_failure_degrades_to_persisted_data() {
    let dir = tempdir().unwrap();
    let (manager, runner) = started_manager(dir.path()).await;
    manager.create_peer("alice").await.unwrap();

    runner.fail_on("wg show", "device gone");
    let peers = manager.list_peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].status.transfer_rx, None);
}

#[tokio::test]
async fn backup_restore_round_trips_the_root() {
    let dir = tempdir().unwrap();
    let (manager, runner) = started_manager(dir.path()).await;

    // Restore validation expects well-formed keys, so rebuild the root with
    // real base64 material instead of the scripted placeholders.
    let now = Utc::now();
    let mut root = ConfigRoot::new(ServerIdentity {
        private_key: key(),
        public_key: key(),
        address: Ipv4Addr::new(10, 8, 0, 1),
    });
    root.peers.insert(
        "id-alice".into(),
        PeerRecord {
            display_name: "alice".into(),
            address: Ipv4Addr::new(10, 8, 0, 2),
            public_key: key(),
            private_key: Some(key()),
            pre_shared_key: None,
            enabled: true,
            created_at: now,
            updated_at: now,
            allowed_ips: Some("10.8.0.0/24".into()),
        },
    );
    let document = serde_json::to_string_pretty(&root).unwrap();

    let baseline = runner.call_count();
    manager.restore(&document).await.unwrap();

    // Restore is a full cycle: down, up, then sync, not just syncconf
    let tail = runner.calls()[baseline..].to_vec();
    let down = tail.iter().position(|c| c == "wg-quick down wg0").unwrap();
    let up = tail.iter().position(|c| c == "wg-quick up wg0").unwrap();
    let sync = tail.iter().position(|c| c.starts_with("wg syncconf wg0")).unwrap();
    assert!(down < up && up < sync);

    // Field-for-field round trip through backup
    let backed_up = manager.backup().await.unwrap();
    let reparsed: ConfigRoot = serde_json::from_str(&backed_up).unwrap();
    assert_eq!(reparsed, root);
}

#[tokio::test]
async fn restore_rejects_duplicate_addresses() {
    let dir = tempdir().unwrap();
    let (manager, _) = started_manager(dir.path()).await;

    let now = Utc::now();
    let mut root = ConfigRoot::new(ServerIdentity {
        private_key: key(),
        public_key: key(),
        address: Ipv4Addr::new(10, 8, 0, 1),
    });
    for id in ["a", "b"] {
        root.peers.insert(
            id.into(),
            PeerRecord {
                display_name: id.into(),
                address: Ipv4Addr::new(10, 8, 0, 2),
                public_key: key(),
                private_key: None,
                pre_shared_key: None,
                enabled: true,
                created_at: now,
                updated_at: now,
                allowed_ips: None,
            },
        );
    }
    let document = serde_json::to_string(&root).unwrap();

    let err = manager.restore(&document).await.unwrap_err();
    assert!(matches!(err, Error::AddressInUse(_)));
}

#[tokio::test]
async fn failed_sync_after_persist_is_surfaced_distinctly() {
    let dir = tempdir().unwrap();
    let (manager, runner) = started_manager(dir.path()).await;

    runner.fail_on("wg syncconf", "syncconf blew up");
    let err = manager.create_peer("alice").await.unwrap_err();
    assert!(matches!(err, Error::InterfaceOutOfSync(_)));

    // Disk and memory already agree; only the interface is stale
    let root = ConfigStore::new(dir.path(), "wg0").load().await.unwrap().unwrap();
    assert_eq!(root.peers.len(), 1);

    runner.clear_failure();
    let peers = manager.list_peers().await.unwrap();
    assert_eq!(peers.len(), 1);
}

#[tokio::test]
async fn missing_kernel_support_is_a_distinct_fatal_error() {
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.fail_on("wg-quick up", "Unable to access interface: Cannot find device \"wg0\"");

    let manager = WgManager::new(test_settings(dir.path()), runner.clone()).unwrap();
    let err = manager.start().await.unwrap_err();
    assert!(matches!(err, Error::KernelSupport(_)));
    assert!(err.is_fatal());
    assert_eq!(manager.state().await, ManagerState::Stopped);
}

#[tokio::test]
async fn generic_bring_up_failure_is_not_reclassified() {
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.fail_on("wg-quick up", "Address already in use");

    let manager = WgManager::new(test_settings(dir.path()), runner.clone()).unwrap();
    let err = manager.start().await.unwrap_err();
    match err {
        Error::Command { stderr, .. } => assert_eq!(stderr, "Address already in use"),
        other => panic!("expected Command error, got {:?}", other),
    }
}

#[tokio::test]
async fn operations_before_start_are_rejected() {
    let dir = tempdir().unwrap();
    let manager = WgManager::new(test_settings(dir.path()), FakeRunner::new()).unwrap();
    assert!(matches!(
        manager.list_peers().await.unwrap_err(),
        Error::NotRunning
    ));
    assert!(matches!(
        manager.create_peer("alice").await.unwrap_err(),
        Error::NotRunning
    ));
}

#[tokio::test]
async fn shutdown_tears_down_interface_and_firewall() {
    let dir = tempdir().unwrap();
    let (manager, runner) = started_manager(dir.path()).await;

    let baseline = runner.call_count();
    manager.shutdown().await;
    assert_eq!(manager.state().await, ManagerState::Stopped);

    let tail = runner.calls()[baseline..].to_vec();
    assert_eq!(tail.iter().filter(|c| c.contains("-D")).count(), 4);
    assert!(tail.iter().any(|c| c == "wg-quick down wg0"));

    // Idempotent
    manager.shutdown().await;
    assert_eq!(manager.state().await, ManagerState::Stopped);
}

#[tokio::test]
async fn profile_renders_through_the_manager() {
    let dir = tempdir().unwrap();
    let (manager, _) = started_manager(dir.path()).await;

    let peer = manager.create_peer("alice").await.unwrap();
    let profile = manager.peer_profile(&peer.id).await.unwrap();
    assert!(profile.contains("Endpoint = vpn.example.com:51820"));
    assert!(profile.contains(&format!("Address = {}/24", peer.address)));
    assert!(profile.contains("PersistentKeepalive = 25"));
}

#[tokio::test]
async fn control_socket_serves_peer_operations() {
    use tokio::sync::broadcast;
    use wgward_engine::{ControlClient, ControlRequest, ControlResponse, ControlServer};

    let dir = tempdir().unwrap();
    let (manager, _) = started_manager(dir.path()).await;

    let socket = dir.path().join("ctl.sock");
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let server = ControlServer::new(&socket, manager.clone(), shutdown_tx);
    let server_task = tokio::spawn(async move { server.start().await });

    // The server needs a moment to bind before the first connect
    let client = ControlClient::new(&socket);
    let mut response = None;
    for _ in 0..50 {
        match client.request(ControlRequest::Status).await {
            Ok(r) => {
                response = Some(r);
                break;
            }
            Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
        }
    }
    match response.expect("control server never came up") {
        ControlResponse::Status(status) => assert_eq!(status.interface, "wg0"),
        other => panic!("unexpected response: {:?}", other),
    }

    match client
        .request(ControlRequest::CreatePeer { name: "alice".into() })
        .await
        .unwrap()
    {
        ControlResponse::Peer(peer) => assert_eq!(peer.display_name, "alice"),
        other => panic!("unexpected response: {:?}", other),
    }

    match client.request(ControlRequest::ListPeers).await.unwrap() {
        ControlResponse::Peers { peers } => assert_eq!(peers.len(), 1),
        other => panic!("unexpected response: {:?}", other),
    }

    match client
        .request(ControlRequest::DeletePeer { id: "ghost".into() })
        .await
        .unwrap()
    {
        ControlResponse::Error { message } => assert!(message.contains("peer not found")),
        other => panic!("unexpected response: {:?}", other),
    }

    match client.request(ControlRequest::Shutdown).await.unwrap() {
        ControlResponse::Ok => {}
        other => panic!("unexpected response: {:?}", other),
    }
    shutdown_rx.recv().await.unwrap();

    server_task.abort();
}
