//! Rendering of the interface control file and peer profiles
//!
//! Both renderers are pure functions of their inputs: no I/O, no process
//! execution, testable by string comparison. Writing the result to disk and
//! pushing it at the interface are the manager's job.

use std::fmt::Write;

use crate::config::{Hooks, PeerDefaults};
use crate::store::{ConfigRoot, PeerRecord, ServerIdentity};

/// Placeholder written into profiles for peers whose private key was never
/// stored server-side
pub const PRIVATE_KEY_PLACEHOLDER: &str = "REPLACE_ME";

/// Render the interface control file
///
/// Emits the `[Interface]` section followed by one `[Peer]` block per
/// enabled peer. Disabled peers are omitted entirely: disabling removes a
/// peer from the active topology without losing its stored metadata.
pub fn interface_config(root: &ConfigRoot, listen_port: u16, hooks: &Hooks) -> String {
    let mut out = String::new();

    out.push_str("# Note: Do not edit this file directly.\n");
    out.push_str("# Your changes will be overwritten!\n");
    out.push_str("\n# Server\n[Interface]\n");
    let _ = writeln!(out, "PrivateKey = {}", root.server_identity.private_key);
    let _ = writeln!(out, "Address = {}/24", root.server_identity.address);
    let _ = writeln!(out, "ListenPort = {}", listen_port);
    for (key, value) in [
        ("PreUp", &hooks.pre_up),
        ("PostUp", &hooks.post_up),
        ("PreDown", &hooks.pre_down),
        ("PostDown", &hooks.post_down),
    ] {
        if !value.is_empty() {
            let _ = writeln!(out, "{} = {}", key, value);
        }
    }

    for (id, peer) in &root.peers {
        if !peer.enabled {
            continue;
        }

        let _ = write!(out, "\n# Client: {} ({})\n[Peer]\n", peer.display_name, id);
        let _ = writeln!(out, "PublicKey = {}", peer.public_key);
        if let Some(psk) = &peer.pre_shared_key {
            let _ = writeln!(out, "PresharedKey = {}", psk);
        }
        let _ = writeln!(out, "AllowedIPs = {}/32", peer.address);
    }

    out
}

/// Render a peer-facing profile
///
/// The `[Interface]` section uses the peer's own private key, or a
/// placeholder token when the key is not stored. The `[Peer]` section
/// points back at the server.
pub fn peer_profile(
    server: &ServerIdentity,
    peer: &PeerRecord,
    defaults: &PeerDefaults,
    endpoint_host: &str,
    endpoint_port: u16,
) -> String {
    let mut out = String::new();

    out.push_str("[Interface]\n");
    let _ = writeln!(
        out,
        "PrivateKey = {}",
        peer.private_key.as_deref().unwrap_or(PRIVATE_KEY_PLACEHOLDER)
    );
    let _ = writeln!(out, "Address = {}/24", peer.address);
    if let Some(dns) = defaults.dns.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "DNS = {}", dns);
    }
    if let Some(mtu) = defaults.mtu {
        let _ = writeln!(out, "MTU = {}", mtu);
    }

    out.push_str("\n[Peer]\n");
    let _ = writeln!(out, "PublicKey = {}", server.public_key);
    if let Some(psk) = &peer.pre_shared_key {
        let _ = writeln!(out, "PresharedKey = {}", psk);
    }
    let _ = writeln!(
        out,
        "AllowedIPs = {}",
        peer.allowed_ips.as_deref().unwrap_or(&defaults.allowed_ips)
    );
    let _ = writeln!(out, "PersistentKeepalive = {}", defaults.persistent_keepalive);
    let _ = writeln!(out, "Endpoint = {}:{}", endpoint_host, endpoint_port);

    out
}
