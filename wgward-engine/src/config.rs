//! Runtime settings for the configuration engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main settings structure
///
/// The settings file uses TOML format. Only `host` is required; everything
/// else has defaults matching a stock single-interface deployment.
///
/// # Example Configuration
///
/// ```toml
/// host = "vpn.example.com"
/// port = 51820
/// interface = "wg0"
/// address_template = "10.8.0.x"
///
/// [peer_defaults]
/// dns = "1.1.1.1"
/// allowed_ips = "0.0.0.0/0, ::/0"
/// persistent_keepalive = 25
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Publicly reachable host clients connect to (required)
    #[serde(default)]
    pub host: String,

    /// UDP listen port for the interface
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name of the WireGuard interface
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Tunnel address template with a single `x` host placeholder
    #[serde(default = "default_address_template")]
    pub address_template: String,

    /// Directory holding the persisted document and the control file
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Path of the control socket for the management CLI
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,

    /// Deadline in seconds for each external command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Defaults baked into rendered peer profiles
    #[serde(default)]
    pub peer_defaults: PeerDefaults,

    /// Interface lifecycle hooks
    #[serde(default)]
    pub hooks: Hooks,

    /// NAT/masquerading settings
    #[serde(default)]
    pub nat: NatSettings,
}

/// Defaults for rendered peer profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDefaults {
    /// DNS server pushed to peers (empty disables the DNS line)
    #[serde(default = "default_dns")]
    pub dns: Option<String>,

    /// MTU pushed to peers (omitted when not set)
    pub mtu: Option<u16>,

    /// AllowedIPs policy written into peer profiles
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: String,

    /// PersistentKeepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub persistent_keepalive: u16,
}

impl Default for PeerDefaults {
    fn default() -> Self {
        Self {
            dns: default_dns(),
            mtu: None,
            allowed_ips: default_allowed_ips(),
            persistent_keepalive: default_keepalive(),
        }
    }
}

/// Interface lifecycle hook commands
///
/// Empty hooks are omitted from the rendered control file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub pre_up: String,
    #[serde(default)]
    pub post_up: String,
    #[serde(default)]
    pub pre_down: String,
    #[serde(default)]
    pub post_down: String,
}

/// NAT/masquerading settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatSettings {
    /// Enable masquerading and forwarding rules for peer traffic
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Outbound interface for masquerading
    #[serde(default = "default_nat_interface")]
    pub interface: String,
}

impl Default for NatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: default_nat_interface(),
        }
    }
}

fn default_port() -> u16 {
    51820
}

fn default_interface() -> String {
    "wg0".to_string()
}

fn default_address_template() -> String {
    "10.8.0.x".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/wireguard")
}

fn default_control_socket() -> PathBuf {
    PathBuf::from("/var/run/wgward.sock")
}

fn default_command_timeout() -> u64 {
    15
}

fn default_dns() -> Option<String> {
    Some("1.1.1.1".to_string())
}

fn default_allowed_ips() -> String {
    "0.0.0.0/0, ::/0".to_string()
}

fn default_keepalive() -> u16 {
    25
}

fn default_true() -> bool {
    true
}

fn default_nat_interface() -> String {
    "eth0".to_string()
}

/// Validate a comma-separated AllowedIPs policy string
///
/// Each entry must be a network in CIDR notation or a bare address.
pub fn validate_allowed_ips(policy: &str) -> Result<()> {
    for entry in policy.split(',') {
        let entry = entry.trim();
        if entry.is_empty()
            || (entry.parse::<ipnet::IpNet>().is_err()
                && entry.parse::<std::net::IpAddr>().is_err())
        {
            return Err(Error::Config(format!(
                "invalid allowed_ips entry \"{}\"",
                entry
            )));
        }
    }
    Ok(())
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config(
                "host is required; set it to the address clients use to reach this server".into(),
            ));
        }

        if self.interface.trim().is_empty() {
            return Err(Error::Config("interface name must not be empty".into()));
        }

        if self.address_template.matches('x').count() != 1 {
            return Err(Error::Config(format!(
                "address template \"{}\" must contain exactly one `x` placeholder",
                self.address_template
            )));
        }

        if self.command_timeout_secs == 0 {
            return Err(Error::Config("command timeout must be at least 1 second".into()));
        }

        validate_allowed_ips(&self.peer_defaults.allowed_ips)?;

        Ok(())
    }

    /// Generate a sample settings file
    pub fn sample() -> String {
        r#"# wgward settings

# Publicly reachable host clients connect to (required).
# Rendered into every peer profile as the Endpoint host.
host = ""

# UDP listen port for the interface (default: 51820)
port = 51820

# Name of the WireGuard interface (default: "wg0")
interface = "wg0"

# Tunnel address template. The single `x` is substituted with the host
# identifier: the server takes 1, peers are allocated from 2 upward.
address_template = "10.8.0.x"

# Directory holding the persisted peer document (<interface>.json) and
# the rendered control file (<interface>.conf).
config_dir = "/etc/wireguard"

# Control socket used by the management CLI.
control_socket = "/var/run/wgward.sock"

# Deadline in seconds for each external command (default: 15)
command_timeout_secs = 15

# Defaults baked into rendered peer profiles.
[peer_defaults]
# DNS server pushed to peers. Comment out to omit the DNS line.
dns = "1.1.1.1"

# MTU pushed to peers. Omitted from profiles when not set.
# mtu = 1420

# AllowedIPs policy written into peer profiles.
allowed_ips = "0.0.0.0/0, ::/0"

# PersistentKeepalive interval in seconds (default: 25)
persistent_keepalive = 25

# Interface lifecycle hooks. Empty hooks are omitted from the control file.
[hooks]
pre_up = ""
post_up = ""
pre_down = ""
post_down = ""

# NAT/masquerading for peer traffic.
[nat]
enabled = true

# Outbound interface for masquerading.
interface = "eth0"
"#
        .to_string()
    }
}
