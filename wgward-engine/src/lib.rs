//! wgward Engine
//!
//! This crate manages a WireGuard server's configuration lifecycle: key
//! material, peer address allocation, control-file rendering, applying
//! changes to the running interface without a restart, and reconciling
//! persisted peer metadata with live link state.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     wgward-cli                            │
//! │   server subcommand          peer subcommands             │
//! └──────────┬──────────────────────────┬─────────────────────┘
//!            ▼                          ▼
//! ┌───────────────────────┐   ┌───────────────────────┐
//! │      WgManager        │◄──│  ControlServer/Client │
//! │  lifecycle + peer ops │   │  (unix socket, JSON)  │
//! └──────────┬────────────┘   └───────────────────────┘
//!            │
//!   ┌────────┼──────────┬────────────┬─────────────┐
//!   ▼        ▼          ▼            ▼             ▼
//! store    render     alloc       status       wg/firewall
//! (JSON    (control   (address    (dump        (external
//!  doc)     file +     template)   parser)      commands)
//!           profile)
//! ```
//!
//! The actual handshake and data plane belong to the kernel WireGuard
//! implementation; this crate only drives its command-line control surface
//! (`wg`, `wg-quick`, `iptables`).

pub mod alloc;
pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod firewall;
pub mod manager;
pub mod render;
pub mod status;
pub mod store;
pub mod wg;

pub use alloc::AddressTemplate;
pub use command::{CommandRunner, SystemRunner};
pub use config::Settings;
pub use control::{ControlClient, ControlRequest, ControlResponse, ControlServer, DEFAULT_SOCKET_PATH};
pub use error::{Error, Result};
pub use manager::{ManagerState, ManagerStatus, WgManager};
pub use status::{parse_dump, PeerStatus};
pub use store::{ConfigRoot, ConfigStore, PeerRecord, PeerView, ServerIdentity};
