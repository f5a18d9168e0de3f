//! wgward CLI
//!
//! A command-line interface for managing a WireGuard server: the `server`
//! subcommand runs the lifecycle manager in the foreground, and the peer
//! subcommands talk to that instance over its control socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wgward_engine::{
    ControlClient, ControlRequest, ControlResponse, ControlServer, PeerView, Settings,
    SystemRunner, WgManager, DEFAULT_SOCKET_PATH,
};

/// wgward - WireGuard server configuration manager
#[derive(Parser)]
#[command(name = "wgward")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, default_value = "wgward.toml")]
    config: PathBuf,

    /// Control socket path (defaults to the settings file value)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground
    Server,

    /// Generate a sample settings file
    GenConfig {
        /// Output path for the settings file
        #[arg(short, long, default_value = "wgward.toml")]
        output: PathBuf,
    },

    /// Show status of the running server
    Status,

    /// List peers with live link state
    Peers,

    /// Create a peer
    Add {
        /// Display name for the peer
        name: String,
    },

    /// Delete a peer
    Remove {
        /// Peer id
        id: String,
    },

    /// Enable a peer
    Enable {
        /// Peer id
        id: String,
    },

    /// Disable a peer without deleting it
    Disable {
        /// Peer id
        id: String,
    },

    /// Rename a peer
    Rename {
        /// Peer id
        id: String,
        /// New display name
        name: String,
    },

    /// Move a peer to a specific tunnel address
    Readdress {
        /// Peer id
        id: String,
        /// New address inside the tunnel network
        address: String,
    },

    /// Print a peer's client profile
    Profile {
        /// Peer id
        id: String,
    },

    /// Print the full configuration document
    Backup,

    /// Replace the full configuration from a backup document
    Restore {
        /// Path to a backup document
        input: PathBuf,
    },

    /// Stop the running server
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match &cli.command {
        Commands::Server => run_server(&cli.config).await,
        Commands::GenConfig { output } => generate_config(output),
        Commands::Status => send(&cli, ControlRequest::Status).await,
        Commands::Peers => send(&cli, ControlRequest::ListPeers).await,
        Commands::Add { name } => {
            send(&cli, ControlRequest::CreatePeer { name: name.clone() }).await
        }
        Commands::Remove { id } => {
            send(&cli, ControlRequest::DeletePeer { id: id.clone() }).await
        }
        Commands::Enable { id } => {
            send(
                &cli,
                ControlRequest::SetPeerEnabled {
                    id: id.clone(),
                    enabled: true,
                },
            )
            .await
        }
        Commands::Disable { id } => {
            send(
                &cli,
                ControlRequest::SetPeerEnabled {
                    id: id.clone(),
                    enabled: false,
                },
            )
            .await
        }
        Commands::Rename { id, name } => {
            send(
                &cli,
                ControlRequest::RenamePeer {
                    id: id.clone(),
                    name: name.clone(),
                },
            )
            .await
        }
        Commands::Readdress { id, address } => {
            send(
                &cli,
                ControlRequest::ReaddressPeer {
                    id: id.clone(),
                    address: address.clone(),
                },
            )
            .await
        }
        Commands::Profile { id } => {
            send(&cli, ControlRequest::PeerProfile { id: id.clone() }).await
        }
        Commands::Backup => send(&cli, ControlRequest::Backup).await,
        Commands::Restore { input } => {
            let document = std::fs::read_to_string(input)
                .with_context(|| format!("failed to read {:?}", input))?;
            send(&cli, ControlRequest::Restore { document }).await
        }
        Commands::Shutdown => send(&cli, ControlRequest::Shutdown).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(config_path: &PathBuf) -> Result<()> {
    let settings = Settings::load(config_path)
        .with_context(|| format!("failed to load settings from {:?}", config_path))?;
    let socket_path = settings.control_socket.clone();
    let timeout = Duration::from_secs(settings.command_timeout_secs);

    info!("starting wgward server...");

    let runner = Arc::new(SystemRunner::new(timeout));
    let manager = Arc::new(WgManager::new(settings, runner).context("failed to create manager")?);

    manager.start().await.context("failed to bring the interface up")?;
    info!("configuration loaded from {:?}", config_path);

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let server = ControlServer::new(&socket_path, manager.clone(), shutdown_tx);
    let control_task = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("control socket error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => info!("interrupt received, shutting down..."),
        _ = shutdown_rx.recv() => info!("shutdown requested over the control socket..."),
    }

    manager.shutdown().await;
    control_task.abort();
    let _ = std::fs::remove_file(&socket_path);

    Ok(())
}

fn generate_config(output: &PathBuf) -> Result<()> {
    if output.exists() {
        bail!("{:?} already exists; not overwriting", output);
    }
    std::fs::write(output, Settings::sample())
        .with_context(|| format!("failed to write {:?}", output))?;
    println!("Sample settings written to {:?}", output);
    println!("Set `host` before starting the server.");
    Ok(())
}

/// Resolve the control socket: explicit flag, then settings file, then the
/// built-in default
fn socket_path(cli: &Cli) -> PathBuf {
    if let Some(socket) = &cli.socket {
        return socket.clone();
    }
    Settings::load(&cli.config)
        .map(|s| s.control_socket)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH))
}

async fn send(cli: &Cli, request: ControlRequest) -> Result<()> {
    let client = ControlClient::new(socket_path(cli));
    match client.request(request).await? {
        ControlResponse::Ok => println!("ok"),
        ControlResponse::Status(status) => {
            println!("state:       {}", status.state);
            println!("interface:   {}", status.interface);
            println!("listen port: {}", status.listen_port);
            println!("address:     {}", status.server_address);
            println!("public key:  {}", status.server_public_key);
            println!(
                "peers:       {} ({} enabled)",
                status.peer_count, status.peers_enabled
            );
        }
        ControlResponse::Peers { peers } => print_peers(&peers),
        ControlResponse::Peer(peer) => {
            println!("created \"{}\"", peer.display_name);
            println!("id:      {}", peer.id);
            println!("address: {}", peer.address);
        }
        ControlResponse::Text { text } => println!("{}", text),
        ControlResponse::Error { message } => bail!("{}", message),
    }
    Ok(())
}

fn print_peers(peers: &[PeerView]) {
    if peers.is_empty() {
        println!("no peers");
        return;
    }

    println!(
        "{:<36}  {:<16}  {:<9}  {:<20}  {:>12}  {:>12}  name",
        "id", "address", "enabled", "last handshake", "rx bytes", "tx bytes"
    );
    for peer in peers {
        let handshake = peer
            .status
            .latest_handshake_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<36}  {:<16}  {:<9}  {:<20}  {:>12}  {:>12}  {}",
            peer.id,
            peer.address,
            if peer.enabled { "yes" } else { "no" },
            handshake,
            peer.status.transfer_rx.unwrap_or(0),
            peer.status.transfer_tx.unwrap_or(0),
            peer.display_name
        );
    }
}
