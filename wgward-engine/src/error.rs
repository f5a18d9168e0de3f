//! Error types for the configuration engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing the server configuration
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse the settings file
    #[error("failed to parse settings: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted document could not be read or written
    #[error("config document error: {0}")]
    Document(#[from] serde_json::Error),

    /// External command exited non-zero
    #[error("command `{command}` exited with code {code}: {stderr}")]
    Command {
        /// The command line that was invoked
        command: String,
        /// Exit code reported by the process
        code: i32,
        /// Captured standard error output
        stderr: String,
    },

    /// External command did not finish within its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Interface device absent after bring-up
    #[error("cannot find device \"{0}\"; the host kernel does not support WireGuard")]
    KernelSupport(String),

    /// Unknown peer id
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Peer name is empty or blank
    #[error("peer name must not be empty")]
    NameRequired,

    /// Address does not parse or is outside the tunnel network
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Address already assigned to the server or another peer
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// No free host addresses remain in the tunnel network
    #[error("no free addresses remain in the tunnel network")]
    AddressPoolExhausted,

    /// Key material is not a valid WireGuard key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Change persisted but the running interface could not be updated
    #[error("change saved but not applied to the running interface: {0}")]
    InterfaceOutOfSync(String),

    /// Manager has not been started
    #[error("manager is not running")]
    NotRunning,

    /// Manager was already started
    #[error("manager is already running")]
    AlreadyRunning,

    /// Control socket failure
    #[error("control socket error: {0}")]
    ControlSocket(String),
}

impl Error {
    /// Check if this error rejects caller input before any state change
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::NameRequired
                | Error::InvalidAddress(_)
                | Error::AddressInUse(_)
                | Error::AddressPoolExhausted
                | Error::InvalidKey(_)
        )
    }

    /// Check if this error should abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::KernelSupport(_))
    }
}
