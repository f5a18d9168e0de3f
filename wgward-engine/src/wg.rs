//! Typed surface over the `wg` and `wg-quick` tools

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::command::CommandRunner;
use crate::error::{Error, Result};

/// Control-plane commands for one WireGuard interface
pub struct WgControl {
    runner: Arc<dyn CommandRunner>,
    interface: String,
}

impl WgControl {
    pub fn new(runner: Arc<dyn CommandRunner>, interface: impl Into<String>) -> Self {
        Self {
            runner,
            interface: interface.into(),
        }
    }

    /// Generate a fresh private key
    pub async fn generate_private_key(&self) -> Result<String> {
        self.runner.run("wg", &["genkey"], None).await
    }

    /// Derive the public key for a private key
    pub async fn derive_public_key(&self, private_key: &str) -> Result<String> {
        self.runner.run("wg", &["pubkey"], Some(private_key)).await
    }

    /// Generate a fresh preshared key
    pub async fn generate_preshared_key(&self) -> Result<String> {
        self.runner.run("wg", &["genpsk"], None).await
    }

    /// Bring the interface up from its control file
    ///
    /// A bring-up failure caused by the device being unknown to the kernel
    /// is reported as [`Error::KernelSupport`]; every other failure
    /// propagates unmodified.
    pub async fn interface_up(&self) -> Result<()> {
        match self
            .runner
            .run("wg-quick", &["up", &self.interface], None)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Command { ref stderr, .. }) if stderr.contains("Cannot find device") => {
                Err(Error::KernelSupport(self.interface.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Tear the interface down
    pub async fn interface_down(&self) -> Result<()> {
        self.runner
            .run("wg-quick", &["down", &self.interface], None)
            .await
            .map(|_| ())
    }

    /// Apply the current control file to the running interface without
    /// tearing it down
    ///
    /// `wg syncconf` rejects `wg-quick` extensions (Address, hooks), so the
    /// control file is first stripped to the wire-level subset.
    pub async fn sync(&self) -> Result<()> {
        let stripped = self
            .runner
            .run("wg-quick", &["strip", &self.interface], None)
            .await?;

        let sync_path = std::env::temp_dir().join(format!("{}.sync.conf", self.interface));
        tokio::fs::write(&sync_path, &stripped).await?;
        let sync_file = sync_path.to_string_lossy().to_string();

        let result = self
            .runner
            .run("wg", &["syncconf", &self.interface, &sync_file], None)
            .await;

        let _ = tokio::fs::remove_file(&sync_path).await;

        result.map(|_| ())
    }

    /// Read the interface status dump
    pub async fn show_dump(&self) -> Result<String> {
        self.runner
            .run("wg", &["show", &self.interface, "dump"], None)
            .await
    }
}

/// Validate that a string is a well-formed WireGuard key
/// (base64 of 32 bytes)
pub fn validate_key(key: &str) -> Result<()> {
    let bytes = STANDARD
        .decode(key)
        .map_err(|_| Error::InvalidKey(key.to_string()))?;
    if bytes.len() != 32 {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}
