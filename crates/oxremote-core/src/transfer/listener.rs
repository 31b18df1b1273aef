//! Callbacks through which workers report progress and ask for consent.

use async_trait::async_trait;

use crate::error::{Result, StorageError};
use crate::path::Path;

/// Receives per-item progress of a worker.
pub trait ProgressListener: Send + Sync {
    fn item_started(&self, _path: &Path) {}

    fn bytes_transferred(&self, _path: &Path, _bytes: u64) {}

    fn item_finished(&self, _path: &Path, _result: &Result<()>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProgressListener;

impl ProgressListener for DisabledProgressListener {}

/// Asked before a copy overwrites an existing target.
#[async_trait]
pub trait ConnectionCallback: Send + Sync {
    /// `Ok(())` to proceed; an error (usually `Canceled`) to refuse.
    async fn warn(&self, target: &Path, message: &str) -> Result<()>;
}

/// Allows every overwrite.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledConnectionCallback;

#[async_trait]
impl ConnectionCallback for DisabledConnectionCallback {
    async fn warn(&self, _target: &Path, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Asked before a destructive operation such as deleting a whole vault.
#[async_trait]
pub trait LoginCallback: Send + Sync {
    async fn warn(&self, path: &Path, message: &str) -> Result<()>;
}

/// Allows every destructive operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLoginCallback;

#[async_trait]
impl LoginCallback for DisabledLoginCallback {
    async fn warn(&self, _path: &Path, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Supplies the passphrase of a locked vault.
#[async_trait]
pub trait PasswordCallback: Send + Sync {
    async fn prompt(&self, vault: &Path) -> Result<String>;
}

/// Refuses every prompt; locked vaults stay locked.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPasswordCallback;

#[async_trait]
impl PasswordCallback for DisabledPasswordCallback {
    async fn prompt(&self, vault: &Path) -> Result<String> {
        Err(StorageError::AccessDenied {
            reason: format!("no passphrase available for vault {vault}"),
        })
    }
}

/// Answers every prompt with the same passphrase.
pub struct StaticPassword(secrecy::SecretString);

impl StaticPassword {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(secrecy::SecretString::from(passphrase.into()))
    }
}

#[async_trait]
impl PasswordCallback for StaticPassword {
    async fn prompt(&self, _vault: &Path) -> Result<String> {
        use secrecy::ExposeSecret;
        Ok(self.0.expose_secret().to_string())
    }
}
