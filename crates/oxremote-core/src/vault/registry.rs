use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::path::Path;

use super::CryptoVault;

/// Vaults known to a session, at most one per subtree.
#[derive(Debug, Default)]
pub struct VaultRegistry {
    vaults: RwLock<Vec<Arc<CryptoVault>>>,
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `vault`. Roots may not nest inside one another.
    pub fn add(&self, vault: Arc<CryptoVault>) -> Result<()> {
        let mut vaults = self.vaults.write();
        if let Some(existing) = vaults
            .iter()
            .find(|v| v.root().starts_with(vault.root()) || vault.root().starts_with(v.root()))
        {
            return Err(StorageError::interoperability(
                "register vault",
                vault.root(),
                format!("overlaps vault at {}", existing.root()),
            ));
        }
        debug!(root = %vault.root(), "Registered vault");
        vaults.push(vault);
        Ok(())
    }

    /// Unregister the vault rooted at `root`.
    pub fn remove(&self, root: &Path) -> Option<Arc<CryptoVault>> {
        let mut vaults = self.vaults.write();
        let index = vaults.iter().position(|v| v.root().as_str() == root.as_str())?;
        Some(vaults.remove(index))
    }

    /// Vault governing `path`, which must lie strictly inside its root.
    pub fn find(&self, path: &Path) -> Option<Arc<CryptoVault>> {
        self.vaults.read().iter().find(|v| v.contains(path)).cloned()
    }

    /// Vault whose root is exactly `path`.
    pub fn find_root(&self, path: &Path) -> Option<Arc<CryptoVault>> {
        self.vaults
            .read()
            .iter()
            .find(|v| v.root().as_str() == path.as_str())
            .cloned()
    }

    /// Vaults whose roots lie at or below `path`.
    pub fn roots_within(&self, path: &Path) -> Vec<Arc<CryptoVault>> {
        self.vaults
            .read()
            .iter()
            .filter(|v| v.root().starts_with(path))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.vaults.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.read().is_empty()
    }
}
