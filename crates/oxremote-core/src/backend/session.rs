use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::path::Path;
use crate::transfer::listener::{DisabledPasswordCallback, PasswordCallback};
use crate::vault::{CryptoVault, VaultRegistry};

use super::CapabilityTable;

/// Encryption domain a path belongs to.
#[derive(Clone)]
pub enum Domain {
    Plain,
    Vault(Arc<CryptoVault>),
}

impl Domain {
    /// Same domain: both plain, or both governed by the same vault instance.
    pub fn same_as(&self, other: &Domain) -> bool {
        match (self, other) {
            (Domain::Plain, Domain::Plain) => true,
            (Domain::Vault(a), Domain::Vault(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn vault(&self) -> Option<&Arc<CryptoVault>> {
        match self {
            Domain::Plain => None,
            Domain::Vault(vault) => Some(vault),
        }
    }

    /// Key prefix separating listings of different domains in a shared cache.
    pub fn namespace(&self) -> String {
        match self {
            Domain::Plain => "plain".to_string(),
            Domain::Vault(vault) => format!("vault:{}", vault.root().as_str()),
        }
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Plain => write!(f, "Plain"),
            Domain::Vault(vault) => write!(f, "Vault({})", vault.root()),
        }
    }
}

/// Capabilities that apply to one path.
#[derive(Debug, Clone)]
pub struct ResolvedCapabilities {
    pub domain: Domain,
    pub table: CapabilityTable,
}

/// A connection to one backend host.
///
/// Cloning is cheap; clones share the native capabilities and the vault
/// registry.
#[derive(Clone)]
pub struct Session {
    native: CapabilityTable,
    vaults: Arc<VaultRegistry>,
    password: Arc<dyn PasswordCallback>,
}

impl Session {
    pub fn new(native: CapabilityTable) -> Self {
        Self::with_registry(native, Arc::new(VaultRegistry::new()))
    }

    pub fn with_registry(native: CapabilityTable, vaults: Arc<VaultRegistry>) -> Self {
        Self {
            native,
            vaults,
            password: Arc::new(DisabledPasswordCallback),
        }
    }

    /// Callback consulted when a locked vault is first accessed.
    #[must_use]
    pub fn with_password_callback(mut self, password: Arc<dyn PasswordCallback>) -> Self {
        self.password = password;
        self
    }

    #[inline]
    pub fn host(&self) -> &str {
        self.native.host()
    }

    #[inline]
    pub fn native(&self) -> &CapabilityTable {
        &self.native
    }

    #[inline]
    pub fn vaults(&self) -> &Arc<VaultRegistry> {
        &self.vaults
    }

    /// Capabilities for `path`: the vault decorators when a vault governs it,
    /// the native table otherwise. Unlocks the vault on first access.
    pub async fn resolve(&self, path: &Path) -> Result<ResolvedCapabilities> {
        match self.vaults.find(path) {
            Some(vault) => {
                vault.unlock(self.password.as_ref()).await?;
                trace!(path = %path, vault = %vault.root(), "Resolved vault capabilities");
                Ok(ResolvedCapabilities {
                    table: vault.decorate()?,
                    domain: Domain::Vault(vault),
                })
            }
            None => Ok(ResolvedCapabilities {
                domain: Domain::Plain,
                table: self.native.clone(),
            }),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host())
            .field("vaults", &self.vaults.len())
            .finish_non_exhaustive()
    }
}
