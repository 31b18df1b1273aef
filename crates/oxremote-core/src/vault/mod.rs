//! Client-side encrypted vaults on top of any backend.
//!
//! A [`CryptoVault`] governs one subtree of a backend. Paths strictly inside
//! its root are served by encrypting decorators that wrap the native
//! capabilities: names are encrypted per directory, contents are chunked and
//! authenticated, and directories are identified by random ids stored in
//! marker objects (see [`mapper`] for the layout).
//!
//! Vaults are opened locked and unlock lazily the first time a session
//! resolves a path inside them.

pub mod cache;
pub mod dir_id;
mod features;
pub mod locks;
pub mod mapper;
pub mod master_key;
pub mod path;
mod registry;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    Capability, CapabilityKind, CapabilityTable, mkdir_if_missing, read_to_end, write_all,
};
use crate::config::{DEFAULT_SHORTENING_THRESHOLD, VaultPreferences};
use crate::crypto::MasterKey;
use crate::error::{Result, StorageError};
use crate::fs::content::DEFAULT_CHUNK_SIZE;
use crate::path::{ByteRange, Path, PathTypes};
use crate::transfer::TransferStatus;
use crate::transfer::listener::PasswordCallback;

use cache::VaultCache;
use dir_id::DirectoryIdResolver;
use mapper::{EncodedName, PathMapper};
use master_key::MasterKeyFile;

pub use master_key::{KdfParams, MASTER_KEY_FILE_NAME, VAULT_FORMAT};
pub use path::DirId;
pub use registry::VaultRegistry;

/// Parameters for a new vault and for mapping names of an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultSettings {
    pub chunk_size: u32,
    pub shortening_threshold: usize,
    pub kdf: KdfParams,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            shortening_threshold: DEFAULT_SHORTENING_THRESHOLD,
            kdf: KdfParams::default(),
        }
    }
}

impl VaultSettings {
    pub fn from_preferences(preferences: &VaultPreferences) -> Self {
        Self {
            chunk_size: preferences.chunk_size,
            shortening_threshold: preferences.shortening_threshold,
            kdf: KdfParams::default(),
        }
    }

    #[must_use]
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Key material and helpers of an unlocked vault, shared by its decorators.
pub(crate) struct VaultContext {
    key: Arc<MasterKey>,
    chunk_size: u32,
    mapper: Arc<PathMapper>,
    resolver: DirectoryIdResolver,
    native: CapabilityTable,
}

/// Where a cleartext path lives in ciphertext.
pub(crate) struct Located {
    pub data_dir: Path,
    pub encoded: EncodedName,
}

impl VaultContext {
    fn new(root: Path, key: MasterKey, chunk_size: u32, threshold: usize, native: CapabilityTable) -> Self {
        let key = Arc::new(key);
        let mapper = Arc::new(PathMapper::new(root, key.clone(), Arc::new(VaultCache::new()), threshold));
        let resolver = DirectoryIdResolver::new(mapper.clone(), native.clone(), chunk_size);
        Self {
            key,
            chunk_size,
            mapper,
            resolver,
            native,
        }
    }

    /// Map `path` to its node in the parent's data dir. With `create`, missing
    /// parents are created; otherwise a missing parent is `NotFound`.
    pub(crate) async fn locate(&self, path: &Path, create: bool) -> Result<Located> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::interoperability("map path", path, "the root has no node"))?;
        let parent_id = if create {
            self.resolver.resolve(&parent).await?
        } else {
            self.resolver
                .lookup(&parent)
                .await?
                .ok_or_else(|| StorageError::not_found(path))?
        };
        Ok(Located {
            data_dir: self.mapper.data_dir(&parent_id)?,
            encoded: self.mapper.encode_name(path.name(), &parent_id)?,
        })
    }

    /// Write the `name.c9s` side-car of a shortened node.
    pub(crate) async fn write_sidecar(&self, located: &Located) -> Result<()> {
        if !located.encoded.is_shortened() {
            return Ok(());
        }
        let status = TransferStatus::new();
        let node = self
            .mapper
            .node(&located.data_dir, &located.encoded, PathTypes::DIRECTORY);
        mkdir_if_missing(self.native.directory()?.as_ref(), &node, &status).await?;
        write_all(
            self.native.write()?.as_ref(),
            &self.mapper.name_sidecar(&located.data_dir, &located.encoded),
            Bytes::from(located.encoded.full.clone()),
            &status,
        )
        .await?;
        Ok(())
    }
}

/// An encrypted subtree of one backend.
pub struct CryptoVault {
    root: Path,
    native: CapabilityTable,
    shortening_threshold: usize,
    context: RwLock<Option<Arc<VaultContext>>>,
    unlocking: tokio::sync::Mutex<()>,
}

impl CryptoVault {
    /// Create a new vault at `root`: write the root marker and the root data dir.
    ///
    /// The returned vault is unlocked.
    #[instrument(level = "info", skip(native, passphrase, settings), fields(root = %root))]
    pub async fn create(
        native: CapabilityTable,
        root: &Path,
        passphrase: &str,
        settings: VaultSettings,
    ) -> Result<Arc<Self>> {
        let root = Path::directory(root.as_str());
        let marker = root.child(MASTER_KEY_FILE_NAME, PathTypes::FILE);
        if native.find()?.exists(&marker).await? {
            return Err(StorageError::AlreadyExists { path: marker.to_string() });
        }

        let key = MasterKey::random();
        let file = MasterKeyFile::create(&key, passphrase, settings.chunk_size, settings.kdf)?;
        let status = TransferStatus::new();
        let directory = native.directory()?;
        if !root.is_root() {
            mkdir_if_missing(directory.as_ref(), &root, &status).await?;
        }
        write_all(native.write()?.as_ref(), &marker, Bytes::from(file.to_json()?), &status).await?;

        let context = VaultContext::new(
            root.clone(),
            key,
            settings.chunk_size,
            settings.shortening_threshold,
            native.clone(),
        );
        let data_dir = context.mapper.data_dir(&DirId::root())?;
        let mut ancestors = Vec::new();
        let mut current = data_dir.parent();
        while let Some(dir) = current.filter(|d| d.is_child_of(&root)) {
            current = dir.parent();
            ancestors.push(dir);
        }
        for dir in ancestors.iter().rev() {
            mkdir_if_missing(directory.as_ref(), dir, &status).await?;
        }
        mkdir_if_missing(directory.as_ref(), &data_dir, &status).await?;

        info!(root = %root, chunk_size = settings.chunk_size, "Created vault");
        Ok(Arc::new(Self {
            root,
            native,
            shortening_threshold: settings.shortening_threshold,
            context: RwLock::new(Some(Arc::new(context))),
            unlocking: tokio::sync::Mutex::new(()),
        }))
    }

    /// Handle on an existing vault. Nothing is read until it is unlocked.
    pub fn open(native: CapabilityTable, root: &Path, shortening_threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            root: Path::directory(root.as_str()),
            native,
            shortening_threshold,
            context: RwLock::new(None),
            unlocking: tokio::sync::Mutex::new(()),
        })
    }

    /// Unlock with a passphrase from `password`, unless already unlocked.
    pub async fn unlock(&self, password: &dyn PasswordCallback) -> Result<()> {
        if self.is_unlocked() {
            return Ok(());
        }
        let _guard = self.unlocking.lock().await;
        if self.is_unlocked() {
            return Ok(());
        }
        let passphrase = password.prompt(&self.root).await?;
        self.unlock_with_passphrase(&passphrase).await
    }

    #[instrument(level = "debug", skip(self, passphrase), fields(root = %self.root))]
    pub async fn unlock_with_passphrase(&self, passphrase: &str) -> Result<()> {
        let marker = self.root.child(MASTER_KEY_FILE_NAME, PathTypes::FILE);
        let content = read_to_end(self.native.read()?.read(&marker, ByteRange::all()).await?).await?;
        let file = MasterKeyFile::from_json(&content)?;
        let key = match file.unlock(passphrase) {
            Ok(key) => key,
            Err(e) => {
                warn!(root = %self.root, error = %e, "Vault unlock failed");
                return Err(e.into());
            }
        };
        let context = VaultContext::new(
            self.root.clone(),
            key,
            file.chunk_size,
            self.shortening_threshold,
            self.native.clone(),
        );
        *self.context.write() = Some(Arc::new(context));
        info!(root = %self.root, "Unlocked vault");
        Ok(())
    }

    /// Forget key material and every cache.
    pub fn lock(&self) {
        if self.context.write().take().is_some() {
            debug!(root = %self.root, "Locked vault");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.context.read().is_some()
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Strictly inside the vault root.
    pub fn contains(&self, path: &Path) -> bool {
        path.is_child_of(&self.root)
    }

    pub(crate) fn context(&self) -> Result<Arc<VaultContext>> {
        self.context.read().clone().ok_or_else(|| StorageError::AccessDenied {
            reason: format!("vault {} is locked", self.root),
        })
    }

    /// Chunk size of the unlocked vault.
    pub fn chunk_size(&self) -> Result<u32> {
        Ok(self.context()?.chunk_size)
    }

    /// Directory markers written since the vault was unlocked.
    pub fn marker_writes(&self) -> Result<usize> {
        Ok(self.context()?.resolver.marker_writes())
    }

    /// Id of a cleartext directory inside the vault, if it exists.
    pub async fn dir_id(&self, directory: &Path) -> Result<Option<DirId>> {
        self.context()?.resolver.lookup(directory).await
    }

    /// Ciphertext object holding the contents of a cleartext file.
    pub async fn ciphertext_path(&self, file: &Path) -> Result<Path> {
        let context = self.context()?;
        let located = context.locate(file, false).await?;
        Ok(context.mapper.file_object(&located.data_dir, &located.encoded))
    }

    /// Encrypting capability table for paths inside this vault.
    pub fn decorate(&self) -> Result<CapabilityTable> {
        let context = self.context()?;
        let mut table = CapabilityTable::new(self.native.host())
            .with(Capability::Read(Arc::new(features::CryptoRead::new(context.clone()))))
            .with(Capability::Write(Arc::new(features::CryptoWrite::new(context.clone()))))
            .with(Capability::Touch(Arc::new(features::CryptoTouch::new(context.clone()))))
            .with(Capability::Directory(Arc::new(features::CryptoDirectory::new(context.clone()))))
            .with(Capability::Find(Arc::new(features::CryptoFind::new(context.clone()))))
            .with(Capability::List(Arc::new(features::CryptoList::new(context.clone()))))
            .with(Capability::Delete(Arc::new(features::CryptoDelete::new(context.clone()))))
            .with(Capability::Bulk(Arc::new(features::CryptoBulk::new(context.clone()))));
        if self.native.supports(CapabilityKind::Copy) {
            table.insert(Capability::Copy(Arc::new(features::CryptoCopy::new(context.clone()))));
        }
        if self.native.supports(CapabilityKind::Multipart) {
            table.insert(Capability::Multipart(Arc::new(features::CryptoMultipart::new(
                context.clone(),
            ))));
        }
        if let Some(location) = self.native.get(CapabilityKind::Location) {
            table.insert(location.clone());
        }
        Ok(table)
    }
}

impl fmt::Debug for CryptoVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoVault")
            .field("root", &self.root)
            .field("unlocked", &self.is_unlocked())
            .finish_non_exhaustive()
    }
}
