use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, trace, warn};

use crate::backend::{DirectoryFeature, FindFeature, ListFeature, read_to_end};
use crate::error::{Result, StorageError};
use crate::fs::content::cleartext_size;
use crate::fs::name::ENCRYPTED_SUFFIX;
use crate::path::{Attributes, ByteRange, Path, PathTypes};
use crate::transfer::TransferStatus;
use crate::vault::VaultContext;
use crate::vault::mapper::{
    CONTENTS_NAME, DIR_ID_BACKUP_NAME, DIR_MARKER_NAME, NAME_SIDECAR_NAME, is_shortened_node,
};

pub(crate) struct CryptoDirectory {
    context: Arc<VaultContext>,
}

impl CryptoDirectory {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl DirectoryFeature for CryptoDirectory {
    #[instrument(level = "debug", skip(self, _status), fields(path = %path))]
    async fn mkdir(&self, path: &Path, _status: &TransferStatus) -> Result<Path> {
        if self.context.resolver.lookup(path).await?.is_some() {
            return Err(StorageError::AlreadyExists { path: path.to_string() });
        }
        self.context.resolver.resolve(path).await?;
        Ok(Path::new(path.as_str(), PathTypes::DIRECTORY))
    }
}

pub(crate) struct CryptoFind {
    context: Arc<VaultContext>,
}

impl CryptoFind {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl FindFeature for CryptoFind {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let located = match self.context.locate(path, false).await {
            Ok(located) => located,
            Err(StorageError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        let mapper = &self.context.mapper;
        let find = self.context.native.find()?;

        let as_directory = mapper.dir_marker(&located.data_dir, &located.encoded);
        let as_file = mapper
            .file_object(&located.data_dir, &located.encoded)
            .with_types(PathTypes::FILE);
        let as_file = match path.version_id() {
            Some(version) => as_file.with_version(version),
            None => as_file,
        };
        match (path.is_file(), path.is_directory()) {
            (true, false) => find.exists(&as_file).await,
            (false, true) => find.exists(&as_directory).await,
            _ => Ok(find.exists(&as_file).await? || find.exists(&as_directory).await?),
        }
    }
}

pub(crate) struct CryptoList {
    context: Arc<VaultContext>,
}

impl CryptoList {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self { context }
    }

    fn file_attributes(&self, object: &Path, native: &Attributes) -> Result<Attributes> {
        let chunk_size = u64::from(self.context.chunk_size);
        let mut attributes = native.clone();
        if let Some(size) = native.size {
            attributes.size = Some(cleartext_size(size, chunk_size).ok_or_else(|| {
                StorageError::integrity(object, format!("ciphertext size {size} is not a valid object size"))
            })?);
        }
        Ok(attributes)
    }

    /// Resolve a `.c9s` node to its full encoded name and kind.
    async fn resolve_shortened(&self, node: &Path) -> Result<Option<(String, PathTypes, Attributes)>> {
        let native = &self.context.native;
        let children = native.list()?.list(node).await?;
        let sidecar = node.child(NAME_SIDECAR_NAME, PathTypes::FILE);
        let full = read_to_end(native.read()?.read(&sidecar, ByteRange::all()).await?).await?;
        let full = String::from_utf8(full).map_err(|e| StorageError::integrity(&sidecar, e.to_string()))?;

        for child in children {
            match child.name() {
                CONTENTS_NAME => {
                    return Ok(Some((full, PathTypes::FILE, self.file_attributes(&child, child.attributes())?)));
                }
                DIR_MARKER_NAME => {
                    return Ok(Some((full, PathTypes::DIRECTORY, Attributes::default())));
                }
                _ => {}
            }
        }
        warn!(node = %node, "Shortened node without contents or directory marker");
        Ok(None)
    }
}

#[async_trait]
impl ListFeature for CryptoList {
    #[instrument(level = "debug", skip(self), fields(directory = %directory))]
    async fn list(&self, directory: &Path) -> Result<Vec<Path>> {
        let context = &self.context;
        let dir_id = context
            .resolver
            .lookup(directory)
            .await?
            .ok_or_else(|| StorageError::not_found(directory))?;
        let data_dir = context.mapper.data_dir(&dir_id)?;
        let entries = context.native.list()?.list(&data_dir).await?;

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.name();
            if name == DIR_ID_BACKUP_NAME {
                continue;
            }
            let (full, types, attributes) = if is_shortened_node(name) && entry.is_directory() {
                match self.resolve_shortened(&entry).await? {
                    Some(resolved) => resolved,
                    None => continue,
                }
            } else if name.ends_with(ENCRYPTED_SUFFIX) {
                if entry.is_directory() {
                    (name.to_string(), PathTypes::DIRECTORY, Attributes::default())
                } else {
                    (name.to_string(), PathTypes::FILE, self.file_attributes(&entry, entry.attributes())?)
                }
            } else {
                trace!(entry = %entry, "Skipping foreign entry");
                continue;
            };

            let cleartext = context.mapper.decode_name(&full, &dir_id)?;
            children.push(directory.child(&cleartext, types).with_attributes(attributes));
        }
        Ok(children)
    }
}
