//! Directory-id resolution.
//!
//! Every directory below the vault root is identified by a random id stored
//! in its marker. Resolving a cleartext directory walks from the root, one
//! segment at a time: encrypt the segment under the parent id, read the
//! marker, and descend into the id found there. `resolve` creates missing
//! directories on the way; `lookup` only reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::backend::{CapabilityTable, mkdir_if_missing, read_to_end, write_all};
use crate::error::{Result, StorageError};
use crate::fs::content::encrypt_file;
use crate::path::{ByteRange, Path, PathTypes};
use crate::transfer::TransferStatus;

use super::locks::DirectoryLocks;
use super::mapper::{DIR_ID_BACKUP_NAME, PathMapper};
use super::path::DirId;

pub struct DirectoryIdResolver {
    mapper: Arc<PathMapper>,
    native: CapabilityTable,
    locks: DirectoryLocks,
    chunk_size: u32,
    marker_writes: AtomicUsize,
}

impl DirectoryIdResolver {
    pub fn new(mapper: Arc<PathMapper>, native: CapabilityTable, chunk_size: u32) -> Self {
        Self {
            mapper,
            native,
            locks: DirectoryLocks::new(),
            chunk_size,
            marker_writes: AtomicUsize::new(0),
        }
    }

    /// Number of directory markers this resolver has written.
    pub fn marker_writes(&self) -> usize {
        self.marker_writes.load(Ordering::SeqCst)
    }

    /// Id of `directory`, creating it and any missing ancestors.
    #[instrument(level = "debug", skip(self), fields(directory = %directory))]
    pub async fn resolve(&self, directory: &Path) -> Result<DirId> {
        let segments = self.mapper.relative(directory)?;
        let mut current = DirId::root();
        let mut cleartext = self.mapper.root().clone();

        for segment in segments {
            cleartext = cleartext.child(segment, PathTypes::DIRECTORY);
            if let Some(hit) = self.mapper.cache().get_dir_id(cleartext.as_str()) {
                current = hit;
                continue;
            }

            let _guard = self.locks.lock(cleartext.as_str()).await;
            if let Some(hit) = self.mapper.cache().get_dir_id(cleartext.as_str()) {
                current = hit;
                continue;
            }

            let id = match self.read_child_marker(segment, &current).await? {
                Some(id) => id,
                None => self.create_child(segment, &current, &cleartext).await?,
            };
            self.mapper.cache().insert_dir_id(cleartext.as_str(), id.clone());
            current = id;
        }
        Ok(current)
    }

    /// Id of `directory` if it exists. Never writes.
    pub async fn lookup(&self, directory: &Path) -> Result<Option<DirId>> {
        let segments = self.mapper.relative(directory)?;
        let mut current = DirId::root();
        let mut cleartext = self.mapper.root().clone();

        for segment in segments {
            cleartext = cleartext.child(segment, PathTypes::DIRECTORY);
            if let Some(hit) = self.mapper.cache().get_dir_id(cleartext.as_str()) {
                current = hit;
                continue;
            }
            match self.read_child_marker(segment, &current).await? {
                Some(id) => {
                    self.mapper.cache().insert_dir_id(cleartext.as_str(), id.clone());
                    current = id;
                }
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Drop cached ids of `directory` and its descendants.
    pub fn evict(&self, directory: &Path) {
        self.mapper.cache().evict_subtree(directory.as_str());
        self.locks.prune();
    }

    async fn read_child_marker(&self, name: &str, parent: &DirId) -> Result<Option<DirId>> {
        let data_dir = self.mapper.data_dir(parent)?;
        let encoded = self.mapper.encode_name(name, parent)?;
        let marker = self.mapper.dir_marker(&data_dir, &encoded);

        let stream = match self.native.read()?.read(&marker, ByteRange::all()).await {
            Ok(stream) => stream,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let content = read_to_end(stream).await?;
        let id = DirId::parse_marker(&content).map_err(|reason| StorageError::integrity(&marker, reason))?;
        trace!(marker = %marker, dir_id = %id, "Read directory marker");
        Ok(Some(id))
    }

    async fn create_child(&self, name: &str, parent: &DirId, cleartext: &Path) -> Result<DirId> {
        let status = TransferStatus::new();
        let directory = self.native.directory()?;
        let write = self.native.write()?;

        let parent_data_dir = self.mapper.data_dir(parent)?;
        let encoded = self.mapper.encode_name(name, parent)?;
        let node = self.mapper.node(&parent_data_dir, &encoded, PathTypes::DIRECTORY);
        mkdir_if_missing(directory.as_ref(), &node, &status).await?;

        let id = DirId::generate();
        write_all(
            write.as_ref(),
            &self.mapper.dir_marker(&parent_data_dir, &encoded),
            Bytes::from(id.as_str().to_owned()),
            &status,
        )
        .await?;
        if encoded.is_shortened() {
            write_all(
                write.as_ref(),
                &self.mapper.name_sidecar(&parent_data_dir, &encoded),
                Bytes::from(encoded.full.clone()),
                &status,
            )
            .await?;
        }
        self.marker_writes.fetch_add(1, Ordering::SeqCst);

        let data_dir = self.mapper.data_dir(&id)?;
        if let Some(prefix) = data_dir.parent() {
            mkdir_if_missing(directory.as_ref(), &prefix, &status).await?;
        }
        mkdir_if_missing(directory.as_ref(), &data_dir, &status).await?;
        let backup = encrypt_file(id.as_str().as_bytes(), self.mapper.key(), self.chunk_size)?;
        write_all(
            write.as_ref(),
            &data_dir.child(DIR_ID_BACKUP_NAME, PathTypes::FILE),
            Bytes::from(backup),
            &status,
        )
        .await?;

        debug!(directory = %cleartext, dir_id = %id, shortened = encoded.is_shortened(), "Created directory");
        Ok(id)
    }
}
