//! Cleartext to ciphertext path mapping.
//!
//! ```text
//! <vault>/masterkey.cryptomator
//! <vault>/d/<h[0..2]>/<h[2..32]>/               data dir of a directory id
//!                     <enc>.c9r                  file
//!                     <enc>.c9r/dir.c9r          directory marker
//!                     <sha1>.c9s/name.c9s        full name of a shortened node
//!                     <sha1>.c9s/contents.c9r    shortened file
//!                     <sha1>.c9s/dir.c9r         shortened directory marker
//!                     dirid.c9r                  id backup (non-root only)
//! ```

use std::sync::Arc;

use crate::crypto::MasterKey;
use crate::error::{Result, StorageError};
use crate::fs::name::{
    ENCRYPTED_SUFFIX, SHORTENED_SUFFIX, decrypt_filename, encrypt_filename, hash_dir_id,
    shortened_name,
};
use crate::path::{Path, PathTypes};

use super::cache::VaultCache;
use super::path::DirId;

pub const DATA_DIR_NAME: &str = "d";
pub const DIR_MARKER_NAME: &str = "dir.c9r";
pub const DIR_ID_BACKUP_NAME: &str = "dirid.c9r";
pub const NAME_SIDECAR_NAME: &str = "name.c9s";
pub const CONTENTS_NAME: &str = "contents.c9r";

/// Encoded form of one cleartext name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedName {
    /// Full encoded name with its `.c9r` suffix.
    pub full: String,
    /// Name of the node in the parent data dir: `full`, or the `.c9s`
    /// placeholder when `full` is too long.
    pub stored: String,
}

impl EncodedName {
    #[inline]
    pub fn is_shortened(&self) -> bool {
        self.stored != self.full
    }
}

pub struct PathMapper {
    root: Path,
    key: Arc<MasterKey>,
    cache: Arc<VaultCache>,
    shortening_threshold: usize,
}

impl PathMapper {
    pub fn new(root: Path, key: Arc<MasterKey>, cache: Arc<VaultCache>, shortening_threshold: usize) -> Self {
        Self {
            root,
            key,
            cache,
            shortening_threshold,
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn key(&self) -> &MasterKey {
        &self.key
    }

    #[inline]
    pub fn cache(&self) -> &VaultCache {
        &self.cache
    }

    /// Cleartext segments of `path` below the vault root.
    pub fn relative<'a>(&self, path: &'a Path) -> Result<Vec<&'a str>> {
        path.relative_to(&self.root).ok_or_else(|| {
            StorageError::interoperability("map path", path, format!("not inside vault {}", self.root))
        })
    }

    pub fn data_dir(&self, dir_id: &DirId) -> Result<Path> {
        let hash = hash_dir_id(dir_id.as_str(), &self.key)?;
        let (prefix, rest) = hash.split_at(2);
        Ok(self
            .root
            .child(DATA_DIR_NAME, PathTypes::DIRECTORY)
            .child(prefix, PathTypes::DIRECTORY)
            .child(rest, PathTypes::DIRECTORY))
    }

    pub fn encode_name(&self, name: &str, parent: &DirId) -> Result<EncodedName> {
        let encrypted = match self.cache.get_encrypted_name(parent, name) {
            Some(hit) => hit,
            None => {
                let encrypted = encrypt_filename(name, parent.as_str(), &self.key)?;
                self.cache.insert_encrypted_name(parent, name, encrypted.clone());
                encrypted
            }
        };
        let full = format!("{encrypted}{ENCRYPTED_SUFFIX}");
        let stored = if full.len() > self.shortening_threshold {
            shortened_name(&full)
        } else {
            full.clone()
        };
        Ok(EncodedName { full, stored })
    }

    /// Decrypt a full encoded name found in the data dir of `parent`.
    pub fn decode_name(&self, full: &str, parent: &DirId) -> Result<String> {
        Ok(decrypt_filename(full, parent.as_str(), &self.key)?)
    }

    /// Folder or object named `encoded.stored` in `data_dir`.
    pub fn node(&self, data_dir: &Path, encoded: &EncodedName, types: PathTypes) -> Path {
        data_dir.child(&encoded.stored, types)
    }

    /// Object holding the ciphertext of a file.
    pub fn file_object(&self, data_dir: &Path, encoded: &EncodedName) -> Path {
        if encoded.is_shortened() {
            self.node(data_dir, encoded, PathTypes::DIRECTORY)
                .child(CONTENTS_NAME, PathTypes::FILE)
        } else {
            self.node(data_dir, encoded, PathTypes::FILE)
        }
    }

    pub fn dir_marker(&self, data_dir: &Path, encoded: &EncodedName) -> Path {
        self.node(data_dir, encoded, PathTypes::DIRECTORY)
            .child(DIR_MARKER_NAME, PathTypes::FILE)
    }

    pub fn name_sidecar(&self, data_dir: &Path, encoded: &EncodedName) -> Path {
        self.node(data_dir, encoded, PathTypes::DIRECTORY)
            .child(NAME_SIDECAR_NAME, PathTypes::FILE)
    }

    pub fn master_key_file(&self) -> Path {
        self.root.child(super::master_key::MASTER_KEY_FILE_NAME, PathTypes::FILE)
    }
}

/// Whether a data dir entry is a placeholder for a shortened name.
pub fn is_shortened_node(name: &str) -> bool {
    name.ends_with(SHORTENED_SUFFIX)
}
