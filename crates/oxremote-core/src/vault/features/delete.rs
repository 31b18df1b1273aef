use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::backend::DeleteFeature;
use crate::error::{Result, StorageError};
use crate::path::{Path, PathTypes};
use crate::vault::VaultContext;
use crate::vault::mapper::{
    CONTENTS_NAME, DIR_ID_BACKUP_NAME, DIR_MARKER_NAME, NAME_SIDECAR_NAME,
};

pub(crate) struct CryptoDelete {
    context: Arc<VaultContext>,
}

impl CryptoDelete {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self { context }
    }

    /// Ciphertext objects backing `path`, in deletion order.
    async fn ciphertext_paths(&self, path: &Path) -> Result<Vec<Path>> {
        let context = &self.context;
        let located = context.locate(path, false).await?;
        let node = context
            .mapper
            .node(&located.data_dir, &located.encoded, PathTypes::DIRECTORY);
        let shortened = located.encoded.is_shortened();

        if path.is_directory() {
            let dir_id = context
                .resolver
                .lookup(path)
                .await?
                .ok_or_else(|| StorageError::not_found(path))?;
            let data_dir = context.mapper.data_dir(&dir_id)?;
            let mut doomed = vec![
                data_dir.child(DIR_ID_BACKUP_NAME, PathTypes::FILE),
                data_dir,
                node.child(DIR_MARKER_NAME, PathTypes::FILE),
            ];
            if shortened {
                doomed.push(node.child(NAME_SIDECAR_NAME, PathTypes::FILE));
            }
            doomed.push(node);
            return Ok(doomed);
        }

        let mut object = if shortened {
            node.child(CONTENTS_NAME, PathTypes::FILE)
        } else {
            node.clone().with_types(PathTypes::FILE)
        };
        if let Some(version) = path.version_id() {
            object = object.with_version(version);
            return Ok(vec![object]);
        }
        let mut doomed = vec![object];
        if shortened {
            doomed.push(node.child(NAME_SIDECAR_NAME, PathTypes::FILE));
            doomed.push(node);
        }
        Ok(doomed)
    }
}

#[async_trait]
impl DeleteFeature for CryptoDelete {
    #[instrument(level = "debug", skip(self, paths), fields(count = paths.len()))]
    async fn delete(&self, paths: &[Path]) -> Result<()> {
        let native = self.context.native.delete()?;
        for path in paths {
            let doomed = self.ciphertext_paths(path).await?;
            native.delete(&doomed).await?;
            if path.is_directory() {
                self.context.resolver.evict(path);
            }
            debug!(path = %path, objects = doomed.len(), "Deleted from vault");
        }
        Ok(())
    }
}
