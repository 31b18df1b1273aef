use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::backend::{BulkFeature, CopyFeature};
use crate::error::{Result, StorageError};
use crate::fs::content::cleartext_size;
use crate::path::Path;
use crate::transfer::TransferStatus;
use crate::vault::VaultContext;

/// Server-side copy inside one vault.
///
/// File headers do not depend on the path, so the ciphertext object is
/// copied unchanged and only the target name is encrypted anew.
pub(crate) struct CryptoCopy {
    context: Arc<VaultContext>,
}

impl CryptoCopy {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl CopyFeature for CryptoCopy {
    #[instrument(level = "debug", skip(self, status), fields(source = %source, target = %target))]
    async fn copy(&self, source: &Path, target: &Path, status: &TransferStatus) -> Result<Path> {
        let context = &self.context;
        let from = context.locate(source, false).await?;
        let source_object = context.mapper.file_object(&from.data_dir, &from.encoded);

        let to = context.locate(target, true).await?;
        context.write_sidecar(&to).await?;
        let target_object = context.mapper.file_object(&to.data_dir, &to.encoded);

        let copied = context
            .native
            .copy()?
            .copy(&source_object, &target_object, status)
            .await?;
        let mut attributes = copied.attributes().clone();
        if let Some(size) = attributes.size {
            attributes.size = Some(cleartext_size(size, u64::from(context.chunk_size)).ok_or_else(|| {
                StorageError::integrity(&target_object, format!("ciphertext size {size} is not a valid object size"))
            })?);
        }
        debug!(object = %target_object, "Copied ciphertext");
        Ok(Path::file(target.as_str()).with_attributes(attributes))
    }
}

/// Creates the parent directories of a batch of uploads up front.
pub(crate) struct CryptoBulk {
    context: Arc<VaultContext>,
}

impl CryptoBulk {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl BulkFeature for CryptoBulk {
    async fn pre(&self, targets: &[Path]) -> Result<()> {
        for target in targets {
            if let Some(parent) = target.parent() {
                self.context.resolver.resolve(&parent).await?;
            }
        }
        Ok(())
    }
}
