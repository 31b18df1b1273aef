use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::backend::{MultipartFeature, MultipartPart, MultipartUpload};
use crate::error::{Result, StorageError};
use crate::fs::content::{
    CHUNK_OVERHEAD, ChunkedEncryptor, HEADER_SIZE, chunk_count, chunk_offset, segment_cleartext_len,
};
use crate::path::{Attributes, Path};
use crate::transfer::TransferStatus;
use crate::vault::VaultContext;

/// Multipart uploads of encrypted objects.
///
/// Parts are aligned to whole chunks, so each part encrypts independently
/// with the file's shared [`ChunkedEncryptor`], which travels in the
/// [`TransferStatus`]. Part 1 carries the file header. Part lengths reported
/// to callers are cleartext lengths.
pub(crate) struct CryptoMultipart {
    context: Arc<VaultContext>,
    /// Native uploads keyed by upload id.
    uploads: DashMap<String, MultipartUpload>,
}

impl CryptoMultipart {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self {
            context,
            uploads: DashMap::new(),
        }
    }

    fn chunk_size(&self) -> u64 {
        u64::from(self.context.chunk_size)
    }

    fn native_upload(&self, upload: &MultipartUpload) -> Result<MultipartUpload> {
        self.uploads
            .get(&upload.id)
            .map(|native| native.clone())
            .ok_or_else(|| {
                StorageError::interoperability("upload part", &upload.path, format!("unknown upload {}", upload.id))
            })
    }

    fn cleartext_upload(&self, native: MultipartUpload, path: &Path) -> MultipartUpload {
        let upload = MultipartUpload {
            id: native.id.clone(),
            path: path.clone(),
            created: native.created,
        };
        self.uploads.insert(native.id.clone(), native);
        upload
    }

    fn ciphertext_length(&self, number: u32, cleartext: u64) -> u64 {
        let chunks = cleartext.div_ceil(self.chunk_size()).max(1);
        let header = if number == 1 { HEADER_SIZE as u64 } else { 0 };
        header + cleartext + chunks * CHUNK_OVERHEAD as u64
    }
}

#[async_trait]
impl MultipartFeature for CryptoMultipart {
    fn part_alignment(&self) -> u64 {
        self.chunk_size()
    }

    async fn find(&self, path: &Path, status: &TransferStatus) -> Result<Option<MultipartUpload>> {
        // Without the original header the parts already uploaded are useless.
        if status.encryptor().is_none() {
            return Ok(None);
        }
        let located = match self.context.locate(path, false).await {
            Ok(located) => located,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let object = self.context.mapper.file_object(&located.data_dir, &located.encoded);
        let native = self.context.native.multipart()?.find(&object, status).await?;
        Ok(native.map(|native| self.cleartext_upload(native, path)))
    }

    #[instrument(level = "debug", skip(self, status), fields(path = %path))]
    async fn start(&self, path: &Path, status: &TransferStatus) -> Result<MultipartUpload> {
        let context = &self.context;
        let located = context.locate(path, true).await?;
        context.write_sidecar(&located).await?;
        let object = context.mapper.file_object(&located.data_dir, &located.encoded);

        status.encryptor_or_try_insert(|| ChunkedEncryptor::new(&context.key, context.chunk_size))?;
        let native = context.native.multipart()?.start(&object, status).await?;
        debug!(object = %object, upload = %native.id, "Started encrypted multipart upload");
        Ok(self.cleartext_upload(native, path))
    }

    async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<MultipartPart>> {
        let native = self.native_upload(upload)?;
        let parts = self.context.native.multipart()?.list_parts(&native).await?;
        parts
            .into_iter()
            .map(|mut part| {
                part.length = segment_cleartext_len(part.length, self.chunk_size(), part.number == 1)
                    .ok_or_else(|| {
                        StorageError::integrity(
                            &native.path,
                            format!("part {} has an impossible length {}", part.number, part.length),
                        )
                    })?;
                Ok(part)
            })
            .collect()
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        number: u32,
        offset: u64,
        data: Bytes,
        status: &TransferStatus,
    ) -> Result<MultipartPart> {
        let native = self.native_upload(upload)?;
        let encryptor = status.encryptor().ok_or_else(|| {
            StorageError::interoperability("upload part", &upload.path, "no content encryptor for this transfer")
        })?;
        if offset % self.chunk_size() != 0 {
            return Err(StorageError::interoperability(
                "upload part",
                &upload.path,
                format!("offset {offset} is not aligned to the chunk size {}", self.chunk_size()),
            ));
        }

        let first_index = offset / self.chunk_size();
        let chunks = encryptor.encrypt_chunks(first_index, &data)?;
        let (body, native_offset) = if number == 1 {
            let mut body = BytesMut::with_capacity(HEADER_SIZE + chunks.len());
            body.put_slice(encryptor.header_bytes());
            body.put_slice(&chunks);
            (body.freeze(), 0)
        } else {
            (Bytes::from(chunks), chunk_offset(first_index, self.chunk_size()))
        };

        let mut part = self
            .context
            .native
            .multipart()?
            .upload_part(&native, number, native_offset, body, status)
            .await?;
        part.length = data.len() as u64;
        Ok(part)
    }

    #[instrument(level = "debug", skip(self, parts, status), fields(path = %upload.path, parts = parts.len()))]
    async fn complete(
        &self,
        upload: &MultipartUpload,
        parts: &[MultipartPart],
        status: &TransferStatus,
    ) -> Result<Attributes> {
        let native = self.native_upload(upload)?;
        let encryptor = status.encryptor().ok_or_else(|| {
            StorageError::interoperability(
                "complete multipart upload",
                &upload.path,
                "no content encryptor for this transfer",
            )
        })?;
        encryptor.finalize(chunk_count(status.length, self.chunk_size()))?;

        let native_parts: Vec<MultipartPart> = parts
            .iter()
            .map(|part| MultipartPart {
                length: self.ciphertext_length(part.number, part.length),
                ..part.clone()
            })
            .collect();
        let mut attributes = self
            .context
            .native
            .multipart()?
            .complete(&native, &native_parts, status)
            .await?;
        self.uploads.remove(&upload.id);
        attributes.size = Some(status.length);
        Ok(attributes)
    }
}
