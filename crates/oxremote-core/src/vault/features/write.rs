use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, instrument};

use crate::backend::{TouchFeature, WriteFeature, WriteSink};
use crate::error::Result;
use crate::fs::content::{ChunkedEncryptor, chunk_count, ciphertext_size};
use crate::path::{Attributes, Path};
use crate::transfer::TransferStatus;
use crate::vault::VaultContext;

pub(crate) struct CryptoWrite {
    context: Arc<VaultContext>,
}

impl CryptoWrite {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self { context }
    }
}

/// Encrypts whole chunks as plaintext arrives and forwards them.
struct EncryptingSink {
    inner: Box<dyn WriteSink>,
    encryptor: ChunkedEncryptor,
    buffer: BytesMut,
    index: u64,
    cleartext: u64,
}

impl EncryptingSink {
    async fn flush_full_chunks(&mut self) -> Result<()> {
        let chunk_size = self.encryptor.chunk_size();
        while self.buffer.len() >= chunk_size {
            let plaintext = self.buffer.split_to(chunk_size);
            let ciphertext = self.encryptor.encrypt_chunk(self.index, &plaintext)?;
            self.index += 1;
            self.inner.write(Bytes::from(ciphertext)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl WriteSink for EncryptingSink {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.cleartext += data.len() as u64;
        self.buffer.extend_from_slice(&data);
        self.flush_full_chunks().await
    }

    async fn close(mut self: Box<Self>) -> Result<Attributes> {
        // A final partial chunk, or the single empty chunk of an empty file.
        if !self.buffer.is_empty() || self.index == 0 {
            let plaintext = self.buffer.split();
            let ciphertext = self.encryptor.encrypt_chunk(self.index, &plaintext)?;
            self.index += 1;
            self.inner.write(Bytes::from(ciphertext)).await?;
        }
        let chunk_size = self.encryptor.chunk_size() as u64;
        self.encryptor.finalize(chunk_count(self.cleartext, chunk_size))?;

        let cleartext = self.cleartext;
        let mut attributes = self.inner.close().await?;
        attributes.size = Some(cleartext);
        Ok(attributes)
    }
}

#[async_trait]
impl WriteFeature for CryptoWrite {
    #[instrument(level = "debug", skip(self, status), fields(path = %path, length = status.length))]
    async fn write(&self, path: &Path, status: &TransferStatus) -> Result<Box<dyn WriteSink>> {
        let context = &self.context;
        let located = context.locate(path, true).await?;
        context.write_sidecar(&located).await?;
        let object = context.mapper.file_object(&located.data_dir, &located.encoded);

        let encryptor = ChunkedEncryptor::new(&context.key, context.chunk_size)?;
        let native_status = status
            .clone()
            .with_length(ciphertext_size(status.length, u64::from(context.chunk_size)));
        let mut inner = context.native.write()?.write(&object, &native_status).await?;
        inner.write(Bytes::copy_from_slice(encryptor.header_bytes())).await?;
        debug!(object = %object, "Opened encrypted write");

        Ok(Box::new(EncryptingSink {
            inner,
            encryptor,
            buffer: BytesMut::new(),
            index: 0,
            cleartext: 0,
        }))
    }
}

pub(crate) struct CryptoTouch {
    write: CryptoWrite,
}

impl CryptoTouch {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self {
            write: CryptoWrite::new(context),
        }
    }
}

#[async_trait]
impl TouchFeature for CryptoTouch {
    async fn touch(&self, path: &Path, status: &TransferStatus) -> Result<Path> {
        let sink = self.write.write(path, &status.clone().with_length(0)).await?;
        let attributes = sink.close().await?;
        Ok(Path::file(path.as_str()).with_attributes(attributes))
    }
}
