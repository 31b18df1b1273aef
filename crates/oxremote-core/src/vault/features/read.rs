use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::{instrument, trace};

use crate::backend::{ByteStream, ReadFeature, read_to_end};
use crate::error::{Result, StorageError};
use crate::fs::content::{
    ChunkedDecryptor, ContentContext, ContentError, HEADER_SIZE, chunk_index, chunk_offset,
    ciphertext_range,
};
use crate::path::{ByteRange, Path};
use crate::vault::VaultContext;

pub(crate) struct CryptoRead {
    context: Arc<VaultContext>,
}

impl CryptoRead {
    pub(crate) fn new(context: Arc<VaultContext>) -> Self {
        Self { context }
    }
}

/// Decrypts a ciphertext stream that starts on a chunk boundary.
struct DecryptingStream {
    source: ByteStream,
    decryptor: Arc<ChunkedDecryptor>,
    buffer: BytesMut,
    index: u64,
    offset: u64,
    end: u64,
    chunks_seen: u64,
    path: String,
    exhausted: bool,
}

impl DecryptingStream {
    /// Next non-empty slice of verified plaintext, or `None` at the end.
    async fn next_plaintext(&mut self) -> Result<Option<Bytes>> {
        let encrypted_chunk = self.decryptor.encrypted_chunk_size();
        loop {
            while !self.exhausted && self.buffer.len() < encrypted_chunk {
                match self.source.next().await {
                    Some(piece) => self.buffer.extend_from_slice(&piece?),
                    None => self.exhausted = true,
                }
            }
            if self.buffer.is_empty() {
                if self.index == 0 && self.chunks_seen == 0 {
                    return Err(ContentError::Truncated {
                        expected: HEADER_SIZE + crate::fs::content::CHUNK_OVERHEAD,
                        actual: HEADER_SIZE,
                        context: ContentContext::new().with_path(self.path.clone()),
                    }
                    .into());
                }
                return Ok(None);
            }

            let take = self.buffer.len().min(encrypted_chunk);
            let chunk = self.buffer.split_to(take);
            let plaintext = self
                .decryptor
                .decrypt_range(self.index, &chunk, self.offset, self.end)
                .map_err(|e| with_path(e, &self.path))?;
            trace!(index = self.index, len = plaintext.len(), "Decrypted chunk");
            self.index += 1;
            self.chunks_seen += 1;

            if self.index * self.decryptor.chunk_size() as u64 >= self.end {
                self.exhausted = true;
                self.buffer.clear();
            }
            if !plaintext.is_empty() {
                return Ok(Some(Bytes::from(plaintext)));
            }
        }
    }
}

fn with_path(err: ContentError, path: &str) -> StorageError {
    match err {
        ContentError::ChunkAuthenticationFailed { context } => {
            ContentError::ChunkAuthenticationFailed { context: context.with_path(path) }.into()
        }
        other => other.into(),
    }
}

#[async_trait]
impl ReadFeature for CryptoRead {
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    async fn read(&self, path: &Path, range: ByteRange) -> Result<ByteStream> {
        let located = self.context.locate(path, false).await?;
        let object = self.context.mapper.file_object(&located.data_dir, &located.encoded);
        let native = self.context.native.read()?;

        let header = read_to_end(native.read(&object, ByteRange::new(0, HEADER_SIZE as u64)).await?).await?;
        let decryptor = Arc::new(ChunkedDecryptor::open(&self.context.key, &header).map_err(|e| match e {
            ContentError::Truncated { expected, actual, .. } => ContentError::Truncated {
                expected,
                actual,
                context: ContentContext::new().with_path(path.as_str()),
            }
            .into(),
            other => StorageError::from(other),
        })?);
        let chunk_size = decryptor.chunk_size() as u64;

        let end = range.length.map_or(u64::MAX, |length| range.offset.saturating_add(length));
        if end <= range.offset {
            return Ok(futures::stream::empty().boxed());
        }
        let first = chunk_index(range.offset, chunk_size);
        let start = chunk_offset(first, chunk_size);
        let cipher_range = match range.length {
            Some(_) => ByteRange::new(start, ciphertext_range(range.offset, end, chunk_size).1 - start),
            None => ByteRange {
                offset: start,
                length: None,
            },
        };
        let source = native.read(&object, cipher_range).await?;

        let state = DecryptingStream {
            source,
            decryptor,
            buffer: BytesMut::new(),
            index: first,
            offset: range.offset,
            end,
            chunks_seen: 0,
            path: path.to_string(),
            exhausted: false,
        };
        Ok(futures::stream::try_unfold(state, |mut state| async move {
            Ok(state.next_plaintext().await?.map(|plaintext| (plaintext, state)))
        })
        .boxed())
    }
}
