//! Sources of upload bodies.

use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Result, StorageError};

/// Random-access body of an upload.
#[async_trait]
pub trait LocalSource: Send + Sync {
    async fn len(&self) -> Result<u64>;

    /// Exactly `length` bytes starting at `offset`.
    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes>;
}

#[async_trait]
impl LocalSource for Bytes {
    async fn len(&self) -> Result<u64> {
        Ok(Bytes::len(self) as u64)
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        let start = offset as usize;
        let end = start + length as usize;
        if end > Bytes::len(self) {
            return Err(StorageError::interoperability(
                "read local range",
                "<memory>",
                format!("range {start}..{end} beyond {} bytes", Bytes::len(self)),
            ));
        }
        Ok(self.slice(start..end))
    }
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::not_found(self.path.display())
        } else {
            StorageError::transient(self.path.display(), source)
        }
    }
}

#[async_trait]
impl LocalSource for LocalFile {
    async fn len(&self) -> Result<u64> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| self.io_error(e))?;
        Ok(metadata.len())
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await.map_err(|e| self.io_error(e))?;
        file.seek(SeekFrom::Start(offset)).await.map_err(|e| self.io_error(e))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer).await.map_err(|e| self.io_error(e))?;
        Ok(Bytes::from(buffer))
    }
}
