//! Backend capability surface.
//!
//! A backend is consumed only through these traits. Each trait is one
//! capability tag of [`CapabilityKind`]; a [`CapabilityTable`] maps the tags a
//! session supports to implementations, and the vault layer swaps in
//! encrypting decorators for paths inside a vault.

mod capability;
pub mod memory;
mod session;

use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::path::{Attributes, ByteRange, Path};
use crate::transfer::TransferStatus;

pub use capability::{Capability, CapabilityKind, CapabilityTable};
pub use session::{Domain, ResolvedCapabilities, Session};

/// Body of a read, delivered in backend-sized pieces.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait ReadFeature: Send + Sync {
    async fn read(&self, path: &Path, range: ByteRange) -> Result<ByteStream>;
}

/// Open upload of a single object.
#[async_trait]
pub trait WriteSink: Send {
    async fn write(&mut self, data: Bytes) -> Result<()>;

    /// Seal the object and return its metadata (checksum, version).
    async fn close(self: Box<Self>) -> Result<Attributes>;
}

#[async_trait]
pub trait WriteFeature: Send + Sync {
    /// Open a sink for `path`. `status.length` is the expected cleartext length.
    async fn write(&self, path: &Path, status: &TransferStatus) -> Result<Box<dyn WriteSink>>;
}

#[async_trait]
pub trait DirectoryFeature: Send + Sync {
    /// Create `path`. For a volume, `status.region` selects its location.
    async fn mkdir(&self, path: &Path, status: &TransferStatus) -> Result<Path>;
}

#[async_trait]
pub trait DeleteFeature: Send + Sync {
    /// Delete `paths` in order. Directories must already be empty.
    async fn delete(&self, paths: &[Path]) -> Result<()>;
}

#[async_trait]
pub trait FindFeature: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;
}

#[async_trait]
pub trait LocationFeature: Send + Sync {
    /// Region of `container`, or `None` when the backend has no notion of one.
    async fn locate(&self, container: &Path) -> Result<Option<String>>;
}

#[async_trait]
pub trait TouchFeature: Send + Sync {
    async fn touch(&self, path: &Path, status: &TransferStatus) -> Result<Path>;
}

#[async_trait]
pub trait CopyFeature: Send + Sync {
    /// Server-side copy of a file.
    async fn copy(&self, source: &Path, target: &Path, status: &TransferStatus) -> Result<Path>;
}

#[async_trait]
pub trait ListFeature: Send + Sync {
    /// Immediate children of `directory`, in no particular order.
    async fn list(&self, directory: &Path) -> Result<Vec<Path>>;
}

#[async_trait]
pub trait BulkFeature: Send + Sync {
    /// Prepare for a batch of uploads to `targets` before any body is sent.
    async fn pre(&self, targets: &[Path]) -> Result<()>;
}

/// In-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub id: String,
    pub path: Path,
    pub created: SystemTime,
}

/// One uploaded part. Numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub number: u32,
    pub etag: String,
    pub length: u64,
    pub last_modified: SystemTime,
}

#[async_trait]
pub trait MultipartFeature: Send + Sync {
    /// Every part except the last must be a multiple of this many bytes.
    fn part_alignment(&self) -> u64 {
        1
    }

    /// Most recent in-progress upload for `path`, if any.
    async fn find(&self, path: &Path, status: &TransferStatus) -> Result<Option<MultipartUpload>>;

    async fn start(&self, path: &Path, status: &TransferStatus) -> Result<MultipartUpload>;

    async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<MultipartPart>>;

    /// Upload part `number` holding the source bytes starting at `offset`.
    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        number: u32,
        offset: u64,
        data: Bytes,
        status: &TransferStatus,
    ) -> Result<MultipartPart>;

    /// Concatenate `parts` (ascending, contiguous from 1) into the object.
    async fn complete(
        &self,
        upload: &MultipartUpload,
        parts: &[MultipartPart],
        status: &TransferStatus,
    ) -> Result<Attributes>;
}

/// Collect a whole read stream.
pub async fn read_to_end(stream: ByteStream) -> Result<Vec<u8>> {
    use futures::TryStreamExt;

    stream
        .try_fold(Vec::new(), |mut acc, piece| async move {
            acc.extend_from_slice(&piece);
            Ok(acc)
        })
        .await
}

/// Write `data` as the whole body of `path`.
pub async fn write_all(
    feature: &dyn WriteFeature,
    path: &Path,
    data: Bytes,
    status: &TransferStatus,
) -> Result<Attributes> {
    let mut sink = feature.write(path, status).await?;
    sink.write(data).await?;
    sink.close().await
}

/// Create `path` unless it already exists.
pub async fn mkdir_if_missing(
    feature: &dyn DirectoryFeature,
    path: &Path,
    status: &TransferStatus,
) -> Result<()> {
    match feature.mkdir(path, status).await {
        Ok(_) | Err(crate::error::StorageError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
