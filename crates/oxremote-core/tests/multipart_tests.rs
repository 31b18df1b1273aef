//! Multipart upload orchestration against plain and vault targets.

mod common;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::{TEST_CHUNK_SIZE, get, init_tracing, list_names, session_with_vault, sized_content};
use oxremote_core::backend::memory::{MemoryBackend, MemoryConfig};
use oxremote_core::backend::{Capability, MultipartFeature, MultipartPart, MultipartUpload};
use oxremote_core::config::MultipartPreferences;
use oxremote_core::transfer::{Interrupt, LocalFile, LocalSource, MAXIMUM_UPLOAD_PARTS, part_size_for};
use oxremote_core::{
    Attributes, CapabilityKind, MultipartUploader, Path, Result, StorageError, TransferStatus,
};
use proptest::prelude::*;

fn uploader(backend: &Arc<MemoryBackend>, part_size: u64, concurrency: usize) -> MultipartUploader {
    MultipartUploader::new(backend.capabilities(), &MultipartPreferences::default())
        .with_part_size(part_size)
        .with_concurrency(concurrency)
}

fn source(content: &[u8]) -> Arc<dyn LocalSource> {
    Arc::new(Bytes::copy_from_slice(content))
}

#[tokio::test]
async fn test_upload_splits_into_expected_parts() {
    init_tracing();
    let backend = MemoryBackend::new("mem");
    let content = sized_content(40_500);
    let target = Path::file("/uploads/big.bin");

    let checksum = uploader(&backend, 10_000, 4)
        .upload(&target, source(&content), &TransferStatus::new())
        .await
        .expect("upload");

    assert_eq!(backend.stats().part_uploads(), 5);
    assert_eq!(backend.stats().completed_uploads(), 1);
    assert!(checksum.ends_with("-5"), "checksum {checksum}");
    assert_eq!(backend.object(target.as_str()).expect("object").as_ref(), content.as_slice());
    assert_eq!(backend.pending_uploads(), 0);
}

#[tokio::test]
async fn test_status_records_checksum_and_progress() {
    init_tracing();
    let backend = MemoryBackend::new("mem");
    let content = sized_content(25_000);
    let status = TransferStatus::new();

    let checksum = uploader(&backend, 10_000, 2)
        .upload(&Path::file("/uploads/progress.bin"), source(&content), &status)
        .await
        .expect("upload");

    assert_eq!(status.checksum().as_deref(), Some(checksum.as_str()));
    assert_eq!(status.transferred(), 25_000);
}

#[tokio::test]
async fn test_resume_uploads_only_missing_parts() {
    init_tracing();
    let backend = MemoryBackend::new("mem");
    let content = sized_content(50_000);
    let target = Path::file("/uploads/resumed.bin");
    let upload = uploader(&backend, 10_000, 1);

    backend.fail_part_once(3);
    let first = upload.upload(&target, source(&content), &TransferStatus::new()).await;
    assert!(matches!(first, Err(StorageError::Transient { .. })), "{first:?}");
    let uploaded = backend.stats().part_uploads();
    assert!(uploaded >= 2 && uploaded < 5, "uploaded {uploaded} parts before failing");
    assert_eq!(backend.pending_uploads(), 1);
    assert!(backend.object(target.as_str()).is_none());

    backend.stats().reset();
    let status = TransferStatus::new().with_append(true);
    upload.upload(&target, source(&content), &status).await.expect("resume");

    assert_eq!(backend.stats().part_uploads(), 5 - uploaded);
    assert_eq!(status.transferred(), 50_000);
    assert_eq!(backend.object(target.as_str()).expect("object").as_ref(), content.as_slice());
}

#[tokio::test]
async fn test_without_append_starts_a_new_upload() {
    init_tracing();
    let backend = MemoryBackend::new("mem");
    let content = sized_content(30_000);
    let target = Path::file("/uploads/fresh.bin");
    let upload = uploader(&backend, 10_000, 1);

    backend.fail_part_once(2);
    assert!(upload.upload(&target, source(&content), &TransferStatus::new()).await.is_err());
    backend.stats().reset();

    upload
        .upload(&target, source(&content), &TransferStatus::new())
        .await
        .expect("upload");
    assert_eq!(backend.stats().part_uploads(), 3);
}

#[tokio::test]
async fn test_zero_length_uses_plain_write() {
    init_tracing();
    let backend = MemoryBackend::new("mem");
    let target = Path::file("/uploads/empty");

    uploader(&backend, 10_000, 4)
        .upload(&target, source(b""), &TransferStatus::new())
        .await
        .expect("upload");

    assert_eq!(backend.stats().part_uploads(), 0);
    assert_eq!(backend.stats().completed_uploads(), 0);
    assert_eq!(backend.object(target.as_str()).expect("object").len(), 0);
}

#[tokio::test]
async fn test_interrupt_before_start_uploads_nothing() {
    init_tracing();
    let backend = MemoryBackend::new("mem");
    let interrupt = Interrupt::new();
    interrupt.interrupt();

    let result = uploader(&backend, 10_000, 2)
        .upload(
            &Path::file("/uploads/stopped.bin"),
            source(&sized_content(40_000)),
            &TransferStatus::new().with_interrupt(interrupt),
        )
        .await;

    assert!(matches!(result, Err(StorageError::Canceled)));
    assert_eq!(backend.stats().part_uploads(), 0);
}

/// Uploads part 1 normally; any later part fires the interrupt and then
/// never completes.
struct InterruptingMultipart {
    inner: Arc<MemoryBackend>,
    interrupt: Interrupt,
}

#[async_trait]
impl MultipartFeature for InterruptingMultipart {
    async fn find(&self, path: &Path, status: &TransferStatus) -> Result<Option<MultipartUpload>> {
        MultipartFeature::find(self.inner.as_ref(), path, status).await
    }

    async fn start(&self, path: &Path, status: &TransferStatus) -> Result<MultipartUpload> {
        MultipartFeature::start(self.inner.as_ref(), path, status).await
    }

    async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<MultipartPart>> {
        MultipartFeature::list_parts(self.inner.as_ref(), upload).await
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        number: u32,
        offset: u64,
        data: Bytes,
        status: &TransferStatus,
    ) -> Result<MultipartPart> {
        if number >= 2 {
            self.interrupt.interrupt();
            futures::future::pending::<()>().await;
        }
        MultipartFeature::upload_part(self.inner.as_ref(), upload, number, offset, data, status).await
    }

    async fn complete(
        &self,
        upload: &MultipartUpload,
        parts: &[MultipartPart],
        status: &TransferStatus,
    ) -> Result<Attributes> {
        MultipartFeature::complete(self.inner.as_ref(), upload, parts, status).await
    }
}

async fn interrupt_mid_upload(concurrency: usize) -> Arc<MemoryBackend> {
    init_tracing();
    let backend = MemoryBackend::new("mem");
    let interrupt = Interrupt::new();
    let mut table = backend.capabilities();
    table.insert(Capability::Multipart(Arc::new(InterruptingMultipart {
        inner: backend.clone(),
        interrupt: interrupt.clone(),
    })));
    let target = Path::file("/uploads/stopped.bin");

    let uploader = MultipartUploader::new(table, &MultipartPreferences::default())
        .with_part_size(10_000)
        .with_concurrency(concurrency);
    let status = TransferStatus::new().with_interrupt(interrupt);
    let upload = uploader.upload(&target, source(&sized_content(40_000)), &status);
    let result = tokio::time::timeout(Duration::from_secs(5), upload)
        .await
        .expect("upload stopped after the interrupt");

    assert!(matches!(result, Err(StorageError::Canceled)), "{result:?}");
    assert!(backend.stats().part_uploads() < 4);
    assert_eq!(backend.stats().completed_uploads(), 0);
    assert_eq!(backend.pending_uploads(), 1);
    assert!(backend.object(target.as_str()).is_none());
    backend
}

#[tokio::test]
async fn test_interrupt_while_waiting_for_a_part_slot() {
    let backend = interrupt_mid_upload(1).await;
    // Part 2 only starts once part 1 has finished.
    assert_eq!(backend.stats().part_uploads(), 1);
}

#[tokio::test]
async fn test_interrupt_while_parts_are_in_flight() {
    interrupt_mid_upload(5).await;
}

#[tokio::test]
async fn test_missing_multipart_capability_is_unsupported() {
    init_tracing();
    let backend = MemoryBackend::with_config(
        "plain-store",
        MemoryConfig {
            multipart: false,
            ..MemoryConfig::default()
        },
    );

    let result = uploader(&backend, 10_000, 2)
        .upload(&Path::file("/uploads/x"), source(&sized_content(100)), &TransferStatus::new())
        .await;

    match result {
        Err(StorageError::Unsupported { capability, host }) => {
            assert_eq!(capability, CapabilityKind::Multipart);
            assert_eq!(host, "plain-store");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_upload_from_local_file() {
    init_tracing();
    let backend = MemoryBackend::new("mem");
    let content = sized_content(23_456);
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&content).expect("write temp file");
    let target = Path::file("/uploads/local.bin");

    uploader(&backend, 5_000, 3)
        .upload(&target, Arc::new(LocalFile::new(file.path())), &TransferStatus::new())
        .await
        .expect("upload");

    assert_eq!(backend.stats().part_uploads(), 5);
    assert_eq!(backend.object(target.as_str()).expect("object").as_ref(), content.as_slice());
}

#[tokio::test]
async fn test_encrypted_multipart_round_trip() {
    let (backend, session, _vault) = session_with_vault("mem", "/vault").await;
    let content = sized_content(10_000);
    let target = Path::file("/vault/media/video.bin");

    let caps = session.resolve(&target).await.expect("resolve");
    MultipartUploader::new(caps.table.clone(), &MultipartPreferences::default())
        .with_part_size(3_000)
        .with_concurrency(3)
        .upload(&target, source(&content), &TransferStatus::new())
        .await
        .expect("upload");

    // Part size is rounded up to whole chunks.
    let part_size = part_size_for(10_000, 3_000, u64::from(TEST_CHUNK_SIZE));
    assert_eq!(part_size, 3_072);
    assert_eq!(backend.stats().part_uploads() as u64, 10_000u64.div_ceil(part_size));

    assert_eq!(get(&session, &target).await, content);
    assert_eq!(list_names(&session, &Path::directory("/vault/media")).await, ["video.bin"]);
    let listed = caps
        .table
        .list()
        .expect("list")
        .list(&Path::directory("/vault/media"))
        .await
        .expect("list");
    assert_eq!(listed[0].attributes().size, Some(10_000));
}

#[tokio::test]
async fn test_encrypted_resume_with_same_status() {
    let (backend, session, _vault) = session_with_vault("mem", "/vault").await;
    let content = sized_content(10_000);
    let target = Path::file("/vault/media/resumed.bin");
    let caps = session.resolve(&target).await.expect("resolve");
    let upload = MultipartUploader::new(caps.table.clone(), &MultipartPreferences::default())
        .with_part_size(2 * u64::from(TEST_CHUNK_SIZE))
        .with_concurrency(1);

    backend.fail_part_once(3);
    let status = TransferStatus::new();
    let first = upload.upload(&target, source(&content), &status).await;
    assert!(matches!(first, Err(StorageError::Transient { .. })), "{first:?}");
    let uploaded = backend.stats().part_uploads();
    assert!(uploaded >= 2 && uploaded < 5, "uploaded {uploaded} parts before failing");
    assert_eq!(backend.pending_uploads(), 1);

    // The status still holds the file header used by the uploaded parts.
    backend.stats().reset();
    upload
        .upload(&target, source(&content), &status.clone().with_append(true))
        .await
        .expect("resume");

    assert_eq!(backend.stats().part_uploads(), 5 - uploaded);
    assert_eq!(backend.pending_uploads(), 0);
    assert_eq!(get(&session, &target).await, content);
}

#[tokio::test]
async fn test_encrypted_resume_with_new_status_starts_over() {
    let (backend, session, _vault) = session_with_vault("mem", "/vault").await;
    let content = sized_content(10_000);
    let target = Path::file("/vault/media/restarted.bin");
    let caps = session.resolve(&target).await.expect("resolve");
    let upload = MultipartUploader::new(caps.table.clone(), &MultipartPreferences::default())
        .with_part_size(2 * u64::from(TEST_CHUNK_SIZE))
        .with_concurrency(1);

    backend.fail_part_once(3);
    assert!(upload.upload(&target, source(&content), &TransferStatus::new()).await.is_err());
    backend.stats().reset();

    upload
        .upload(&target, source(&content), &TransferStatus::new().with_append(true))
        .await
        .expect("upload");

    assert_eq!(backend.stats().part_uploads(), 5);
    assert_eq!(backend.stats().completed_uploads(), 1);
    // The abandoned upload is left for the backend to expire.
    assert_eq!(backend.pending_uploads(), 1);
    assert_eq!(get(&session, &target).await, content);
}

proptest! {
    #[test]
    fn prop_part_plan_respects_limits(
        length in 1u64..(1u64 << 42),
        configured in 1u64..(64 << 20),
        alignment in prop::sample::select(vec![1u64, 1024, 32 * 1024]),
    ) {
        let size = part_size_for(length, configured, alignment);
        prop_assert!(size >= configured);
        prop_assert_eq!(size % alignment, 0);
        prop_assert!(length.div_ceil(size) <= MAXIMUM_UPLOAD_PARTS);
    }
}
