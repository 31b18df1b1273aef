//! Integration tests for the vault decorators over the in-memory backend.

mod common;

use bytes::Bytes;
use common::{TEST_CHUNK_SIZE, TEST_PASSPHRASE, exists, get, get_range, list_names, mkdir, put, session_with_vault, sized_content};
use oxremote_core::backend::write_all;
use oxremote_core::vault::MASTER_KEY_FILE_NAME;
use oxremote_core::vault::mapper::{DIR_ID_BACKUP_NAME, DIR_MARKER_NAME, NAME_SIDECAR_NAME};
use oxremote_core::{ByteRange, CryptoVault, Path, StorageError, TransferStatus};
use tokio::task::JoinSet;

// ==================== Content ====================

#[tokio::test]
async fn test_round_trip_across_chunk_boundaries() {
    let (backend, session, vault) = session_with_vault("mem", "/vault").await;
    let file = Path::file("/vault/notes.txt");
    let content = sized_content(TEST_CHUNK_SIZE as usize * 3 + 17);

    put(&session, &file, &content).await;
    assert_eq!(get(&session, &file).await, content);

    // Nothing readable lands on the backend.
    let ciphertext = vault.ciphertext_path(&file).await.expect("ciphertext path");
    let stored = backend.object(ciphertext.as_str()).expect("stored object");
    assert!(stored.len() > content.len());
    assert!(!stored.windows(16).any(|w| w == &content[..16]));
    assert!(backend.object_names().iter().all(|name| !name.contains("notes.txt")));
}

#[tokio::test]
async fn test_empty_file_round_trip() {
    let (_backend, session, _vault) = session_with_vault("mem", "/vault").await;
    let file = Path::file("/vault/empty");

    put(&session, &file, b"").await;
    assert!(exists(&session, &file).await);
    assert!(get(&session, &file).await.is_empty());
}

#[tokio::test]
async fn test_touch_creates_empty_file() {
    let (_backend, session, _vault) = session_with_vault("mem", "/vault").await;
    let file = Path::file("/vault/new/touched");

    let caps = session.resolve(&file).await.expect("resolve");
    let touched = caps
        .table
        .touch()
        .expect("touch")
        .touch(&file, &TransferStatus::new())
        .await
        .expect("touch");

    assert_eq!(touched.attributes().size, Some(0));
    assert!(exists(&session, &file).await);
    assert!(get(&session, &file).await.is_empty());
}

#[tokio::test]
async fn test_range_reads() {
    let (_backend, session, _vault) = session_with_vault("mem", "/vault").await;
    let file = Path::file("/vault/data.bin");
    let content = sized_content(5000);
    put(&session, &file, &content).await;

    let chunk = TEST_CHUNK_SIZE as u64;
    let windows = [
        (0, 10),
        (chunk - 5, 10),
        (chunk, chunk),
        (2 * chunk + 3, 1500),
        (4990, 100),
    ];
    for (offset, length) in windows {
        let end = (offset + length).min(content.len() as u64) as usize;
        let got = get_range(&session, &file, ByteRange::new(offset, length)).await;
        assert_eq!(got, &content[offset as usize..end], "window {offset}+{length}");
    }

    let tail = get_range(
        &session,
        &file,
        ByteRange {
            offset: 4000,
            length: None,
        },
    )
    .await;
    assert_eq!(tail, &content[4000..]);
}

#[tokio::test]
async fn test_tampered_chunk_is_integrity_violation() {
    let (backend, session, vault) = session_with_vault("mem", "/vault").await;
    let file = Path::file("/vault/secret.txt");
    put(&session, &file, &sized_content(2000)).await;

    let ciphertext = vault.ciphertext_path(&file).await.expect("ciphertext path");
    let mut stored = backend.object(ciphertext.as_str()).expect("stored object").to_vec();
    stored[100] ^= 0x01;
    write_all(
        backend.capabilities().write().expect("write").as_ref(),
        &ciphertext,
        Bytes::from(stored),
        &TransferStatus::new(),
    )
    .await
    .expect("overwrite ciphertext");

    let caps = session.resolve(&file).await.expect("resolve");
    let stream = caps.table.read().expect("read").read(&file, ByteRange::all()).await;
    let result = match stream {
        Ok(stream) => oxremote_core::backend::read_to_end(stream).await,
        Err(e) => Err(e),
    };
    match result {
        Err(err) => assert!(err.is_integrity_violation(), "unexpected error {err}"),
        Ok(_) => panic!("tampered content decrypted"),
    }
}

// ==================== Directories ====================

#[tokio::test]
async fn test_directory_markers_written_once() {
    let (backend, session, vault) = session_with_vault("mem", "/vault").await;

    put(&session, &Path::file("/vault/a/b/one.txt"), b"one").await;
    assert_eq!(vault.marker_writes().expect("unlocked"), 2);

    put(&session, &Path::file("/vault/a/b/two.txt"), b"two").await;
    assert_eq!(vault.marker_writes().expect("unlocked"), 2);

    let markers = backend.stats().writes_matching(|p| p.ends_with(&format!("/{DIR_MARKER_NAME}")));
    let backups = backend.stats().writes_matching(|p| p.ends_with(&format!("/{DIR_ID_BACKUP_NAME}")));
    assert_eq!(markers, 2);
    assert_eq!(backups, 2);

    // A fresh unlock reads the markers back instead of writing new ones.
    vault.lock();
    vault.unlock_with_passphrase(TEST_PASSPHRASE).await.expect("unlock");
    put(&session, &Path::file("/vault/a/b/three.txt"), b"three").await;
    assert_eq!(vault.marker_writes().expect("unlocked"), 0);
    assert_eq!(get(&session, &Path::file("/vault/a/b/one.txt")).await, b"one");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_share_directory_ids() {
    let (_backend, session, vault) = session_with_vault("mem", "/vault").await;

    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let session = session.clone();
        tasks.spawn(async move {
            let file = Path::file(format!("/vault/x/y/file-{i}"));
            put(&session, &file, format!("content {i}").as_bytes()).await;
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("writer task");
    }

    assert_eq!(vault.marker_writes().expect("unlocked"), 2);
    assert_eq!(list_names(&session, &Path::directory("/vault/x/y")).await.len(), 8);
    for i in 0..8 {
        let file = Path::file(format!("/vault/x/y/file-{i}"));
        assert_eq!(get(&session, &file).await, format!("content {i}").as_bytes());
    }
}

#[tokio::test]
async fn test_mkdir_existing_directory_fails() {
    let (_backend, session, vault) = session_with_vault("mem", "/vault").await;
    let dir = Path::directory("/vault/docs");
    mkdir(&session, &dir).await;
    assert!(vault.dir_id(&dir).await.expect("lookup").is_some());

    let caps = session.resolve(&dir).await.expect("resolve");
    let again = caps
        .table
        .directory()
        .expect("directory")
        .mkdir(&dir, &TransferStatus::new())
        .await;
    assert!(matches!(again, Err(StorageError::AlreadyExists { .. })));
}

#[tokio::test]
async fn test_listing_decrypts_names_and_sizes() {
    let (_backend, session, _vault) = session_with_vault("mem", "/vault").await;
    let dir = Path::directory("/vault/docs");
    mkdir(&session, &dir).await;
    put(&session, &Path::file("/vault/docs/a.txt"), &sized_content(1500)).await;
    put(&session, &Path::file("/vault/docs/b.txt"), b"").await;
    mkdir(&session, &Path::directory("/vault/docs/sub")).await;

    assert_eq!(list_names(&session, &dir).await, ["a.txt", "b.txt", "sub"]);

    let caps = session.resolve(&dir).await.expect("resolve");
    let children = caps.table.list().expect("list").list(&dir).await.expect("list");
    let a = children.iter().find(|p| p.name() == "a.txt").expect("a.txt listed");
    assert_eq!(a.attributes().size, Some(1500));
    assert!(a.is_file());
    let sub = children.iter().find(|p| p.name() == "sub").expect("sub listed");
    assert!(sub.is_directory());
}

#[tokio::test]
async fn test_long_names_are_shortened() {
    let (backend, session, _vault) = session_with_vault("mem", "/vault").await;
    let long_dir = "d".repeat(200);
    let long_file = "f".repeat(200);
    let file = Path::file(format!("/vault/{long_dir}/{long_file}"));

    put(&session, &file, b"deep").await;

    assert_eq!(get(&session, &file).await, b"deep");
    assert_eq!(list_names(&session, &Path::directory("/vault")).await, [long_dir.clone()]);
    assert_eq!(
        list_names(&session, &Path::directory(format!("/vault/{long_dir}"))).await,
        [long_file]
    );
    let names = backend.object_names();
    assert_eq!(names.iter().filter(|n| n.ends_with(NAME_SIDECAR_NAME)).count(), 2);
}

#[tokio::test]
async fn test_unicode_names_are_normalized() {
    let (_backend, session, _vault) = session_with_vault("mem", "/vault").await;
    put(&session, &Path::file("/vault/caf\u{e9}.txt"), b"nfc").await;

    assert!(exists(&session, &Path::file("/vault/cafe\u{301}.txt")).await);
    assert_eq!(get(&session, &Path::file("/vault/cafe\u{301}.txt")).await, b"nfc");
}

// ==================== Unlock ====================

#[tokio::test]
async fn test_wrong_passphrase_is_access_denied() {
    let (backend, _session, _vault) = session_with_vault("mem", "/vault").await;
    let reopened = CryptoVault::open(backend.capabilities(), &Path::directory("/vault"), 220);

    let result = reopened.unlock_with_passphrase("not the passphrase").await;
    assert!(matches!(result, Err(StorageError::AccessDenied { .. })));
    assert!(!reopened.is_unlocked());

    reopened.unlock_with_passphrase(TEST_PASSPHRASE).await.expect("unlock");
    assert!(reopened.is_unlocked());
}

#[tokio::test]
async fn test_reopened_vault_reads_existing_content() {
    let (backend, session, vault) = session_with_vault("mem", "/vault").await;
    put(&session, &Path::file("/vault/dir/kept.txt"), b"still here").await;
    let dir_id = vault.dir_id(&Path::directory("/vault/dir")).await.expect("lookup");

    let reopened = CryptoVault::open(backend.capabilities(), &Path::directory("/vault"), 220);
    reopened.unlock_with_passphrase(TEST_PASSPHRASE).await.expect("unlock");
    assert_eq!(reopened.chunk_size().expect("unlocked"), TEST_CHUNK_SIZE);
    assert_eq!(reopened.dir_id(&Path::directory("/vault/dir")).await.expect("lookup"), dir_id);
    assert!(backend.object(&format!("/vault/{MASTER_KEY_FILE_NAME}")).is_some());
}

#[tokio::test]
async fn test_locked_vault_rejects_access() {
    let (_backend, session, vault) = session_with_vault("mem", "/vault").await;
    vault.lock();

    // The session has no password callback, so the vault stays locked.
    let result = session.resolve(&Path::file("/vault/x")).await;
    assert!(matches!(result, Err(StorageError::AccessDenied { .. })));
    assert!(matches!(vault.decorate(), Err(StorageError::AccessDenied { .. })));
}
