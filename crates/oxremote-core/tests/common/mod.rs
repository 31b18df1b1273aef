#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use oxremote_core::backend::memory::MemoryBackend;
use oxremote_core::backend::{read_to_end, write_all};
use oxremote_core::vault::KdfParams;
use oxremote_core::{ByteRange, CryptoVault, Path, Session, TransferStatus, VaultSettings};

pub const TEST_PASSPHRASE: &str = "test-passphrase-12345";

/// Small chunks so that a few kilobytes already span several of them.
pub const TEST_CHUNK_SIZE: u32 = 1024;

/// Route `RUST_LOG` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_settings() -> VaultSettings {
    VaultSettings::default()
        .with_kdf(KdfParams::fast())
        .with_chunk_size(TEST_CHUNK_SIZE)
}

/// Content of exactly `size` bytes with a repeating pattern.
pub fn sized_content(size: usize) -> Vec<u8> {
    let pattern = b"0123456789ABCDEF";
    (0..size).map(|i| pattern[i % pattern.len()]).collect()
}

/// A plain backend with an unlocked vault at `root` registered on the session.
pub async fn session_with_vault(host: &str, root: &str) -> (Arc<MemoryBackend>, Session, Arc<CryptoVault>) {
    init_tracing();
    let backend = MemoryBackend::new(host);
    let session = Session::new(backend.capabilities());
    let vault = CryptoVault::create(
        backend.capabilities(),
        &Path::directory(root),
        TEST_PASSPHRASE,
        test_settings(),
    )
    .await
    .expect("create vault");
    session.vaults().add(vault.clone()).expect("register vault");
    (backend, session, vault)
}

pub async fn put(session: &Session, path: &Path, data: &[u8]) {
    let caps = session.resolve(path).await.expect("resolve");
    let status = TransferStatus::new().with_length(data.len() as u64);
    write_all(
        caps.table.write().expect("write capability").as_ref(),
        path,
        Bytes::copy_from_slice(data),
        &status,
    )
    .await
    .expect("write");
}

pub async fn get(session: &Session, path: &Path) -> Vec<u8> {
    get_range(session, path, ByteRange::all()).await
}

pub async fn get_range(session: &Session, path: &Path, range: ByteRange) -> Vec<u8> {
    let caps = session.resolve(path).await.expect("resolve");
    let stream = caps
        .table
        .read()
        .expect("read capability")
        .read(path, range)
        .await
        .expect("open read");
    read_to_end(stream).await.expect("read body")
}

pub async fn mkdir(session: &Session, path: &Path) {
    let caps = session.resolve(path).await.expect("resolve");
    caps.table
        .directory()
        .expect("directory capability")
        .mkdir(path, &TransferStatus::new())
        .await
        .expect("mkdir");
}

pub async fn exists(session: &Session, path: &Path) -> bool {
    let caps = session.resolve(path).await.expect("resolve");
    caps.table
        .find()
        .expect("find capability")
        .exists(path)
        .await
        .expect("exists")
}

pub async fn list_names(session: &Session, dir: &Path) -> Vec<String> {
    let caps = session.resolve(dir).await.expect("resolve");
    let mut names: Vec<String> = caps
        .table
        .list()
        .expect("list capability")
        .list(dir)
        .await
        .expect("list")
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    names.sort();
    names
}
