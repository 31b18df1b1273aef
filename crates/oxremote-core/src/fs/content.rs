//! Chunked authenticated encryption of file contents.
//!
//! # Format
//!
//! - **Header (68 bytes)**: 12-byte nonce + AES-GCM(master AES key) over a
//!   40-byte payload + 16-byte tag. The payload is 4 reserved `0xFF` bytes, the
//!   plaintext chunk size as a big-endian `u32`, and the 32-byte content key.
//! - **Chunks**: 12-byte nonce + AES-GCM(content key) ciphertext + 16-byte tag,
//!   with the chunk index (big-endian `u64`) followed by the header nonce as
//!   associated data.
//!
//! Every chunk verifies on its own, so range reads and out-of-order multipart
//! writes never need the rest of the file. An empty file is a header followed
//! by one empty chunk; a length that is an exact multiple of the chunk size has
//! no trailing empty chunk.

use std::collections::BTreeSet;
use std::fmt;

use aead::Payload;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use parking_lot::Mutex;
use rand::RngCore;
use thiserror::Error;
use tracing::trace;
use zeroize::Zeroizing;

use crate::crypto::MasterKey;

pub const HEADER_SIZE: usize = 68;
pub const HEADER_NONCE_SIZE: usize = 12;
pub const CHUNK_NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
/// Ciphertext bytes added to every chunk (nonce + tag).
pub const CHUNK_OVERHEAD: usize = CHUNK_NONCE_SIZE + TAG_SIZE;
pub const DEFAULT_CHUNK_SIZE: u32 = 32 * 1024;
/// Largest accepted plaintext chunk size (16 MiB).
pub const MAX_CHUNK_SIZE: u32 = 16 * 1024 * 1024;

const HEADER_PAYLOAD_SIZE: usize = 40;
const RESERVED: [u8; 4] = [0xFF; 4];

/// Context for content operations.
#[derive(Debug, Clone, Default)]
pub struct ContentContext {
    pub path: Option<String>,
    pub chunk: Option<u64>,
    pub operation: Option<&'static str>,
}

impl ContentContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk: u64) -> Self {
        self.chunk = Some(chunk);
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl fmt::Display for ContentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(op) = self.operation {
            parts.push(op.to_string());
        }
        if let Some(ref path) = self.path {
            parts.push(format!("at {path}"));
        }
        if let Some(chunk) = self.chunk {
            parts.push(format!("chunk {chunk}"));
        }
        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[derive(Error, Debug)]
pub enum ContentError {
    /// **[INTEGRITY VIOLATION]** The header tag did not verify: tampered
    /// header or wrong vault key.
    #[error("[INTEGRITY VIOLATION] Header authentication failed for {context}")]
    HeaderAuthenticationFailed { context: ContentContext },

    /// **[INTEGRITY VIOLATION]** A chunk tag did not verify: tampered, swapped
    /// or reordered chunk.
    #[error("[INTEGRITY VIOLATION] Chunk authentication failed for {context}")]
    ChunkAuthenticationFailed { context: ContentContext },

    /// **[INTEGRITY VIOLATION]** Ciphertext shorter than its structure requires.
    #[error("[INTEGRITY VIOLATION] Truncated ciphertext for {context}: expected at least {expected} bytes, got {actual}")]
    Truncated {
        expected: usize,
        actual: usize,
        context: ContentContext,
    },

    #[error("Malformed header for {context}: {reason}")]
    InvalidHeader { reason: String, context: ContentContext },

    #[error("Invalid chunk size {chunk_size} (must be 1..={MAX_CHUNK_SIZE})")]
    InvalidChunkSize { chunk_size: u32 },

    #[error("Chunk {index} holds {len} bytes, more than the chunk size {chunk_size}")]
    ChunkTooLarge { index: u64, len: usize, chunk_size: usize },

    #[error("Cannot seal encrypted object: chunks {missing:?} were never submitted")]
    MissingChunks { missing: Vec<u64> },

    #[error("Encryption failed for {context}")]
    EncryptionFailed { context: ContentContext },
}

impl ContentError {
    pub fn context(&self) -> Option<&ContentContext> {
        match self {
            ContentError::HeaderAuthenticationFailed { context }
            | ContentError::ChunkAuthenticationFailed { context }
            | ContentError::Truncated { context, .. }
            | ContentError::InvalidHeader { context, .. }
            | ContentError::EncryptionFailed { context } => Some(context),
            _ => None,
        }
    }
}

fn validate_chunk_size(chunk_size: u32) -> Result<(), ContentError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(ContentError::InvalidChunkSize { chunk_size });
    }
    Ok(())
}

// ============================================================================
// Size math
// ============================================================================

/// Number of chunks a plaintext of `cleartext` bytes occupies (at least one).
pub fn chunk_count(cleartext: u64, chunk_size: u64) -> u64 {
    if cleartext == 0 {
        1
    } else {
        cleartext.div_ceil(chunk_size)
    }
}

/// Chunk holding plaintext byte `offset`.
#[inline]
pub fn chunk_index(offset: u64, chunk_size: u64) -> u64 {
    offset / chunk_size
}

/// Ciphertext offset of chunk `index`.
#[inline]
pub fn chunk_offset(index: u64, chunk_size: u64) -> u64 {
    HEADER_SIZE as u64 + index * (chunk_size + CHUNK_OVERHEAD as u64)
}

/// Total ciphertext size of a plaintext of `cleartext` bytes.
pub fn ciphertext_size(cleartext: u64, chunk_size: u64) -> u64 {
    HEADER_SIZE as u64 + cleartext + chunk_count(cleartext, chunk_size) * CHUNK_OVERHEAD as u64
}

/// Plaintext size of a ciphertext of `ciphertext` bytes, or `None` when the
/// size cannot belong to a well-formed object.
pub fn cleartext_size(ciphertext: u64, chunk_size: u64) -> Option<u64> {
    let content = ciphertext.checked_sub(HEADER_SIZE as u64)?;
    let encrypted_chunk = chunk_size + CHUNK_OVERHEAD as u64;
    let full = content / encrypted_chunk;
    let rest = content % encrypted_chunk;
    match (full, rest) {
        (0, 0) => None,
        (_, 0) => Some(full * chunk_size),
        (_, r) if r < CHUNK_OVERHEAD as u64 => None,
        (_, r) => Some(full * chunk_size + r - CHUNK_OVERHEAD as u64),
    }
}

/// Plaintext length carried by a ciphertext segment of `len` bytes that
/// starts on a chunk boundary, optionally preceded by the header.
pub fn segment_cleartext_len(len: u64, chunk_size: u64, includes_header: bool) -> Option<u64> {
    let body = if includes_header {
        len.checked_sub(HEADER_SIZE as u64)?
    } else {
        len
    };
    if body == 0 {
        return Some(0);
    }
    let encrypted_chunk = chunk_size + CHUNK_OVERHEAD as u64;
    let chunks = body.div_ceil(encrypted_chunk);
    body.checked_sub(chunks * CHUNK_OVERHEAD as u64)
}

/// Ciphertext window `[start, end)` covering the plaintext window
/// `[offset, end)`, aligned to whole chunks, header excluded.
pub fn ciphertext_range(offset: u64, end: u64, chunk_size: u64) -> (u64, u64) {
    let first = chunk_index(offset, chunk_size);
    let last = if end == 0 { 0 } else { chunk_index(end - 1, chunk_size) };
    (chunk_offset(first, chunk_size), chunk_offset(last + 1, chunk_size))
}

// ============================================================================
// Header
// ============================================================================

/// Decrypted file header: content key, header nonce and chunk size.
pub struct FileHeader {
    nonce: [u8; HEADER_NONCE_SIZE],
    content_key: Zeroizing<[u8; 32]>,
    chunk_size: u32,
}

impl FileHeader {
    /// Fresh header with a random nonce and content key.
    pub fn new(chunk_size: u32) -> Result<Self, ContentError> {
        validate_chunk_size(chunk_size)?;
        let mut nonce = [0u8; HEADER_NONCE_SIZE];
        let mut content_key = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut nonce);
        rand::rng().fill_bytes(&mut content_key[..]);
        Ok(Self {
            nonce,
            content_key,
            chunk_size,
        })
    }

    #[inline]
    pub fn nonce(&self) -> &[u8; HEADER_NONCE_SIZE] {
        &self.nonce
    }

    #[inline]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Seal the header under the vault's AES key.
    pub fn encrypt(&self, master_key: &MasterKey) -> Result<[u8; HEADER_SIZE], ContentError> {
        let mut payload = Zeroizing::new([0u8; HEADER_PAYLOAD_SIZE]);
        payload[..4].copy_from_slice(&RESERVED);
        payload[4..8].copy_from_slice(&self.chunk_size.to_be_bytes());
        payload[8..].copy_from_slice(&self.content_key[..]);

        let sealed = master_key.with_aes_key(|key| {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
            cipher.encrypt(Nonce::from_slice(&self.nonce), &payload[..])
        });
        let sealed = sealed.map_err(|_| ContentError::EncryptionFailed {
            context: ContentContext::new().with_operation("encrypt header"),
        })?;

        let mut out = [0u8; HEADER_SIZE];
        out[..HEADER_NONCE_SIZE].copy_from_slice(&self.nonce);
        out[HEADER_NONCE_SIZE..].copy_from_slice(&sealed);
        Ok(out)
    }

    /// Open a sealed header. Fails closed on any tag mismatch.
    pub fn decrypt(bytes: &[u8], master_key: &MasterKey) -> Result<Self, ContentError> {
        let context = || ContentContext::new().with_operation("decrypt header");
        if bytes.len() < HEADER_SIZE {
            return Err(ContentError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
                context: context(),
            });
        }

        let mut nonce = [0u8; HEADER_NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..HEADER_NONCE_SIZE]);

        let payload = master_key
            .with_aes_key(|key| {
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
                cipher.decrypt(Nonce::from_slice(&nonce), &bytes[HEADER_NONCE_SIZE..HEADER_SIZE])
            })
            .map(Zeroizing::new)
            .map_err(|_| ContentError::HeaderAuthenticationFailed { context: context() })?;

        if payload.len() != HEADER_PAYLOAD_SIZE || payload[..4] != RESERVED {
            return Err(ContentError::InvalidHeader {
                reason: "reserved bytes do not match".to_string(),
                context: context(),
            });
        }
        let mut size = [0u8; 4];
        size.copy_from_slice(&payload[4..8]);
        let chunk_size = u32::from_be_bytes(size);
        validate_chunk_size(chunk_size)?;

        let mut content_key = Zeroizing::new([0u8; 32]);
        content_key.copy_from_slice(&payload[8..]);
        Ok(Self {
            nonce,
            content_key,
            chunk_size,
        })
    }

    fn chunk_aad(&self, index: u64) -> [u8; 8 + HEADER_NONCE_SIZE] {
        let mut aad = [0u8; 8 + HEADER_NONCE_SIZE];
        aad[..8].copy_from_slice(&index.to_be_bytes());
        aad[8..].copy_from_slice(&self.nonce);
        aad
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.content_key[..]))
    }

    /// Encrypt one chunk. `plaintext` may be shorter than the chunk size only
    /// for the final chunk.
    pub fn encrypt_chunk(&self, index: u64, plaintext: &[u8]) -> Result<Vec<u8>, ContentError> {
        if plaintext.len() > self.chunk_size as usize {
            return Err(ContentError::ChunkTooLarge {
                index,
                len: plaintext.len(),
                chunk_size: self.chunk_size as usize,
            });
        }

        let mut nonce = [0u8; CHUNK_NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        let aad = self.chunk_aad(index);
        let sealed = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
            .map_err(|_| ContentError::EncryptionFailed {
                context: ContentContext::new().with_chunk(index),
            })?;

        let mut out = Vec::with_capacity(CHUNK_NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypt and verify one chunk.
    pub fn decrypt_chunk(&self, index: u64, ciphertext: &[u8]) -> Result<Vec<u8>, ContentError> {
        if ciphertext.len() < CHUNK_OVERHEAD {
            return Err(ContentError::Truncated {
                expected: CHUNK_OVERHEAD,
                actual: ciphertext.len(),
                context: ContentContext::new().with_chunk(index),
            });
        }
        let (nonce, sealed) = ciphertext.split_at(CHUNK_NONCE_SIZE);
        let aad = self.chunk_aad(index);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
            .map_err(|_| ContentError::ChunkAuthenticationFailed {
                context: ContentContext::new().with_chunk(index),
            })
    }
}

impl fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHeader")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Writer side
// ============================================================================

/// Encrypting sink state for one object (`openWrite`).
///
/// Chunks may be submitted in any order and from several tasks at once; the
/// encryptor remembers which indices it has produced so [`finalize`] can
/// refuse to seal an object with holes.
///
/// [`finalize`]: ChunkedEncryptor::finalize
pub struct ChunkedEncryptor {
    header: FileHeader,
    sealed_header: [u8; HEADER_SIZE],
    submitted: Mutex<BTreeSet<u64>>,
}

impl ChunkedEncryptor {
    pub fn new(master_key: &MasterKey, chunk_size: u32) -> Result<Self, ContentError> {
        let header = FileHeader::new(chunk_size)?;
        let sealed_header = header.encrypt(master_key)?;
        Ok(Self {
            header,
            sealed_header,
            submitted: Mutex::new(BTreeSet::new()),
        })
    }

    #[inline]
    pub fn header_bytes(&self) -> &[u8; HEADER_SIZE] {
        &self.sealed_header
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.header.chunk_size() as usize
    }

    pub fn encrypt_chunk(&self, index: u64, plaintext: &[u8]) -> Result<Vec<u8>, ContentError> {
        let chunk = self.header.encrypt_chunk(index, plaintext)?;
        self.submitted.lock().insert(index);
        trace!(index, len = plaintext.len(), "Encrypted chunk");
        Ok(chunk)
    }

    /// Encrypt a run of consecutive chunks starting at `first_index`.
    ///
    /// `plaintext` is split at chunk boundaries; an empty buffer yields one
    /// empty chunk.
    pub fn encrypt_chunks(&self, first_index: u64, plaintext: &[u8]) -> Result<Vec<u8>, ContentError> {
        if plaintext.is_empty() {
            return self.encrypt_chunk(first_index, plaintext);
        }
        let mut out = Vec::with_capacity(
            plaintext.len() + plaintext.len().div_ceil(self.chunk_size()) * CHUNK_OVERHEAD,
        );
        for (i, chunk) in plaintext.chunks(self.chunk_size()).enumerate() {
            out.extend_from_slice(&self.encrypt_chunk(first_index + i as u64, chunk)?);
        }
        Ok(out)
    }

    /// Number of distinct chunk indices produced so far.
    pub fn submitted(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Confirm that chunks `0..expected` were all produced.
    pub fn finalize(&self, expected: u64) -> Result<(), ContentError> {
        let submitted = self.submitted.lock();
        let missing: Vec<u64> = (0..expected).filter(|i| !submitted.contains(i)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ContentError::MissingChunks { missing })
        }
    }
}

impl fmt::Debug for ChunkedEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedEncryptor")
            .field("chunk_size", &self.chunk_size())
            .field("submitted", &self.submitted())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reader side
// ============================================================================

/// Decrypting source state for one object (`openRead`).
#[derive(Debug)]
pub struct ChunkedDecryptor {
    header: FileHeader,
}

impl ChunkedDecryptor {
    pub fn open(master_key: &MasterKey, header_bytes: &[u8]) -> Result<Self, ContentError> {
        Ok(Self {
            header: FileHeader::decrypt(header_bytes, master_key)?,
        })
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.header.chunk_size() as usize
    }

    #[inline]
    pub fn encrypted_chunk_size(&self) -> usize {
        self.chunk_size() + CHUNK_OVERHEAD
    }

    pub fn decrypt_chunk(&self, index: u64, ciphertext: &[u8]) -> Result<Vec<u8>, ContentError> {
        self.header.decrypt_chunk(index, ciphertext)
    }

    /// Decrypt a run of consecutive chunks starting at `first_index`.
    pub fn decrypt_chunks(&self, first_index: u64, ciphertext: &[u8]) -> Result<Vec<u8>, ContentError> {
        let mut out = Vec::with_capacity(ciphertext.len());
        for (i, chunk) in ciphertext.chunks(self.encrypted_chunk_size()).enumerate() {
            out.extend_from_slice(&self.decrypt_chunk(first_index + i as u64, chunk)?);
        }
        Ok(out)
    }

    /// Decrypt whole chunks starting at `first_index` and keep only the
    /// plaintext window `[offset, end)`, in absolute file offsets.
    pub fn decrypt_range(
        &self,
        first_index: u64,
        ciphertext: &[u8],
        offset: u64,
        end: u64,
    ) -> Result<Vec<u8>, ContentError> {
        let plaintext = self.decrypt_chunks(first_index, ciphertext)?;
        let base = first_index * self.chunk_size() as u64;
        let start = offset.saturating_sub(base).min(plaintext.len() as u64) as usize;
        let stop = end.saturating_sub(base).min(plaintext.len() as u64) as usize;
        Ok(plaintext[start..stop.max(start)].to_vec())
    }
}

/// Encrypt a whole buffer into a self-contained object.
pub fn encrypt_file(
    plaintext: &[u8],
    master_key: &MasterKey,
    chunk_size: u32,
) -> Result<Vec<u8>, ContentError> {
    let encryptor = ChunkedEncryptor::new(master_key, chunk_size)?;
    let mut out = encryptor.header_bytes().to_vec();
    out.extend_from_slice(&encryptor.encrypt_chunks(0, plaintext)?);
    encryptor.finalize(chunk_count(plaintext.len() as u64, u64::from(chunk_size)))?;
    Ok(out)
}

/// Decrypt a whole object produced by [`encrypt_file`] or a multipart upload.
pub fn decrypt_file(ciphertext: &[u8], master_key: &MasterKey) -> Result<Vec<u8>, ContentError> {
    let decryptor = ChunkedDecryptor::open(master_key, ciphertext)?;
    let body = &ciphertext[HEADER_SIZE..];
    if body.len() < CHUNK_OVERHEAD {
        return Err(ContentError::Truncated {
            expected: HEADER_SIZE + CHUNK_OVERHEAD,
            actual: ciphertext.len(),
            context: ContentContext::new().with_operation("decrypt file"),
        });
    }
    decryptor.decrypt_chunks(0, body)
}
