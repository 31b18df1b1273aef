//! Key material and key wrapping for vault operations.

pub mod key_wrap;
pub mod keys;

use thiserror::Error;

pub use keys::MasterKey;

/// Errors that can occur while creating or unlocking a vault's master key.
///
/// # Security Classification
///
/// Errors marked `[INTEGRITY VIOLATION]` indicate the vault marker was tampered
/// with. A failed key unwrap is indistinguishable from a wrong passphrase and
/// is reported as such.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// **[INTEGRITY VIOLATION]** The version MAC of the root marker does not verify.
    #[error("[INTEGRITY VIOLATION] HMAC verification failed - vault marker tampered")]
    HmacVerificationFailed,

    /// Wrong passphrase, or a corrupted wrapped key.
    #[error("Key unwrap failed - incorrect passphrase or corrupted vault marker")]
    KeyUnwrapIntegrityFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key wrap failed: {0}")]
    KeyWrap(#[from] key_wrap::WrapError),

    #[error("Unsupported vault format {found} (expected {expected})")]
    UnsupportedVaultFormat { found: u32, expected: u32 },

    /// The root marker could not be parsed.
    #[error("Malformed vault marker: {0}")]
    MasterKeyFormat(#[from] serde_json::Error),
}

impl From<key_wrap::UnwrapError> for CryptoError {
    fn from(err: key_wrap::UnwrapError) -> Self {
        match err {
            key_wrap::UnwrapError::InvalidCiphertextLength { len } => {
                CryptoError::InvalidKeyLength { expected: 40, actual: len }
            }
            key_wrap::UnwrapError::InvalidIntegrityCheck => CryptoError::KeyUnwrapIntegrityFailed,
        }
    }
}
