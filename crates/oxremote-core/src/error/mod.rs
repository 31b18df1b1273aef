//! Error taxonomy shared by every component.
//!
//! Module-level errors ([`NameError`], [`ContentError`], [`CryptoError`],
//! [`ConfigError`]) keep their detailed context and are folded into
//! [`StorageError`] at component boundaries. Workers and the multipart
//! orchestrator only ever surface [`StorageError`].

use std::io;

use thiserror::Error;

use crate::backend::CapabilityKind;

pub use crate::config::ConfigError;
pub use crate::crypto::CryptoError;
pub use crate::fs::content::{ContentContext, ContentError};
pub use crate::fs::name::{NameContext, NameError};

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Failure of a storage, vault or transfer operation.
///
/// # Classification
///
/// - `Canceled`: user or interrupt initiated; never retried.
/// - `Interoperability`: the backend rejected the request as invalid or
///   unsupported (for example an illegal bucket name); surfaced immediately.
/// - `Integrity`: **[INTEGRITY VIOLATION]** a ciphertext chunk, header or marker
///   failed authentication or decoding. Always fatal.
/// - `Transient`: transport or I/O failure; eligible for a caller-level retry
///   policy ([`StorageError::is_retryable`]) but never retried internally.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Operation canceled")]
    Canceled,

    #[error("{operation} rejected for {path}: {reason}")]
    Interoperability {
        operation: &'static str,
        path: String,
        reason: String,
    },

    #[error("[INTEGRITY VIOLATION] {path}: {reason}")]
    Integrity { path: String, reason: String },

    #[error("I/O failure on {path}: {source}")]
    Transient {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{path} not found")]
    NotFound { path: String },

    #[error("{path} already exists")]
    AlreadyExists { path: String },

    #[error("{capability} is not supported by {host}")]
    Unsupported {
        capability: CapabilityKind,
        host: String,
    },

    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("Session pool for {host} is exhausted ({capacity} sessions checked out)")]
    PoolExhausted { host: String, capacity: usize },

    #[error("Worker task failed: {reason}")]
    TaskFailed { reason: String },
}

impl StorageError {
    pub fn not_found(path: impl ToString) -> Self {
        Self::NotFound { path: path.to_string() }
    }

    pub fn integrity(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::Integrity {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn interoperability(
        operation: &'static str,
        path: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Interoperability {
            operation,
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transient(path: impl ToString, source: io::Error) -> Self {
        Self::Transient {
            path: path.to_string(),
            source,
        }
    }

    /// Only transport failures qualify for a caller-level retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

impl From<NameError> for StorageError {
    fn from(err: NameError) -> Self {
        match err {
            NameError::EncryptionFailed { ref context } | NameError::DirIdHashFailed { ref context } => {
                Self::interoperability("encrypt name", context, err.to_string())
            }
            _ => Self::integrity(err.context(), err.to_string()),
        }
    }
}

impl From<ContentError> for StorageError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::MissingChunks { .. } => {
                Self::interoperability("seal encrypted object", "(multipart upload)", err.to_string())
            }
            ContentError::InvalidChunkSize { .. } | ContentError::ChunkTooLarge { .. } => {
                Self::interoperability("encrypt content", "(content cryptor)", err.to_string())
            }
            _ => {
                let path = err.context().map_or_else(|| "(content)".to_string(), ToString::to_string);
                Self::integrity(path, err.to_string())
            }
        }
    }
}

impl From<CryptoError> for StorageError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyUnwrapIntegrityFailed => Self::AccessDenied {
                reason: err.to_string(),
            },
            CryptoError::HmacVerificationFailed | CryptoError::MasterKeyFormat(_) => {
                Self::integrity("masterkey", err.to_string())
            }
            _ => Self::interoperability("unlock vault", "masterkey", err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        let transient = StorageError::transient("/a", io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(transient.is_retryable());
        assert!(!StorageError::Canceled.is_retryable());
        assert!(!StorageError::integrity("/a", "bad tag").is_retryable());
        assert!(!StorageError::interoperability("mkdir", "/A", "invalid bucket name").is_retryable());
    }

    #[test]
    fn test_wrong_passphrase_maps_to_access_denied() {
        let err: StorageError = CryptoError::KeyUnwrapIntegrityFailed.into();
        assert!(matches!(err, StorageError::AccessDenied { .. }));
        let err: StorageError = CryptoError::HmacVerificationFailed.into();
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn test_name_decryption_failure_is_integrity() {
        let err: StorageError = NameError::DecryptionFailed {
            context: NameContext::new().with_encrypted_name("abc.c9r"),
        }
        .into();
        assert!(err.is_integrity_violation());
        assert!(err.to_string().contains("INTEGRITY VIOLATION"));
    }
}
