//! Remote storage client core.
//!
//! Storage backends are consumed through a closed set of async capability
//! traits ([`backend`]). On top of that surface sit a Cryptomator-style
//! encryption layer ([`vault`]) and the transfer orchestration
//! ([`transfer`]): multipart uploads, a bounded session pool, and recursive
//! copy/delete workers that may cross vault boundaries.

pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod path;
pub mod transfer;
pub mod vault;

pub use backend::{CapabilityKind, CapabilityTable, Session};
pub use config::Preferences;
pub use error::{Result, StorageError};
pub use path::{Attributes, ByteRange, Path, PathTypes};
pub use transfer::{CopyWorker, DeleteWorker, MultipartUploader, SessionPool, TransferStatus};
pub use vault::{CryptoVault, VaultRegistry, VaultSettings};
