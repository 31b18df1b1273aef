//! Encrypting decorators over the native capabilities.

mod copy;
mod delete;
mod directory;
mod multipart;
mod read;
mod write;

pub(crate) use copy::{CryptoBulk, CryptoCopy};
pub(crate) use delete::CryptoDelete;
pub(crate) use directory::{CryptoDirectory, CryptoFind, CryptoList};
pub(crate) use multipart::CryptoMultipart;
pub(crate) use read::CryptoRead;
pub(crate) use write::{CryptoTouch, CryptoWrite};
