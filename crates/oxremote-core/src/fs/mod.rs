//! Name and content cryptors.

pub mod content;
pub mod name;

pub use content::{ChunkedDecryptor, ChunkedEncryptor, FileHeader};
pub use name::{decrypt_filename, encrypt_filename, hash_dir_id, shortened_name};
