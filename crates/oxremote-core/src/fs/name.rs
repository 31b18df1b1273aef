//! Deterministic encryption of single path segments.
//!
//! Names are encrypted with AES-SIV using the parent directory's id as
//! associated data, so the same name in two directories never produces the
//! same ciphertext, and a ciphertext moved to another directory no longer
//! decrypts. Shortening of long results lives in the vault path mapper.

use std::fmt;

use aes_siv::{KeyInit, siv::Aes256Siv};
use base64::{Engine as _, engine::general_purpose};
use data_encoding::BASE32;
use ring::digest;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::MasterKey;

/// Suffix of every regular encrypted node.
pub const ENCRYPTED_SUFFIX: &str = ".c9r";

/// Suffix of a shortened node folder.
pub const SHORTENED_SUFFIX: &str = ".c9s";

/// Context for name operations, used in error messages.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    pub encrypted_name: Option<String>,
    pub cleartext_name: Option<String>,
    pub dir_id: Option<String>,
}

impl NameContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_encrypted_name(mut self, name: impl Into<String>) -> Self {
        self.encrypted_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_cleartext_name(mut self, name: impl Into<String>) -> Self {
        self.cleartext_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_dir_id(mut self, dir_id: impl Into<String>) -> Self {
        self.dir_id = Some(dir_id.into());
        self
    }
}

impl fmt::Display for NameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref name) = self.cleartext_name {
            parts.push(format!("name '{name}'"));
        } else if let Some(ref encrypted) = self.encrypted_name {
            let shown: String = encrypted.chars().take(40).collect();
            if shown.len() < encrypted.len() {
                parts.push(format!("encrypted name '{shown}...'"));
            } else {
                parts.push(format!("encrypted name '{shown}'"));
            }
        }

        match self.dir_id.as_deref() {
            Some("") => parts.push("in directory <root>".to_string()),
            Some(id) => parts.push(format!("in directory {}", id.chars().take(12).collect::<String>())),
            None => {}
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Errors that can occur during name encryption/decryption.
#[derive(Error, Debug)]
pub enum NameError {
    /// **[INTEGRITY VIOLATION]** AES-SIV authentication failed: tampered name,
    /// wrong key, or a node moved between directories.
    #[error("[INTEGRITY VIOLATION] Failed to decrypt {context}: authentication failed")]
    DecryptionFailed { context: NameContext },

    #[error("Invalid base64 encoding for {context}: {reason}")]
    Base64Decode { reason: String, context: NameContext },

    #[error("Invalid UTF-8 after decryption for {context}: {reason}")]
    Utf8Decode { reason: String, context: NameContext },

    #[error("Unexpected encryption failure for {context}")]
    EncryptionFailed { context: NameContext },

    #[error("Failed to hash directory id for {context}")]
    DirIdHashFailed { context: NameContext },
}

impl NameError {
    pub fn context(&self) -> &NameContext {
        match self {
            NameError::DecryptionFailed { context }
            | NameError::Base64Decode { context, .. }
            | NameError::Utf8Decode { context, .. }
            | NameError::EncryptionFailed { context }
            | NameError::DirIdHashFailed { context } => context,
        }
    }
}

/// Hash a directory id into its storage name.
///
/// AES-SIV over the id bytes (no associated data), SHA-1 of the result, then
/// RFC 4648 Base32. The 32 character result splits into the `d/XX/YYYY...`
/// data directory of that id.
pub fn hash_dir_id(dir_id: &str, master_key: &MasterKey) -> Result<String, NameError> {
    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let no_associated_data: &[&[u8]] = &[];
        let encrypted = cipher
            .encrypt(no_associated_data, dir_id.as_bytes())
            .map_err(|_| NameError::DirIdHashFailed {
                context: NameContext::new().with_dir_id(dir_id),
            })?;

        let hashed = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &encrypted);
        Ok(BASE32.encode(hashed.as_ref()))
    })
}

/// Encrypt one name under its parent directory id.
///
/// The name is NFC-normalized first. Returns padded base64url **without** the
/// `.c9r` suffix.
pub fn encrypt_filename(
    name: &str,
    parent_dir_id: &str,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    let normalized: String = name.nfc().collect();

    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[parent_dir_id.as_bytes()];
        let encrypted = cipher
            .encrypt(associated_data, normalized.as_bytes())
            .map_err(|_| NameError::EncryptionFailed {
                context: NameContext::new()
                    .with_cleartext_name(name)
                    .with_dir_id(parent_dir_id),
            })?;

        Ok(general_purpose::URL_SAFE.encode(encrypted))
    })
}

/// Decrypt one name under its parent directory id.
///
/// Accepts input with or without the `.c9r` suffix and with or without base64
/// padding.
pub fn decrypt_filename(
    encrypted_name: &str,
    parent_dir_id: &str,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    let context = || {
        NameContext::new()
            .with_encrypted_name(encrypted_name)
            .with_dir_id(parent_dir_id)
    };

    let stem = encrypted_name
        .strip_suffix(ENCRYPTED_SUFFIX)
        .unwrap_or(encrypted_name);
    let decoded = general_purpose::URL_SAFE
        .decode(stem)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(stem))
        .map_err(|e| NameError::Base64Decode {
            reason: e.to_string(),
            context: context(),
        })?;

    let decrypted = master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[parent_dir_id.as_bytes()];
        cipher
            .decrypt(associated_data, &decoded)
            .map_err(|_| NameError::DecryptionFailed { context: context() })
    })?;

    String::from_utf8(decrypted).map_err(|e| NameError::Utf8Decode {
        reason: e.to_string(),
        context: context(),
    })
}

/// Fixed-length substitute for an over-long encrypted name.
///
/// `full_name` is the complete encoded name including its `.c9r` suffix. The
/// result is base64url(SHA-1(full_name)) with the `.c9s` suffix.
pub fn shortened_name(full_name: &str) -> String {
    let hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, full_name.as_bytes());
    format!("{}{SHORTENED_SUFFIX}", general_purpose::URL_SAFE.encode(hash.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn create_test_master_key() -> MasterKey {
        let mut aes_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        for i in 0..32u8 {
            aes_key[i as usize] = i;
            mac_key[i as usize] = 32 + i;
        }
        MasterKey::new(aes_key, mac_key)
    }

    #[test]
    fn test_deterministic_encryption_of_filenames() {
        let master_key = create_test_master_key();
        let first = encrypt_filename("test.txt", "", &master_key).unwrap();
        let second = encrypt_filename("test.txt", "", &master_key).unwrap();
        assert_eq!(first, second);
        assert_eq!(decrypt_filename(&first, "", &master_key).unwrap(), "test.txt");
    }

    #[test]
    fn test_filename_encryption_is_context_dependent() {
        let master_key = create_test_master_key();
        let root = encrypt_filename("test.txt", "", &master_key).unwrap();
        let nested = encrypt_filename("test.txt", "e9250eb8-078d-4fc0-8835-be92a313360c", &master_key).unwrap();
        assert_ne!(root, nested);
    }

    #[test]
    fn test_decryption_with_wrong_parent_dir_fails() {
        let master_key = create_test_master_key();
        let encrypted = encrypt_filename("secret.pdf", "dir-a", &master_key).unwrap();
        let err = decrypt_filename(&encrypted, "dir-b", &master_key).unwrap_err();
        assert!(matches!(err, NameError::DecryptionFailed { .. }));
    }

    #[test]
    fn test_decryption_with_wrong_key_fails() {
        let encrypted = encrypt_filename("secret.pdf", "", &create_test_master_key()).unwrap();
        let other = MasterKey::new([7; 32], [9; 32]);
        assert!(matches!(
            decrypt_filename(&encrypted, "", &other),
            Err(NameError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_invalid_base64_is_reported() {
        let master_key = create_test_master_key();
        let err = decrypt_filename("not*base64!.c9r", "", &master_key).unwrap_err();
        assert!(matches!(err, NameError::Base64Decode { .. }));
    }

    #[test]
    fn test_decrypt_accepts_suffix_and_unpadded_input() {
        let master_key = create_test_master_key();
        let encrypted = encrypt_filename("a", "", &master_key).unwrap();
        let unpadded = encrypted.trim_end_matches('=');
        assert_eq!(decrypt_filename(&format!("{encrypted}.c9r"), "", &master_key).unwrap(), "a");
        assert_eq!(decrypt_filename(unpadded, "", &master_key).unwrap(), "a");
    }

    #[test]
    fn test_nfd_input_normalizes_to_nfc() {
        let master_key = create_test_master_key();
        let nfd = "cafe\u{301}.txt";
        let nfc = "caf\u{e9}.txt";
        let from_nfd = encrypt_filename(nfd, "", &master_key).unwrap();
        let from_nfc = encrypt_filename(nfc, "", &master_key).unwrap();
        assert_eq!(from_nfd, from_nfc);
        assert_eq!(decrypt_filename(&from_nfd, "", &master_key).unwrap(), nfc);
    }

    #[test]
    fn test_directory_id_hash_format() {
        let master_key = create_test_master_key();
        let hash = hash_dir_id("", &master_key).unwrap();
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
        assert_ne!(hash, hash_dir_id("some-id", &master_key).unwrap());
    }

    #[test]
    fn test_shortened_name_format() {
        let short = shortened_name(&format!("{}.c9r", "A".repeat(300)));
        assert!(short.ends_with(".c9s"));
        // 20 byte SHA-1 in padded base64url
        assert_eq!(short.len(), 28 + 4);
        assert_eq!(short, shortened_name(&format!("{}.c9r", "A".repeat(300))));
        assert_ne!(short, shortened_name("B.c9r"));
    }

    proptest! {
        #[test]
        fn prop_name_roundtrip(name in "\\PC{1,64}", dir_id in "[a-f0-9-]{0,36}") {
            let master_key = create_test_master_key();
            let encrypted = encrypt_filename(&name, &dir_id, &master_key).unwrap();
            let decrypted = decrypt_filename(&encrypted, &dir_id, &master_key).unwrap();
            let normalized: String = name.nfc().collect();
            prop_assert_eq!(decrypted, normalized);
        }

        #[test]
        fn prop_distinct_dir_ids_separate_names(
            name in "[a-zA-Z0-9._ -]{1,40}",
            id1 in "[a-f0-9]{8}",
            id2 in "[a-f0-9]{8}",
        ) {
            prop_assume!(id1 != id2);
            let master_key = create_test_master_key();
            prop_assert_ne!(
                encrypt_filename(&name, &id1, &master_key).unwrap(),
                encrypt_filename(&name, &id2, &master_key).unwrap()
            );
        }
    }
}
