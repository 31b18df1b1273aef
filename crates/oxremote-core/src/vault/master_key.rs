//! The root marker `masterkey.cryptomator`.
//!
//! JSON with the scrypt parameters, both master keys wrapped (RFC 3394) under
//! a key-encryption key derived from the passphrase, the vault format version,
//! the content chunk size, and an HMAC-SHA256 over version and chunk size.

use ring::hmac;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::crypto::key_wrap::{unwrap_key, wrap_key};
use crate::crypto::{CryptoError, MasterKey};

/// Name of the root marker object.
pub const MASTER_KEY_FILE_NAME: &str = "masterkey.cryptomator";

/// Vault format this crate reads and writes.
pub const VAULT_FORMAT: u32 = 8;

const SCRYPT_SALT_LENGTH: usize = 8;
const SCRYPT_PARALLELIZATION: u32 = 1;
const DEFAULT_SCRYPT_COST_LOG2: u8 = 15;
const DEFAULT_SCRYPT_BLOCK_SIZE: u32 = 8;
/// Only for tests; roughly 32x cheaper than the default.
const FAST_SCRYPT_COST_LOG2: u8 = 10;

/// Scrypt parameters used when creating a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub cost_log2: u8,
    pub block_size: u32,
}

impl KdfParams {
    /// Cheap parameters for tests. Never use these for real vaults.
    pub const fn fast() -> Self {
        Self {
            cost_log2: FAST_SCRYPT_COST_LOG2,
            block_size: DEFAULT_SCRYPT_BLOCK_SIZE,
        }
    }
}

impl Default for KdfParams {
    /// N = 2^15, r = 8, or the fast parameters when `OXREMOTE_FAST_KDF=1`.
    fn default() -> Self {
        let fast = std::env::var("OXREMOTE_FAST_KDF")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if fast {
            Self::fast()
        } else {
            Self {
                cost_log2: DEFAULT_SCRYPT_COST_LOG2,
                block_size: DEFAULT_SCRYPT_BLOCK_SIZE,
            }
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyFile {
    pub version: u32,
    #[serde_as(as = "Base64")]
    pub scrypt_salt: Vec<u8>,
    pub scrypt_cost_param: u32,
    pub scrypt_block_size: u32,
    /// Wrapped AES master key.
    #[serde_as(as = "Base64")]
    pub primary_master_key: Vec<u8>,
    /// Wrapped MAC master key.
    #[serde_as(as = "Base64")]
    pub hmac_master_key: Vec<u8>,
    /// HMAC-SHA256 of `version` then `chunkSize`, both big-endian `u32`.
    #[serde_as(as = "Base64")]
    pub version_mac: Vec<u8>,
    pub chunk_size: u32,
}

impl MasterKeyFile {
    /// Wrap `master_key` under `passphrase`.
    pub fn create(
        master_key: &MasterKey,
        passphrase: &str,
        chunk_size: u32,
        kdf: KdfParams,
    ) -> Result<Self, CryptoError> {
        let mut salt = vec![0u8; SCRYPT_SALT_LENGTH];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut salt);

        let kek = derive_kek(passphrase, &salt, kdf.cost_log2, kdf.block_size)?;
        let primary_master_key = master_key.with_aes_key(|key| wrap_key(key, kek.expose_secret()))?;
        let hmac_master_key = master_key.with_mac_key(|key| wrap_key(key, kek.expose_secret()))?;
        let version_mac = master_key.with_mac_key(|key| {
            let key = hmac::Key::new(hmac::HMAC_SHA256, key);
            hmac::sign(&key, &mac_input(VAULT_FORMAT, chunk_size)).as_ref().to_vec()
        });

        Ok(Self {
            version: VAULT_FORMAT,
            scrypt_salt: salt,
            scrypt_cost_param: 1u32 << kdf.cost_log2,
            scrypt_block_size: kdf.block_size,
            primary_master_key,
            hmac_master_key,
            version_mac,
            chunk_size,
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Recover the master key.
    ///
    /// # Errors
    ///
    /// - `KeyUnwrapIntegrityFailed`: wrong passphrase or corrupted wrapped key
    /// - `HmacVerificationFailed`: **[INTEGRITY VIOLATION]** version or chunk
    ///   size was altered
    /// - `UnsupportedVaultFormat`: authentic marker of another format
    pub fn unlock(&self, passphrase: &str) -> Result<MasterKey, CryptoError> {
        if !self.scrypt_cost_param.is_power_of_two() || self.scrypt_cost_param < 2 {
            return Err(CryptoError::InvalidScryptParams(format!(
                "cost parameter {} is not a power of two",
                self.scrypt_cost_param
            )));
        }
        let cost_log2 = self.scrypt_cost_param.trailing_zeros() as u8;
        let kek = derive_kek(passphrase, &self.scrypt_salt, cost_log2, self.scrypt_block_size)?;

        let aes_key = into_key(unwrap_key(&self.primary_master_key, kek.expose_secret())?)?;
        let mac_key = into_key(unwrap_key(&self.hmac_master_key, kek.expose_secret())?)?;

        let key = hmac::Key::new(hmac::HMAC_SHA256, mac_key.as_ref());
        hmac::verify(&key, &mac_input(self.version, self.chunk_size), &self.version_mac)
            .map_err(|_| CryptoError::HmacVerificationFailed)?;

        if self.version != VAULT_FORMAT {
            return Err(CryptoError::UnsupportedVaultFormat {
                found: self.version,
                expected: VAULT_FORMAT,
            });
        }
        debug!(chunk_size = self.chunk_size, "Unwrapped vault master key");
        Ok(MasterKey::new(*aes_key, *mac_key))
    }
}

fn mac_input(version: u32, chunk_size: u32) -> [u8; 8] {
    let mut input = [0u8; 8];
    input[..4].copy_from_slice(&version.to_be_bytes());
    input[4..].copy_from_slice(&chunk_size.to_be_bytes());
    input
}

fn into_key(bytes: Vec<u8>) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let bytes = Zeroizing::new(bytes);
    let key: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
    Ok(Zeroizing::new(key))
}

fn derive_kek(
    passphrase: &str,
    salt: &[u8],
    cost_log2: u8,
    block_size: u32,
) -> Result<SecretBox<[u8; 32]>, CryptoError> {
    let normalized = Zeroizing::new(passphrase.nfc().collect::<String>());
    let params = scrypt::Params::new(cost_log2, block_size, SCRYPT_PARALLELIZATION, 32).map_err(|e| {
        CryptoError::InvalidScryptParams(format!(
            "N=2^{cost_log2}, r={block_size}, p={SCRYPT_PARALLELIZATION}: {e}"
        ))
    })?;
    let mut kek = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(normalized.as_bytes(), salt, &params, &mut kek[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(SecretBox::new(Box::new(*kek)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_unlock_roundtrip() {
        let key = MasterKey::random();
        let file = MasterKeyFile::create(&key, "pässword", 1024, KdfParams::fast()).unwrap();
        let parsed = MasterKeyFile::from_json(&file.to_json().unwrap()).unwrap();
        assert_eq!(parsed.chunk_size, 1024);
        assert_eq!(parsed.scrypt_cost_param, 1024);

        let unlocked = parsed.unlock("pässword").unwrap();
        let same = unlocked.with_aes_key(|a| key.with_aes_key(|b| a == b));
        assert!(same);
    }

    #[test]
    fn test_passphrase_is_nfc_normalized() {
        let key = MasterKey::random();
        let file = MasterKeyFile::create(&key, "caf\u{e9}", 64, KdfParams::fast()).unwrap();
        assert!(file.unlock("cafe\u{301}").is_ok());
    }

    #[test]
    fn test_wrong_passphrase() {
        let file = MasterKeyFile::create(&MasterKey::random(), "right", 64, KdfParams::fast()).unwrap();
        assert!(matches!(file.unlock("wrong"), Err(CryptoError::KeyUnwrapIntegrityFailed)));
    }

    #[test]
    fn test_tampered_chunk_size_fails_mac() {
        let mut file = MasterKeyFile::create(&MasterKey::random(), "pw", 64, KdfParams::fast()).unwrap();
        file.chunk_size = 128;
        assert!(matches!(file.unlock("pw"), Err(CryptoError::HmacVerificationFailed)));
    }

    #[test]
    fn test_json_field_names() {
        let file = MasterKeyFile::create(&MasterKey::random(), "pw", 64, KdfParams::fast()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&file.to_json().unwrap()).unwrap();
        for field in ["version", "scryptSalt", "scryptCostParam", "primaryMasterKey", "versionMac", "chunkSize"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["version"], 8);
    }
}
