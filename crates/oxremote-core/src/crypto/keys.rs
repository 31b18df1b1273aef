#![forbid(unsafe_code)]

use std::fmt;

use generic_array::{GenericArray, typenum::U64};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};
use zeroize::Zeroizing;

/// Master key pair of an unlocked vault.
///
/// Holds the 256-bit AES key (content headers, key wrapping) and the 256-bit
/// MAC key (name encryption, marker MAC). Both live in [`SecretBox`]es and are
/// zeroized on drop.
///
/// The key is immutable after construction, so a single `Arc<MasterKey>` can
/// be shared by every concurrent encrypt/decrypt operation without locking.
pub struct MasterKey {
    aes_master_key: SecretBox<[u8; 32]>,
    mac_master_key: SecretBox<[u8; 32]>,
}

impl MasterKey {
    /// Generate a new random key pair.
    pub fn random() -> Self {
        let mut aes_key = Zeroizing::new([0u8; 32]);
        let mut mac_key = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut aes_key[..]);
        rand::rng().fill_bytes(&mut mac_key[..]);
        Self::new(*aes_key, *mac_key)
    }

    pub fn new(aes_key: [u8; 32], mac_key: [u8; 32]) -> Self {
        Self {
            aes_master_key: SecretBox::new(Box::new(aes_key)),
            mac_master_key: SecretBox::new(Box::new(mac_key)),
        }
    }

    pub fn with_aes_key<R>(&self, f: impl FnOnce(&[u8; 32]) -> R) -> R {
        f(self.aes_master_key.expose_secret())
    }

    pub fn with_mac_key<R>(&self, f: impl FnOnce(&[u8; 32]) -> R) -> R {
        f(self.mac_master_key.expose_secret())
    }

    /// Run `f` with the 512-bit AES-SIV key (MAC key || AES key).
    ///
    /// The combined buffer is zeroized when `f` returns.
    pub fn with_siv_key<R>(&self, f: impl FnOnce(&GenericArray<u8, U64>) -> R) -> R {
        let mut combined = Zeroizing::new([0u8; 64]);
        combined[..32].copy_from_slice(self.mac_master_key.expose_secret());
        combined[32..].copy_from_slice(self.aes_master_key.expose_secret());
        f(GenericArray::from_slice(&combined[..]))
    }
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        Self::new(
            *self.aes_master_key.expose_secret(),
            *self.mac_master_key.expose_secret(),
        )
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_siv_key_is_mac_then_aes() {
        let key = MasterKey::new([0x01; 32], [0x02; 32]);
        key.with_siv_key(|siv| {
            assert!(siv[..32].iter().all(|b| *b == 0x02));
            assert!(siv[32..].iter().all(|b| *b == 0x01));
        });
    }

    #[test]
    fn test_random_keys_differ() {
        let a = MasterKey::random();
        let b = MasterKey::random();
        let a_bytes = a.with_aes_key(|k| *k);
        let b_bytes = b.with_aes_key(|k| *k);
        assert_ne!(a_bytes, b_bytes);
    }

    #[test]
    fn test_debug_does_not_leak_key_material() {
        let key = MasterKey::new([0xAB; 32], [0xCD; 32]);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("171"));
        assert!(!rendered.to_lowercase().contains("ab, "));
    }

    #[test]
    fn test_clone_preserves_material() {
        let key = MasterKey::new([0x11; 32], [0x22; 32]);
        let copy = key.clone();
        assert_eq!(copy.with_mac_key(|k| *k), [0x22; 32]);
        assert_eq!(copy.with_aes_key(|k| *k), [0x11; 32]);
    }
}
