#![forbid(unsafe_code)]

//! AES key wrapping per [RFC 3394](https://datatracker.ietf.org/doc/html/rfc3394),
//! AES-256 KEK only. Used to store the vault's master keys in the root marker.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use generic_array::GenericArray;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Default initial value, RFC 3394 section 2.2.3.1.
const DEFAULT_IV: u64 = 0xA6A6_A6A6_A6A6_A6A6;

#[derive(Error, Debug)]
pub enum WrapError {
    #[error("Key data must be at least 128 bits and a multiple of 64 bits, got {len} bytes")]
    InvalidPlaintextLength { len: usize },
}

#[derive(Error, Debug)]
pub enum UnwrapError {
    #[error("Wrapped key must be at least 192 bits and a multiple of 64 bits, got {len} bytes")]
    InvalidCiphertextLength { len: usize },
    #[error("The integrity check failed")]
    InvalidIntegrityCheck,
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

fn registers(data: &[u8]) -> Vec<[u8; 8]> {
    data.chunks_exact(8)
        .map(|chunk| {
            let mut register = [0u8; 8];
            register.copy_from_slice(chunk);
            register
        })
        .collect()
}

/// Wrap `plaintext` under `kek`. Output is 8 bytes longer than the input.
pub fn wrap_key(plaintext: &[u8], kek: &[u8; 32]) -> Result<Vec<u8>, WrapError> {
    if plaintext.len() < 16 || plaintext.len() % 8 != 0 {
        return Err(WrapError::InvalidPlaintextLength { len: plaintext.len() });
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek));
    let mut r = registers(plaintext);
    let n = r.len() as u64;
    let mut a = DEFAULT_IV;
    let mut block = GenericArray::default();

    for j in 0..6u64 {
        for (i, register) in r.iter_mut().enumerate() {
            block[..8].copy_from_slice(&a.to_be_bytes());
            block[8..].copy_from_slice(register);
            cipher.encrypt_block(&mut block);

            let t = n * j + i as u64 + 1;
            a = read_u64(&block[..8]) ^ t;
            register.copy_from_slice(&block[8..]);
        }
    }

    let mut out = Vec::with_capacity(plaintext.len() + 8);
    out.extend_from_slice(&a.to_be_bytes());
    for register in &r {
        out.extend_from_slice(register);
    }
    Ok(out)
}

/// Unwrap `ciphertext` under `kek`.
///
/// A wrong KEK surfaces as [`UnwrapError::InvalidIntegrityCheck`]; the check
/// against the IV is constant time.
pub fn unwrap_key(ciphertext: &[u8], kek: &[u8; 32]) -> Result<Vec<u8>, UnwrapError> {
    if ciphertext.len() < 24 || ciphertext.len() % 8 != 0 {
        return Err(UnwrapError::InvalidCiphertextLength { len: ciphertext.len() });
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek));
    let mut a = read_u64(ciphertext);
    let mut r = registers(&ciphertext[8..]);
    let n = r.len() as u64;
    let mut block = GenericArray::default();

    for j in (0..6u64).rev() {
        for (i, register) in r.iter_mut().enumerate().rev() {
            let t = n * j + i as u64 + 1;
            block[..8].copy_from_slice(&(a ^ t).to_be_bytes());
            block[8..].copy_from_slice(register);
            cipher.decrypt_block(&mut block);

            a = read_u64(&block[..8]);
            register.copy_from_slice(&block[8..]);
        }
    }

    if !bool::from(a.to_be_bytes().ct_eq(&DEFAULT_IV.to_be_bytes())) {
        return Err(UnwrapError::InvalidIntegrityCheck);
    }
    Ok(r.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const KEK: [u8; 32] = hex!("000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F");

    #[test]
    fn test_wrap_128_key_with_256_kek() {
        let key_data = hex!("00112233445566778899AABBCCDDEEFF");
        let expected = hex!("64E8C3F9CE0F5BA2 63E9777905818A2A 93C8191E7D6E8AE7");
        assert_eq!(wrap_key(&key_data, &KEK).unwrap(), expected);
        assert_eq!(unwrap_key(&expected, &KEK).unwrap(), key_data);
    }

    #[test]
    fn test_wrap_256_key_with_256_kek() {
        let key_data = hex!("00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F");
        let expected = hex!(
            "28C9F404C4B810F4 CBCCB35CFB87F826 3F5786E2D80ED326 CBC7F0E71A99F43B FB988B9B7A02DD21"
        );
        assert_eq!(wrap_key(&key_data, &KEK).unwrap(), expected);
        assert_eq!(unwrap_key(&expected, &KEK).unwrap(), key_data);
    }

    #[test]
    fn test_unwrap_with_wrong_kek_fails_integrity_check() {
        let wrapped = wrap_key(&[0x42; 32], &KEK).unwrap();
        let wrong = [0x99; 32];
        assert!(matches!(
            unwrap_key(&wrapped, &wrong),
            Err(UnwrapError::InvalidIntegrityCheck)
        ));
    }

    #[test]
    fn test_rejects_bad_lengths() {
        assert!(matches!(
            wrap_key(&[0u8; 12], &KEK),
            Err(WrapError::InvalidPlaintextLength { len: 12 })
        ));
        assert!(matches!(
            unwrap_key(&[0u8; 16], &KEK),
            Err(UnwrapError::InvalidCiphertextLength { len: 16 })
        ));
    }
}
