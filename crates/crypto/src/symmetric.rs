//! AES-GCM sealing and opening
//!
//! Sealed data is laid out as `nonce(12) || ciphertext || tag(16)`, the
//! on-disk form of every TDF segment. Keys may be 128, 192 or 256 bits.

use crate::rng::{OsRandom, RandomSource};
use aes_gcm::aead::consts::{U12, U13, U14, U15, U16};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::{Aes128, Aes192, Aes256};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use thiserror::Error;
use zeroize::Zeroizing;

/// GCM nonce length in bytes
pub const NONCE_SIZE: usize = 12;

/// Default GCM tag length in bytes
pub const TAG_SIZE: usize = 16;

/// Bytes added to a plaintext by [`AesGcmCipher::encrypt`]
pub const OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

type Aes192Gcm = AesGcm<Aes192, U12>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Invalid AES key length {len}: expected 16, 24 or 32 bytes")]
    InvalidKey { len: usize },

    #[error("Invalid ciphertext: {reason}")]
    InvalidCiphertext { reason: String },

    #[error("Invalid nonce length {len}: expected 12 bytes")]
    InvalidNonce { len: usize },

    #[error("Invalid GCM tag size {size}: expected 12 to 16 bytes")]
    InvalidTagSize { size: usize },

    #[error("Encryption failed")]
    SealFailed,
}

enum Engine {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// AES-GCM cipher holding a validated key
pub struct AesGcmCipher {
    key: Zeroizing<Vec<u8>>,
    engine: Engine,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("key_bits", &(self.key.len() * 8))
            .finish()
    }
}

impl AesGcmCipher {
    /// Create a cipher; the key must be 16, 24 or 32 bytes
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        let invalid = || EncryptionError::InvalidKey { len: key.len() };
        let engine = match key.len() {
            16 => Engine::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|_| invalid())?,
            )),
            24 => Engine::Aes192(Box::new(
                Aes192Gcm::new_from_slice(key).map_err(|_| invalid())?,
            )),
            32 => Engine::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| invalid())?,
            )),
            _ => return Err(invalid()),
        };
        Ok(AesGcmCipher {
            key: Zeroizing::new(key.to_vec()),
            engine,
        })
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        self.key.len()
    }

    /// Seal `plaintext` under a fresh random nonce, returning `nonce || ct || tag`
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        rng: &dyn RandomSource,
    ) -> Result<Vec<u8>, EncryptionError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill(&mut nonce);
        let sealed = self.encrypt_with_iv(&nonce, plaintext)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open `nonce || ct || tag`
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < OVERHEAD {
            return Err(EncryptionError::InvalidCiphertext {
                reason: format!(
                    "{} bytes is shorter than nonce and tag ({} bytes)",
                    data.len(),
                    OVERHEAD
                ),
            });
        }
        let (nonce, rest) = data.split_at(NONCE_SIZE);
        self.decrypt_with_iv(nonce, rest)
    }

    /// Seal with a caller-chosen nonce, returning `ct || tag`
    pub fn encrypt_with_iv(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        check_nonce(iv)?;
        match &self.engine {
            Engine::Aes128(c) => seal(c.as_ref(), iv, plaintext),
            Engine::Aes192(c) => seal(c.as_ref(), iv, plaintext),
            Engine::Aes256(c) => seal(c.as_ref(), iv, plaintext),
        }
    }

    /// Open `ct || tag` with a 16-byte tag
    pub fn decrypt_with_iv(&self, iv: &[u8], data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        check_nonce(iv)?;
        match &self.engine {
            Engine::Aes128(c) => open_with(c.as_ref(), iv, data),
            Engine::Aes192(c) => open_with(c.as_ref(), iv, data),
            Engine::Aes256(c) => open_with(c.as_ref(), iv, data),
        }
    }

    /// Open `ct || tag` where the tag is `tag_size` bytes (12 to 16)
    pub fn decrypt_with_iv_and_tag_size(
        &self,
        iv: &[u8],
        data: &[u8],
        tag_size: usize,
    ) -> Result<Vec<u8>, EncryptionError> {
        check_nonce(iv)?;
        if !(12..=16).contains(&tag_size) {
            return Err(EncryptionError::InvalidTagSize { size: tag_size });
        }
        if data.len() < tag_size {
            return Err(EncryptionError::InvalidCiphertext {
                reason: format!("{} bytes is shorter than the tag", data.len()),
            });
        }

        macro_rules! open_tagged {
            ($aes:ty) => {
                match tag_size {
                    12 => open::<AesGcm<$aes, U12, U12>>(&self.key, iv, data),
                    13 => open::<AesGcm<$aes, U12, U13>>(&self.key, iv, data),
                    14 => open::<AesGcm<$aes, U12, U14>>(&self.key, iv, data),
                    15 => open::<AesGcm<$aes, U12, U15>>(&self.key, iv, data),
                    _ => open::<AesGcm<$aes, U12, U16>>(&self.key, iv, data),
                }
            };
        }

        match &self.engine {
            Engine::Aes128(_) => open_tagged!(Aes128),
            Engine::Aes192(_) => open_tagged!(Aes192),
            Engine::Aes256(_) => open_tagged!(Aes256),
        }
    }
}

fn check_nonce(iv: &[u8]) -> Result<(), EncryptionError> {
    if iv.len() != NONCE_SIZE {
        return Err(EncryptionError::InvalidNonce { len: iv.len() });
    }
    Ok(())
}

fn seal<A: Aead>(cipher: &A, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let nonce = aes_gcm::aead::Nonce::<A>::from_slice(iv);
    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EncryptionError::SealFailed)
}

fn open_with<A: Aead>(cipher: &A, iv: &[u8], data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let nonce = aes_gcm::aead::Nonce::<A>::from_slice(iv);
    cipher
        .decrypt(nonce, data)
        .map_err(|_| EncryptionError::InvalidCiphertext {
            reason: "authentication failed".to_string(),
        })
}

fn open<A: Aead + KeyInit>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let cipher =
        A::new_from_slice(key).map_err(|_| EncryptionError::InvalidKey { len: key.len() })?;
    open_with(&cipher, iv, data)
}

/// Seal with a one-off cipher and an OS-random nonce
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    AesGcmCipher::new(key)?.encrypt(plaintext, &OsRandom)
}

/// Open `nonce || ct || tag` with a one-off cipher
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    AesGcmCipher::new(key)?.decrypt(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRandom;

    #[test]
    fn test_roundtrip_all_key_sizes() {
        for len in [16usize, 24, 32] {
            let key = vec![0x42u8; len];
            let sealed = encrypt(&key, b"segment payload").unwrap();
            assert_eq!(sealed.len(), b"segment payload".len() + OVERHEAD);
            assert_eq!(decrypt(&key, &sealed).unwrap(), b"segment payload");
        }
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [7u8; 32];
        let sealed = encrypt(&key, b"").unwrap();
        assert_eq!(sealed.len(), OVERHEAD);
        assert!(decrypt(&key, &sealed).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_key_length() {
        assert_eq!(
            AesGcmCipher::new(&[0u8; 20]).unwrap_err(),
            EncryptionError::InvalidKey { len: 20 }
        );
    }

    #[test]
    fn test_short_ciphertext() {
        let cipher = AesGcmCipher::new(&[1u8; 32]).unwrap();
        let err = cipher.decrypt(&[0u8; 27]).unwrap_err();
        assert!(matches!(err, EncryptionError::InvalidCiphertext { .. }));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = AesGcmCipher::new(&[1u8; 32]).unwrap();
        let mut sealed = cipher.encrypt(b"hello", &SeededRandom::from_u64(3)).unwrap();
        sealed[NONCE_SIZE] ^= 0x01;
        assert!(cipher.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_truncated_tag_sizes() {
        let key = [9u8; 32];
        let iv = [3u8; NONCE_SIZE];
        let cipher = AesGcmCipher::new(&key).unwrap();

        for tag_size in 12..=15usize {
            let sealed = match tag_size {
                12 => seal(&AesGcm::<Aes256, U12, U12>::new_from_slice(&key).unwrap(), &iv, b"abc"),
                13 => seal(&AesGcm::<Aes256, U12, U13>::new_from_slice(&key).unwrap(), &iv, b"abc"),
                14 => seal(&AesGcm::<Aes256, U12, U14>::new_from_slice(&key).unwrap(), &iv, b"abc"),
                _ => seal(&AesGcm::<Aes256, U12, U15>::new_from_slice(&key).unwrap(), &iv, b"abc"),
            }
            .unwrap();
            assert_eq!(sealed.len(), 3 + tag_size);
            let opened = cipher
                .decrypt_with_iv_and_tag_size(&iv, &sealed, tag_size)
                .unwrap();
            assert_eq!(opened, b"abc");
        }

        let full = cipher.encrypt_with_iv(&iv, b"abc").unwrap();
        assert_eq!(
            cipher.decrypt_with_iv_and_tag_size(&iv, &full, 16).unwrap(),
            b"abc"
        );
        assert_eq!(
            cipher.decrypt_with_iv_and_tag_size(&iv, &full, 11),
            Err(EncryptionError::InvalidTagSize { size: 11 })
        );
    }

    #[test]
    fn test_wrong_nonce_length() {
        let cipher = AesGcmCipher::new(&[0u8; 16]).unwrap();
        assert_eq!(
            cipher.encrypt_with_iv(&[0u8; 8], b"x"),
            Err(EncryptionError::InvalidNonce { len: 8 })
        );
    }
}
