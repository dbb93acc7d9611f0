//! RSA-OAEP Key Encapsulation Mechanism
//!
//! `wrapped` key access objects carry a key split encrypted to the KAS RSA
//! key. SHA-1 is the default OAEP hash (`RSA-OAEP`); SHA-256 is used for
//! `RSA-OAEP-256`.

use super::{KemError, KeyEncapsulation};
use crate::pem::{parse_private_key_pem, parse_public_key_pem, PrivateKey, PublicKey};
use crate::rng::{OsRandom, RandomSource, RngAdapter};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use std::sync::Arc;

/// OAEP hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OaepHash {
    /// SHA-1, required for interoperability with existing KAS deployments
    #[default]
    Sha1,

    /// SHA-256
    Sha256,
}

impl OaepHash {
    fn padding(&self) -> Oaep {
        match self {
            OaepHash::Sha1 => Oaep::new::<Sha1>(),
            OaepHash::Sha256 => Oaep::new::<Sha256>(),
        }
    }
}

/// RSA-OAEP key encapsulation mechanism
pub struct RsaOaepKem {
    /// Hash algorithm for OAEP padding
    pub hash: OaepHash,
    rng: Arc<dyn RandomSource>,
}

impl Default for RsaOaepKem {
    fn default() -> Self {
        RsaOaepKem::new(OaepHash::Sha1)
    }
}

impl RsaOaepKem {
    pub fn new(hash: OaepHash) -> Self {
        RsaOaepKem {
            hash,
            rng: Arc::new(OsRandom),
        }
    }

    pub fn with_sha1() -> Self {
        Self::new(OaepHash::Sha1)
    }

    pub fn with_sha256() -> Self {
        Self::new(OaepHash::Sha256)
    }

    /// Draw OAEP seeds from `rng` instead of the OS generator
    #[must_use]
    pub fn with_rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    /// Encrypt `key` to an already parsed public key
    pub fn wrap_with_key(&self, key: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, KemError> {
        let mut rng = RngAdapter(self.rng.as_ref());
        public_key
            .encrypt(&mut rng, self.hash.padding(), key)
            .map_err(|e| KemError::WrapError(format!("RSA-OAEP encryption failed: {}", e)))
    }

    /// Decrypt raw ciphertext with an already parsed private key
    pub fn unwrap_with_key(
        &self,
        ciphertext: &[u8],
        private_key: &RsaPrivateKey,
    ) -> Result<Vec<u8>, KemError> {
        private_key
            .decrypt(self.hash.padding(), ciphertext)
            .map_err(|e| KemError::UnwrapError(format!("RSA-OAEP decryption failed: {}", e)))
    }
}

impl KeyEncapsulation for RsaOaepKem {
    type PublicKey = String; // PEM-encoded public key or certificate
    type PrivateKey = String; // PEM-encoded private key
    type WrappedKey = String; // Base64-encoded ciphertext

    fn wrap(&self, key: &[u8], public_key_pem: &Self::PublicKey) -> Result<String, KemError> {
        let public_key = match parse_public_key_pem(public_key_pem)? {
            PublicKey::Rsa(key) => key,
            PublicKey::Ec(_) => {
                return Err(KemError::UnsupportedPublicKeyType(
                    "expected an RSA public key, found EC".to_string(),
                ))
            }
        };
        Ok(BASE64.encode(self.wrap_with_key(key, &public_key)?))
    }

    fn unwrap(
        &self,
        wrapped_b64: &Self::WrappedKey,
        private_key_pem: &Self::PrivateKey,
    ) -> Result<Vec<u8>, KemError> {
        let ciphertext = BASE64
            .decode(wrapped_b64)
            .map_err(|e| KemError::EncodingError(format!("Base64 decode failed: {}", e)))?;
        let private_key = match parse_private_key_pem(private_key_pem)? {
            PrivateKey::Rsa(key) => key,
            PrivateKey::Ec(_) => return Err(KemError::InvalidPrivateKey),
        };
        self.unwrap_with_key(&ciphertext, &private_key)
    }
}

/// Wrap a key with RSA-OAEP (SHA-1), returning base64 for the manifest
pub fn wrap_key_with_rsa_oaep(payload_key: &[u8], kas_public_key_pem: &str) -> Result<String, KemError> {
    RsaOaepKem::default().wrap(payload_key, &kas_public_key_pem.to_string())
}
