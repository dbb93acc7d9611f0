//! Key Encapsulation Mechanisms (KEM)
//!
//! Wrapping of key splits to KAS public keys: RSA-OAEP for `wrapped`
//! key access objects, ECDH + HKDF for `eccWrapped` ones.

use thiserror::Error;

pub mod ec;
pub mod rsa;

/// KEM-related errors
#[derive(Debug, Error)]
pub enum KemError {
    #[error("Key wrapping failed: {0}")]
    WrapError(String),

    #[error("Key unwrapping failed: {0}")]
    UnwrapError(String),

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("Invalid PEM block: {0}")]
    InvalidPemBlock(String),

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Unsupported public key type: {0}")]
    UnsupportedPublicKeyType(String),

    #[error("Invalid RSA key size {bits}: only 2048 and 4096 bit keys are accepted")]
    InvalidRsaKeySize { bits: usize },

    #[error("Invalid EC curve: {0}")]
    InvalidEcCurve(String),

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Trait for key encapsulation mechanisms
pub trait KeyEncapsulation {
    /// Public key type
    type PublicKey;

    /// Private key type
    type PrivateKey;

    /// Wrapped key type (ciphertext)
    type WrappedKey;

    /// Wrap a symmetric key with a public key
    fn wrap(&self, key: &[u8], public_key: &Self::PublicKey) -> Result<Self::WrappedKey, KemError>;

    /// Unwrap a symmetric key with a private key
    fn unwrap(
        &self,
        wrapped: &Self::WrappedKey,
        private_key: &Self::PrivateKey,
    ) -> Result<Vec<u8>, KemError>;
}
