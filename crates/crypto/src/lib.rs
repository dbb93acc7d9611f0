//! OpenTDF Cryptographic Operations
//!
//! Primitives used by the TDF writer and reader:
//! - AES-GCM segment sealing with 128/192/256-bit keys and truncated tags
//! - RSA-OAEP and ECDH-HKDF wrapping of key splits
//! - HMAC-SHA256 signatures and policy bindings with constant-time checks
//! - CRC-32 with combine, for payload checksums assembled from segments
//! - PEM/DER/X.509 key parsing and validation
//! - Zeroizing key types and pluggable random sources
//!
//! # Example
//!
//! ```
//! use opentdf_crypto::{AesGcmCipher, OsRandom};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cipher = AesGcmCipher::new(&[7u8; 32])?;
//! let sealed = cipher.encrypt(b"sensitive information", &OsRandom)?;
//! assert_eq!(cipher.decrypt(&sealed)?, b"sensitive information");
//! # Ok(())
//! # }
//! ```

pub mod crc32;
pub mod helpers;
pub mod hmac;
pub mod kem;
pub mod pem;
pub mod rng;
pub mod symmetric;
pub mod types;

pub use helpers::{
    base64_decode, base64_encode, base64url_decode, base64url_encode, generate_key_32,
    hex_decode, hex_encode, sha256,
};
pub use hmac::{
    calculate_hmac, calculate_policy_binding, constant_time_eq, verify_hmac,
    verify_policy_binding, HmacError,
};
pub use kem::ec::{
    compress_ec_point, derive_wrap_key, tdf_salt, EcCurve, EcPrivateKey, EcPublicKey,
    EcWrappedKey, EcdhKem,
};
pub use kem::rsa::{wrap_key_with_rsa_oaep, OaepHash, RsaOaepKem};
pub use kem::{KemError, KeyEncapsulation};
pub use pem::{
    is_pem_or_der_private_key, parse_private_key_pem, parse_public_key_pem,
    validate_public_key_pem, PrivateKey, PublicKey, PublicKeyInfo, PublicKeySource,
    PublicKeyType,
};
pub use rng::{random_bytes, OsRandom, RandomSource, RngAdapter, SeededRandom};
pub use symmetric::{AesGcmCipher, EncryptionError};
pub use types::{KeyError, Nonce96, PayloadKey, SplitKey};

pub use p256;
pub use rsa;
pub use sha2;
