//! Hashing and encoding helpers shared by the TDF layers

use crate::rng::RandomSource;
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL},
    Engine as _,
};
use sha2::{Digest, Sha256};

/// SHA-256 digest
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Lowercase hex
pub fn hex_encode(data: &[u8]) -> String {
    hex::encode(data)
}

pub fn hex_decode(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(text)
}

/// Standard base64 with padding
pub fn base64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn base64_decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(text)
}

/// URL-safe base64 without padding, as used in JWS and JWK members
pub fn base64url_encode(data: &[u8]) -> String {
    BASE64_URL.encode(data)
}

pub fn base64url_decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_URL.decode(text)
}

/// Generate a random 32-byte key
pub fn generate_key_32(rng: &dyn RandomSource) -> [u8; 32] {
    let mut key = [0u8; 32];
    rng.fill(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::OsRandom;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            hex_encode(&sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_base64url_has_no_padding() {
        let encoded = base64url_encode(&[0xfb, 0xff]);
        assert_eq!(encoded, "-_8");
        assert_eq!(base64url_decode(&encoded).unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn test_generate_key() {
        let key1 = generate_key_32(&OsRandom);
        let key2 = generate_key_32(&OsRandom);
        assert_ne!(key1, key2);
    }
}
