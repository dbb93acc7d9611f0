//! HMAC-SHA256 with constant-time verification
//!
//! Used for segment signatures, the root signature and policy bindings.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum HmacError {
    #[error("HMAC initialization failed")]
    InitFailed,

    #[error("HMAC verification failed")]
    VerificationFailed,

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

/// HMAC-SHA256 over `data`
pub fn calculate_hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, HmacError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| HmacError::InitFailed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Check `expected` against HMAC-SHA256 over `data` in constant time
pub fn verify_hmac(key: &[u8], data: &[u8], expected: &[u8]) -> Result<(), HmacError> {
    let calculated = calculate_hmac(key, data)?;
    if constant_time_eq(&calculated, expected) {
        Ok(())
    } else {
        Err(HmacError::VerificationFailed)
    }
}

/// Constant-time equality for MACs and signatures
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Policy binding for one key split
///
/// `base64(hex(HMAC-SHA256(split_key, base64_policy)))`, where
/// `base64_policy` is the policy exactly as stored in the manifest.
pub fn calculate_policy_binding(base64_policy: &str, split_key: &[u8]) -> Result<String, HmacError> {
    let mac = calculate_hmac(split_key, base64_policy.as_bytes())?;
    Ok(BASE64.encode(hex::encode(mac).as_bytes()))
}

/// Verify a stored policy binding against a recovered split key
///
/// Accepts the current `base64(hex(mac))` form and a bare hex string.
pub fn verify_policy_binding(
    base64_policy: &str,
    split_key: &[u8],
    binding: &str,
) -> Result<(), HmacError> {
    let mac = calculate_hmac(split_key, base64_policy.as_bytes())?;
    let expected_hex = hex::encode(mac);

    let stored = match BASE64.decode(binding) {
        Ok(decoded) if decoded.len() == expected_hex.len() => decoded,
        _ => binding.as_bytes().to_vec(),
    };

    if constant_time_eq(expected_hex.as_bytes(), &stored) {
        Ok(())
    } else {
        Err(HmacError::VerificationFailed)
    }
}
