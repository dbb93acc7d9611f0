//! Compact JWS signing and verification
//!
//! DPoP proofs, client assertions, KAS request tokens and assertion
//! bindings are all compact JWS strings. Only HS256, RS256 and ES256 (P-256)
//! are produced or accepted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use opentdf_crypto::{
    calculate_hmac, constant_time_eq, parse_private_key_pem, parse_public_key_pem, EcPrivateKey,
    EcPublicKey, PrivateKey, PublicKey,
};
use p256::ecdsa::{
    Signature as EcSignature, SigningKey as EcSigningKey, VerifyingKey as EcVerifyingKey,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::pkcs1v15::{
    Signature as RsaSignature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey,
};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum JwsError {
    #[error("Malformed JWS: {0}")]
    Malformed(String),

    #[error("JWS algorithm mismatch: expected {expected}, found {found}")]
    AlgorithmMismatch { expected: String, found: String },

    #[error("JWS signature verification failed")]
    InvalidSignature,

    #[error("Unsupported JWS algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid JWS key: {0}")]
    InvalidKey(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Signature algorithms this crate signs and verifies with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsAlgorithm {
    Hs256,
    Rs256,
    Es256,
}

impl JwsAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            JwsAlgorithm::Hs256 => "HS256",
            JwsAlgorithm::Rs256 => "RS256",
            JwsAlgorithm::Es256 => "ES256",
        }
    }
}

impl fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JwsAlgorithm {
    type Err = JwsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(JwsAlgorithm::Hs256),
            "RS256" => Ok(JwsAlgorithm::Rs256),
            "ES256" => Ok(JwsAlgorithm::Es256),
            other => Err(JwsError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Key used to produce a JWS
#[derive(Clone)]
pub enum JwsSigningKey {
    Hmac(Zeroizing<Vec<u8>>),
    Rsa(Box<RsaPrivateKey>),
    Ec(EcSigningKey),
}

impl fmt::Debug for JwsSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JwsSigningKey")
            .field(&self.algorithm())
            .finish()
    }
}

impl JwsSigningKey {
    pub fn hmac(secret: &[u8]) -> Self {
        JwsSigningKey::Hmac(Zeroizing::new(secret.to_vec()))
    }

    /// Parse an RSA or P-256 private key PEM
    pub fn from_pem(pem: &str) -> Result<Self, JwsError> {
        match parse_private_key_pem(pem).map_err(|e| JwsError::InvalidKey(e.to_string()))? {
            PrivateKey::Rsa(key) => Ok(JwsSigningKey::Rsa(Box::new(key))),
            PrivateKey::Ec(EcPrivateKey::P256(secret)) => EcSigningKey::from_bytes(&secret.to_bytes())
                .map(JwsSigningKey::Ec)
                .map_err(|e| JwsError::InvalidKey(e.to_string())),
            PrivateKey::Ec(other) => Err(JwsError::InvalidKey(format!(
                "ES256 needs a P-256 key, found {}",
                other.curve()
            ))),
        }
    }

    pub fn algorithm(&self) -> JwsAlgorithm {
        match self {
            JwsSigningKey::Hmac(_) => JwsAlgorithm::Hs256,
            JwsSigningKey::Rsa(_) => JwsAlgorithm::Rs256,
            JwsSigningKey::Ec(_) => JwsAlgorithm::Es256,
        }
    }

    pub fn sign(&self, input: &[u8]) -> Result<Vec<u8>, JwsError> {
        match self {
            JwsSigningKey::Hmac(secret) => {
                calculate_hmac(secret, input).map_err(|e| JwsError::InvalidKey(e.to_string()))
            }
            JwsSigningKey::Rsa(key) => {
                let signer = RsaSigningKey::<Sha256>::new(key.as_ref().clone());
                let signature = signer
                    .try_sign(input)
                    .map_err(|e| JwsError::InvalidKey(e.to_string()))?;
                Ok(signature.to_vec())
            }
            JwsSigningKey::Ec(key) => {
                let signature: EcSignature = key
                    .try_sign(input)
                    .map_err(|e| JwsError::InvalidKey(e.to_string()))?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }

    /// The matching verification key
    pub fn verifying_key(&self) -> JwsVerifyingKey {
        match self {
            JwsSigningKey::Hmac(secret) => JwsVerifyingKey::Hmac(secret.clone()),
            JwsSigningKey::Rsa(key) => JwsVerifyingKey::Rsa(RsaPublicKey::from(key.as_ref())),
            JwsSigningKey::Ec(key) => JwsVerifyingKey::Ec(*key.verifying_key()),
        }
    }

    /// Public JWK, absent for symmetric keys
    pub fn public_jwk(&self) -> Option<Value> {
        self.verifying_key().jwk()
    }
}

/// Key used to check a JWS
#[derive(Clone)]
pub enum JwsVerifyingKey {
    Hmac(Zeroizing<Vec<u8>>),
    Rsa(RsaPublicKey),
    Ec(EcVerifyingKey),
}

impl fmt::Debug for JwsVerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JwsVerifyingKey")
            .field(&self.algorithm())
            .finish()
    }
}

impl JwsVerifyingKey {
    pub fn hmac(secret: &[u8]) -> Self {
        JwsVerifyingKey::Hmac(Zeroizing::new(secret.to_vec()))
    }

    /// Parse an RSA or P-256 public key PEM (SPKI, PKCS#1 or certificate)
    pub fn from_pem(pem: &str) -> Result<Self, JwsError> {
        match parse_public_key_pem(pem).map_err(|e| JwsError::InvalidKey(e.to_string()))? {
            PublicKey::Rsa(key) => Ok(JwsVerifyingKey::Rsa(key)),
            PublicKey::Ec(EcPublicKey::P256(key)) => Ok(JwsVerifyingKey::Ec(EcVerifyingKey::from(key))),
            PublicKey::Ec(other) => Err(JwsError::InvalidKey(format!(
                "ES256 needs a P-256 key, found {}",
                other.curve()
            ))),
        }
    }

    pub fn algorithm(&self) -> JwsAlgorithm {
        match self {
            JwsVerifyingKey::Hmac(_) => JwsAlgorithm::Hs256,
            JwsVerifyingKey::Rsa(_) => JwsAlgorithm::Rs256,
            JwsVerifyingKey::Ec(_) => JwsAlgorithm::Es256,
        }
    }

    pub fn verify(&self, input: &[u8], signature: &[u8]) -> Result<(), JwsError> {
        match self {
            JwsVerifyingKey::Hmac(secret) => {
                let expected =
                    calculate_hmac(secret, input).map_err(|e| JwsError::InvalidKey(e.to_string()))?;
                if constant_time_eq(&expected, signature) {
                    Ok(())
                } else {
                    Err(JwsError::InvalidSignature)
                }
            }
            JwsVerifyingKey::Rsa(key) => {
                let signature =
                    RsaSignature::try_from(signature).map_err(|_| JwsError::InvalidSignature)?;
                RsaVerifyingKey::<Sha256>::new(key.clone())
                    .verify(input, &signature)
                    .map_err(|_| JwsError::InvalidSignature)
            }
            JwsVerifyingKey::Ec(key) => {
                let signature =
                    EcSignature::from_slice(signature).map_err(|_| JwsError::InvalidSignature)?;
                key.verify(input, &signature)
                    .map_err(|_| JwsError::InvalidSignature)
            }
        }
    }

    /// Public JWK with members in RFC 7638 order, absent for symmetric keys
    pub fn jwk(&self) -> Option<Value> {
        match self {
            JwsVerifyingKey::Hmac(_) => None,
            JwsVerifyingKey::Rsa(key) => Some(json!({
                "e": URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
                "kty": "RSA",
                "n": URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            })),
            JwsVerifyingKey::Ec(key) => {
                let point = key.as_affine().to_encoded_point(false);
                let x = point.x().map(|x| URL_SAFE_NO_PAD.encode(x))?;
                let y = point.y().map(|y| URL_SAFE_NO_PAD.encode(y))?;
                Some(json!({
                    "crv": "P-256",
                    "kty": "EC",
                    "x": x,
                    "y": y,
                }))
            }
        }
    }

    /// RFC 7638 thumbprint: base64url(SHA-256(canonical JWK))
    pub fn thumbprint(&self) -> Option<String> {
        let canonical = match self {
            JwsVerifyingKey::Hmac(_) => return None,
            JwsVerifyingKey::Rsa(key) => format!(
                r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
                URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
                URL_SAFE_NO_PAD.encode(key.n().to_bytes_be())
            ),
            JwsVerifyingKey::Ec(key) => {
                let point = key.as_affine().to_encoded_point(false);
                format!(
                    r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
                    URL_SAFE_NO_PAD.encode(point.x()?),
                    URL_SAFE_NO_PAD.encode(point.y()?)
                )
            }
        };
        Some(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
    }
}

/// Sign `claims` into a compact JWS
///
/// `header` must be a JSON object; `alg` is filled in from the key.
pub fn sign<C: Serialize>(key: &JwsSigningKey, header: Value, claims: &C) -> Result<String, JwsError> {
    let mut header = match header {
        Value::Object(map) => map,
        _ => return Err(JwsError::Malformed("header must be a JSON object".to_string())),
    };
    header.insert("alg".to_string(), Value::String(key.algorithm().to_string()));

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Value::Object(header))?);
    let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header_b64, claims_b64);
    let signature = key.sign(signing_input.as_bytes())?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Parsed but unverified compact JWS
#[derive(Debug, Clone)]
pub struct CompactJws {
    pub header: Value,
    signing_input: String,
    claims: Vec<u8>,
    signature: Vec<u8>,
}

impl CompactJws {
    pub fn parse(token: &str) -> Result<Self, JwsError> {
        let mut parts = token.split('.');
        let (header, claims, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(JwsError::Malformed("expected three dot-separated parts".to_string())),
        };
        let decode = |part: &str, what: &str| {
            URL_SAFE_NO_PAD
                .decode(part)
                .map_err(|e| JwsError::Malformed(format!("{}: {}", what, e)))
        };

        Ok(CompactJws {
            header: serde_json::from_slice(&decode(header, "header")?)?,
            signing_input: format!("{}.{}", header, claims),
            claims: decode(claims, "claims")?,
            signature: decode(signature, "signature")?,
        })
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    /// Check the signature with `key` and deserialize the claims
    pub fn verify<C: DeserializeOwned>(&self, key: &JwsVerifyingKey) -> Result<C, JwsError> {
        let expected = key.algorithm();
        let found = self.algorithm().unwrap_or_default();
        if found != expected.as_str() {
            return Err(JwsError::AlgorithmMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        key.verify(self.signing_input.as_bytes(), &self.signature)?;
        Ok(serde_json::from_slice(&self.claims)?)
    }
}

/// Parse and verify in one step
pub fn verify<C: DeserializeOwned>(token: &str, key: &JwsVerifyingKey) -> Result<C, JwsError> {
    CompactJws::parse(token)?.verify(key)
}
