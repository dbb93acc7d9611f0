//! DPoP proof-of-possession (RFC 9449)
//!
//! Every token request and every KAS request carries a fresh proof signed by
//! the client's DPoP key. The proof header embeds the public JWK, so the
//! server can bind the issued token to the key's thumbprint.

use super::jws::{self, JwsAlgorithm, JwsSigningKey};
use super::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use opentdf_crypto::{RandomSource, RngAdapter};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Lifetime of a proof in seconds
pub const PROOF_LIFETIME_SECS: i64 = 300;

#[derive(Serialize)]
struct ProofClaims<'a> {
    jti: String,
    htm: &'a str,
    htu: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ath: Option<String>,
}

/// An asymmetric key used to sign DPoP proofs (ES256 or RS256)
#[derive(Debug, Clone)]
pub struct DpopKey {
    key: JwsSigningKey,
    jwk: Value,
    thumbprint: String,
}

impl DpopKey {
    /// Fresh P-256 key
    pub fn generate_es256(rng: &dyn RandomSource) -> Result<Self, AuthError> {
        let signing = p256::ecdsa::SigningKey::random(&mut RngAdapter(rng));
        Self::from_signing_key(JwsSigningKey::Ec(signing))
    }

    /// RSA or P-256 private key PEM
    pub fn from_pem(pem: &str) -> Result<Self, AuthError> {
        Self::from_signing_key(JwsSigningKey::from_pem(pem)?)
    }

    pub fn from_signing_key(key: JwsSigningKey) -> Result<Self, AuthError> {
        let verifying = key.verifying_key();
        let (jwk, thumbprint) = match (verifying.jwk(), verifying.thumbprint()) {
            (Some(jwk), Some(thumbprint)) => (jwk, thumbprint),
            _ => {
                return Err(AuthError::InvalidKey(
                    "DPoP needs an asymmetric key".to_string(),
                ))
            }
        };
        Ok(DpopKey {
            key,
            jwk,
            thumbprint,
        })
    }

    pub fn algorithm(&self) -> JwsAlgorithm {
        self.key.algorithm()
    }

    /// Public JWK embedded in every proof
    pub fn jwk(&self) -> &Value {
        &self.jwk
    }

    /// RFC 7638 thumbprint of the public key (the `jkt` a bound token carries)
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn signing_key(&self) -> &JwsSigningKey {
        &self.key
    }

    /// Proof for a request without an access token (token endpoint)
    pub fn proof(&self, method: &str, url: &str, nonce: Option<&str>) -> Result<String, AuthError> {
        self.sign_proof(method, url, nonce, None)
    }

    /// Proof for a resource request presenting `access_token`
    ///
    /// Adds the `ath` claim, base64url(SHA-256(access_token)).
    pub fn proof_for_token(
        &self,
        method: &str,
        url: &str,
        access_token: &str,
        nonce: Option<&str>,
    ) -> Result<String, AuthError> {
        let ath = URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()));
        self.sign_proof(method, url, nonce, Some(ath))
    }

    fn sign_proof(
        &self,
        method: &str,
        url: &str,
        nonce: Option<&str>,
        ath: Option<String>,
    ) -> Result<String, AuthError> {
        let iat = Utc::now().timestamp();
        let claims = ProofClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            htm: method,
            htu: url,
            iat,
            exp: iat + PROOF_LIFETIME_SECS,
            nonce,
            ath,
        };
        let header = json!({
            "typ": "dpop+jwt",
            "jwk": self.jwk,
        });
        Ok(jws::sign(&self.key, header, &claims)?)
    }
}
