//! KAS (Key Access Service) rewrap transport
//!
//! The reader hands each key access object to a [`RewrapTransport`] together
//! with the manifest policy and the public half of a client session key. The
//! KAS unwraps its share and re-encrypts it to the session key; the reader
//! then opens it with [`ClientKeyPair::unwrap`].
//!
//! # Protocol Flow ([`HttpRewrapTransport`])
//!
//! 1. Build the unsigned rewrap request (policy id and body, one key access object)
//! 2. Sign it as a JWT whose `requestBody` claim is the request JSON string
//! 3. POST `{"signedRequestToken": ...}` to `{kas}/v2/rewrap` with the access
//!    token and a DPoP proof
//! 4. Return the `kasWrappedKey` and `sessionPublicKey` of the response
//!
//! Session keys:
//!
//! - RSA-2048: the KAS encrypts the share with RSA-OAEP (SHA-1)
//! - EC: the KAS returns an ephemeral `sessionPublicKey`; the share is opened
//!   with ECDH, HKDF (salt = SHA-256("TDF")) and AES-256-GCM
//!
//! # Example
//!
//! ```no_run
//! use opentdf_core::auth::{ClientCredentials, TokenSource, TokenSourceConfig};
//! use opentdf_core::kas::HttpRewrapTransport;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tokens = TokenSource::new(TokenSourceConfig::new(
//!     "https://idp.example.com/token",
//!     ClientCredentials::with_secret("client", "secret"),
//! ))?;
//! let transport = HttpRewrapTransport::builder()
//!     .token_source(Arc::new(tokens))
//!     .build()?;
//! # let _ = transport;
//! # Ok(())
//! # }
//! ```

use crate::auth::jws::{self, JwsSigningKey};
use crate::auth::{AuthError, DpopKey, JwsError, TokenSource};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use opentdf_crypto::rsa::pkcs8::{EncodePublicKey, LineEnding};
use opentdf_crypto::rsa::{RsaPrivateKey, RsaPublicKey};
use opentdf_crypto::{
    derive_wrap_key, parse_private_key_pem, AesGcmCipher, EcCurve, EcPrivateKey, EcPublicKey, KemError,
    OsRandom, PrivateKey, RandomSource, RngAdapter, RsaOaepKem,
};
use opentdf_protocol::{
    KasPolicy, KeyAccess, KeyAccessObject, KeyAccessObjectWrapper, Policy, PolicyRequest, RewrapResponse,
    SignedRewrapRequest, UnsignedRewrapRequest,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

/// Lifetime of the signed request token in seconds
const REQUEST_TOKEN_LIFETIME_SECS: i64 = 60;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Rewrap errors
#[derive(Debug, Error)]
pub enum RewrapError {
    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Key unwrapping failed: {0}")]
    UnwrapError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JWT error: {0}")]
    Jws(#[from] JwsError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Key error: {0}")]
    Kem(#[from] KemError),

    #[error("Rewrap canceled")]
    Canceled,
}

impl RewrapError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RewrapError::Reqwest(e) => e.is_timeout() || e.is_connect(),
            RewrapError::HttpError(msg) => msg.starts_with("HTTP 5") || msg.starts_with("HTTP 429"),
            RewrapError::Auth(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            RewrapError::AuthenticationFailed => {
                Some("Check that the access token is valid and bound to the DPoP key")
            }
            RewrapError::AccessDenied(_) => {
                Some("The entity lacks an entitlement for one of the policy attributes")
            }
            RewrapError::Auth(e) => e.suggestion(),
            RewrapError::Reqwest(_) => Some("Check that the KAS URL is reachable"),
            _ => None,
        }
    }
}

/// One key access object to rewrap
#[derive(Debug, Clone)]
pub struct RewrapRequest {
    pub key_access: KeyAccess,
    /// Base64 policy exactly as stored in the manifest
    pub policy: String,
    /// PEM of the client session public key
    pub client_public_key: String,
}

impl RewrapRequest {
    pub fn kas_url(&self) -> &str {
        &self.key_access.url
    }
}

/// Share re-encrypted to the client session key
#[derive(Debug, Clone)]
pub struct RewrapResult {
    pub wrapped_key: Vec<u8>,
    /// Present when the KAS rewrapped with an ephemeral EC key
    pub session_public_key: Option<String>,
}

/// Sends rewrap requests to a KAS
#[async_trait]
pub trait RewrapTransport: Send + Sync {
    async fn rewrap(&self, request: RewrapRequest, cancel: &CancellationToken) -> Result<RewrapResult, RewrapError>;
}

/// Session key type generated by the reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionKeyType {
    #[default]
    Rsa2048,
    EcP256,
}

/// Client session key pair for KAS communication
#[derive(Clone)]
pub enum ClientKeyPair {
    Rsa {
        private_key: Box<RsaPrivateKey>,
        public_key_pem: String,
    },
    Ec {
        private_key: EcPrivateKey,
        public_key_pem: String,
    },
}

impl fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKeyPair::Rsa { .. } => f.write_str("ClientKeyPair::Rsa"),
            ClientKeyPair::Ec { private_key, .. } => write!(f, "ClientKeyPair::Ec({})", private_key.curve()),
        }
    }
}

impl ClientKeyPair {
    /// Generate a new session key pair of the specified type
    pub fn generate(key_type: SessionKeyType, rng: &dyn RandomSource) -> Result<Self, RewrapError> {
        match key_type {
            SessionKeyType::Rsa2048 => {
                let private_key = RsaPrivateKey::new(&mut RngAdapter(rng), 2048)
                    .map_err(|e| RewrapError::CryptoError(format!("RSA key generation failed: {}", e)))?;
                Self::from_rsa(private_key)
            }
            SessionKeyType::EcP256 => Self::from_ec(EcPrivateKey::generate(EcCurve::P256, rng)),
        }
    }

    /// Use an existing RSA or EC private key PEM as the session key
    pub fn from_pem(pem: &str) -> Result<Self, RewrapError> {
        match parse_private_key_pem(pem)? {
            PrivateKey::Rsa(key) => Self::from_rsa(key),
            PrivateKey::Ec(key) => Self::from_ec(key),
        }
    }

    fn from_rsa(private_key: RsaPrivateKey) -> Result<Self, RewrapError> {
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| RewrapError::CryptoError(e.to_string()))?;
        Ok(ClientKeyPair::Rsa {
            private_key: Box::new(private_key),
            public_key_pem,
        })
    }

    fn from_ec(private_key: EcPrivateKey) -> Result<Self, RewrapError> {
        let public_key_pem = private_key.public_key().to_pem()?;
        Ok(ClientKeyPair::Ec {
            private_key,
            public_key_pem,
        })
    }

    /// Get the public key PEM string
    pub fn public_key_pem(&self) -> &str {
        match self {
            ClientKeyPair::Rsa { public_key_pem, .. } => public_key_pem,
            ClientKeyPair::Ec { public_key_pem, .. } => public_key_pem,
        }
    }

    /// Open a rewrapped share
    pub fn unwrap(&self, result: &RewrapResult) -> Result<Zeroizing<Vec<u8>>, RewrapError> {
        match self {
            ClientKeyPair::Rsa { private_key, .. } => {
                // OAEP with SHA-1 regardless of the KAO's wrapping algorithm
                let key = RsaOaepKem::with_sha1()
                    .unwrap_with_key(&result.wrapped_key, private_key)
                    .map_err(|e| RewrapError::UnwrapError(e.to_string()))?;
                Ok(Zeroizing::new(key))
            }
            ClientKeyPair::Ec { private_key, .. } => {
                let session_pem = result
                    .session_public_key
                    .as_deref()
                    .ok_or_else(|| RewrapError::InvalidResponse("Missing session public key".to_string()))?;
                let session_key = EcPublicKey::from_pem(session_pem)?;
                let shared = private_key.diffie_hellman(&session_key)?;
                let wrap_key = derive_wrap_key(&shared, 32)?;
                let key = AesGcmCipher::new(&wrap_key)
                    .and_then(|cipher| cipher.decrypt(&result.wrapped_key))
                    .map_err(|e| RewrapError::UnwrapError(format!("AES-GCM decryption failed: {}", e)))?;
                Ok(Zeroizing::new(key))
            }
        }
    }
}

#[derive(Serialize)]
struct RequestTokenClaims {
    /// The KAS reads this claim as a string, not a JSON object
    #[serde(rename = "requestBody")]
    request_body: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
enum Credentials {
    None,
    Static(String),
    Source(Arc<TokenSource>),
}

/// [`RewrapTransport`] speaking the KAS v2 JSON protocol over HTTP
pub struct HttpRewrapTransport {
    http_client: Client,
    credentials: Credentials,
    dpop_key: Option<DpopKey>,
    signing_key: JwsSigningKey,
}

impl fmt::Debug for HttpRewrapTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRewrapTransport")
            .field("dpop", &self.dpop_key.is_some())
            .field("signing_alg", &self.signing_key.algorithm())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct HttpRewrapTransportBuilder {
    timeout: Option<Duration>,
    token_source: Option<Arc<TokenSource>>,
    access_token: Option<String>,
    dpop_key: Option<DpopKey>,
    signing_key: Option<JwsSigningKey>,
}

impl HttpRewrapTransportBuilder {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Token source; its DPoP key is used unless one is set explicitly
    #[must_use]
    pub fn token_source(mut self, source: Arc<TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    /// Fixed access token, used when no token source is set
    #[must_use]
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn dpop_key(mut self, key: DpopKey) -> Self {
        self.dpop_key = Some(key);
        self
    }

    /// Key signing the request token; defaults to the DPoP key
    #[must_use]
    pub fn signing_key(mut self, key: JwsSigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    pub fn build(self) -> Result<HttpRewrapTransport, RewrapError> {
        let http_client = Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;

        let dpop_key = self
            .dpop_key
            .or_else(|| self.token_source.as_ref().map(|s| s.dpop_key().clone()));
        let signing_key = match (self.signing_key, &dpop_key) {
            (Some(key), _) => key,
            (None, Some(dpop)) => dpop.signing_key().clone(),
            (None, None) => JwsSigningKey::Ec(p256::ecdsa::SigningKey::random(&mut RngAdapter(&OsRandom))),
        };
        let credentials = match (self.token_source, self.access_token) {
            (Some(source), _) => Credentials::Source(source),
            (None, Some(token)) => Credentials::Static(token),
            (None, None) => Credentials::None,
        };

        Ok(HttpRewrapTransport {
            http_client,
            credentials,
            dpop_key,
            signing_key,
        })
    }
}

impl HttpRewrapTransport {
    pub fn builder() -> HttpRewrapTransportBuilder {
        HttpRewrapTransportBuilder::default()
    }

    async fn access_token(&self, cancel: &CancellationToken) -> Result<Option<String>, RewrapError> {
        Ok(match &self.credentials {
            Credentials::None => None,
            Credentials::Static(token) => Some(token.clone()),
            Credentials::Source(source) => Some(source.access_token(cancel).await?),
        })
    }

    /// Create the signed JWT carrying the rewrap request
    fn create_signed_jwt(&self, request: &UnsignedRewrapRequest) -> Result<String, RewrapError> {
        let now = Utc::now().timestamp();
        let claims = RequestTokenClaims {
            request_body: serde_json::to_string(request)?,
            iat: now,
            exp: now + REQUEST_TOKEN_LIFETIME_SECS,
        };
        Ok(jws::sign(&self.signing_key, json!({ "typ": "JWT" }), &claims)?)
    }

    fn extract_result(response: RewrapResponse) -> Result<RewrapResult, RewrapError> {
        let policy_result = response
            .responses
            .first()
            .ok_or_else(|| RewrapError::InvalidResponse("Empty response".to_string()))?;
        let key_result = policy_result
            .results
            .iter()
            .find(|r| r.key_access_object_id == KAO_ID)
            .or_else(|| policy_result.results.first())
            .ok_or_else(|| RewrapError::InvalidResponse("No key results".to_string()))?;

        if !key_result.is_permit() {
            let error_msg = key_result
                .error
                .clone()
                .unwrap_or_else(|| "Access denied".to_string());
            return Err(RewrapError::AccessDenied(error_msg));
        }

        let wrapped_key_b64 = key_result
            .wrapped_key()
            .ok_or_else(|| RewrapError::InvalidResponse("Missing wrapped key".to_string()))?;
        Ok(RewrapResult {
            wrapped_key: BASE64.decode(wrapped_key_b64)?,
            session_public_key: response.session_public_key.clone(),
        })
    }
}

const KAO_ID: &str = "kao-0";

/// Build the unsigned rewrap request for a single key access object
pub fn build_rewrap_request(request: &RewrapRequest) -> Result<UnsignedRewrapRequest, RewrapError> {
    let policy_id = extract_policy_uuid(&request.policy)?;
    let kao = KeyAccessObject::from(&request.key_access);
    // RSA requests leave the algorithm unset
    let algorithm = kao.is_ec_wrapped().then(|| kao.detect_algorithm().to_string());

    Ok(UnsignedRewrapRequest {
        client_public_key: request.client_public_key.clone(),
        requests: vec![PolicyRequest {
            algorithm,
            policy: KasPolicy {
                id: policy_id,
                body: request.policy.clone(),
            },
            key_access_objects: vec![KeyAccessObjectWrapper {
                key_access_object_id: KAO_ID.to_string(),
                key_access_object: kao,
            }],
        }],
    })
}

/// UUID of a base64 policy; must be the 36-character hyphenated form
fn extract_policy_uuid(base64_policy: &str) -> Result<String, RewrapError> {
    let policy = Policy::from_base64(base64_policy).map_err(|e| RewrapError::InvalidPolicy(e.to_string()))?;
    if policy.uuid.len() != 36 {
        return Err(RewrapError::InvalidPolicy(format!(
            "Invalid UUID format: expected 36 characters, got {}",
            policy.uuid.len()
        )));
    }
    Ok(policy.uuid)
}

#[async_trait]
impl RewrapTransport for HttpRewrapTransport {
    async fn rewrap(&self, request: RewrapRequest, cancel: &CancellationToken) -> Result<RewrapResult, RewrapError> {
        let unsigned = build_rewrap_request(&request)?;
        let signed = SignedRewrapRequest {
            signed_request_token: self.create_signed_jwt(&unsigned)?,
        };
        let endpoint = format!("{}/v2/rewrap", request.kas_url().trim_end_matches('/'));
        let token = self.access_token(cancel).await?;

        let mut builder = self
            .http_client
            .post(&endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&signed);
        match (&self.dpop_key, &token) {
            (Some(dpop), Some(token)) => {
                builder = builder
                    .header(AUTHORIZATION, format!("DPoP {}", token))
                    .header("DPoP", dpop.proof_for_token("POST", &endpoint, token, None)?);
            }
            (Some(dpop), None) => {
                builder = builder.header("DPoP", dpop.proof("POST", &endpoint, None)?);
            }
            (None, Some(token)) => {
                builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
            }
            (None, None) => {}
        }

        tracing::debug!(endpoint = %endpoint, "Sending rewrap request");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RewrapError::Canceled),
            response = builder.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), endpoint = %endpoint, "Rewrap rejected");
            return Err(match status.as_u16() {
                401 => RewrapError::AuthenticationFailed,
                403 => RewrapError::AccessDenied(error_body),
                _ => RewrapError::HttpError(format!("HTTP {}: {}", status.as_u16(), error_body)),
            });
        }

        let rewrap_response: RewrapResponse = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RewrapError::Canceled),
            body = response.json() => body?,
        };
        Self::extract_result(rewrap_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use opentdf_crypto::SeededRandom;
    use opentdf_protocol::KeyAccessType;
    use serde_json::Value;

    const KAS2_RSA_PRIVATE: &str = include_str!("../tests/fixtures/kas2_rsa_private.pem");
    const KAS_EC_PRIVATE: &str = include_str!("../tests/fixtures/kas_ec_p256_private.pem");
    const DPOP_EC_PRIVATE: &str = include_str!("../tests/fixtures/dpop_ec_private.pem");

    fn request(url: &str) -> RewrapRequest {
        let policy = Policy::new(
            "a1b2c3d4-e5f6-4a5b-8c7d-0123456789ab",
            ["https://example.com/attr/a/value/b"],
            vec![],
        )
        .to_base64()
        .unwrap();
        let mut key_access = KeyAccess::new(url);
        key_access.wrapped_key = BASE64.encode([1u8; 256]);
        RewrapRequest {
            key_access,
            policy,
            client_public_key: "-----BEGIN PUBLIC KEY-----".to_string(),
        }
    }

    #[test]
    fn test_rsa_session_key_unwrap() {
        let session = ClientKeyPair::from_pem(KAS2_RSA_PRIVATE).unwrap();
        assert!(session.public_key_pem().starts_with("-----BEGIN PUBLIC KEY-----"));

        let ClientKeyPair::Rsa { private_key, .. } = &session else {
            panic!("expected RSA");
        };
        let wrapped = RsaOaepKem::with_sha1()
            .wrap_with_key(&[7u8; 32], &RsaPublicKey::from(private_key.as_ref()))
            .unwrap();
        let result = RewrapResult {
            wrapped_key: wrapped,
            session_public_key: None,
        };
        assert_eq!(session.unwrap(&result).unwrap().as_slice(), &[7u8; 32]);
    }

    #[test]
    fn test_ec_session_key_unwrap() {
        let rng = SeededRandom::from_u64(11);
        let session = ClientKeyPair::generate(SessionKeyType::EcP256, &rng).unwrap();
        let client_public = EcPublicKey::from_pem(session.public_key_pem()).unwrap();

        // KAS side: ephemeral key, ECDH with the client key, seal the share
        let kas_session = EcPrivateKey::generate(EcCurve::P256, &rng);
        let shared = kas_session.diffie_hellman(&client_public).unwrap();
        let wrap_key = derive_wrap_key(&shared, 32).unwrap();
        let sealed = AesGcmCipher::new(&wrap_key).unwrap().encrypt(&[9u8; 32], &rng).unwrap();

        let result = RewrapResult {
            wrapped_key: sealed.clone(),
            session_public_key: Some(kas_session.public_key().to_pem().unwrap()),
        };
        assert_eq!(session.unwrap(&result).unwrap().as_slice(), &[9u8; 32]);

        let missing = RewrapResult {
            wrapped_key: sealed,
            session_public_key: None,
        };
        assert!(matches!(session.unwrap(&missing), Err(RewrapError::InvalidResponse(_))));
    }

    #[test]
    fn test_ec_session_key_from_pem() {
        let session = ClientKeyPair::from_pem(KAS_EC_PRIVATE).unwrap();
        assert!(matches!(session, ClientKeyPair::Ec { .. }));
    }

    #[test]
    fn test_build_rewrap_request() {
        let req = request("https://kas.example.com");
        let unsigned = build_rewrap_request(&req).unwrap();
        let json = serde_json::to_value(&unsigned).unwrap();

        let policy_request = &json["requests"][0];
        assert!(policy_request.get("algorithm").is_none());
        assert_eq!(policy_request["policy"]["id"], "a1b2c3d4-e5f6-4a5b-8c7d-0123456789ab");
        assert_eq!(policy_request["policy"]["body"], req.policy.as_str());
        assert_eq!(policy_request["keyAccessObjects"][0]["keyAccessObjectId"], "kao-0");
        assert_eq!(policy_request["keyAccessObjects"][0]["keyAccessObject"]["type"], "wrapped");

        let mut ec = request("https://kas.example.com");
        ec.key_access.access_type = KeyAccessType::EcWrapped;
        let unsigned = build_rewrap_request(&ec).unwrap();
        assert_eq!(unsigned.requests[0].algorithm.as_deref(), Some("ec:secp256r1"));
    }

    #[test]
    fn test_short_policy_uuid_rejected() {
        let mut req = request("https://kas.example.com");
        req.policy = Policy::new("short", Vec::<String>::new(), vec![]).to_base64().unwrap();
        assert!(matches!(build_rewrap_request(&req), Err(RewrapError::InvalidPolicy(_))));
    }

    #[tokio::test]
    async fn test_http_rewrap_permit() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "responses": [{
                "policyId": "a1b2c3d4-e5f6-4a5b-8c7d-0123456789ab",
                "results": [{
                    "keyAccessObjectId": "kao-0",
                    "status": "permit",
                    "kasWrappedKey": BASE64.encode(b"rewrapped"),
                }]
            }],
            "sessionPublicKey": "-----BEGIN PUBLIC KEY-----"
        });
        let mock = server
            .mock("POST", "/v2/rewrap")
            .match_header("authorization", "DPoP tok")
            .match_header("dpop", Matcher::Any)
            .match_body(Matcher::Regex("signedRequestToken".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let dpop = DpopKey::from_pem(DPOP_EC_PRIVATE).unwrap();
        let transport = HttpRewrapTransport::builder()
            .access_token("tok")
            .dpop_key(dpop.clone())
            .build()
            .unwrap();
        let result = transport
            .rewrap(request(&server.url()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.wrapped_key, b"rewrapped");
        assert!(result.session_public_key.is_some());
        mock.assert_async().await;

        // The request token is signed with the DPoP key by default
        let unsigned = build_rewrap_request(&request(&server.url())).unwrap();
        let token = transport.create_signed_jwt(&unsigned).unwrap();
        let claims: Value = jws::verify(&token, &dpop.signing_key().verifying_key()).unwrap();
        assert!(claims["requestBody"].is_string());
        assert_eq!(claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(), 60);
    }

    #[tokio::test]
    async fn test_http_rewrap_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let transport = HttpRewrapTransport::builder().access_token("tok").build().unwrap();
        let cancel = CancellationToken::new();

        let m = server.mock("POST", "/v2/rewrap").with_status(401).create_async().await;
        let err = transport.rewrap(request(&server.url()), &cancel).await.unwrap_err();
        assert!(matches!(err, RewrapError::AuthenticationFailed));
        m.remove_async().await;

        let m = server
            .mock("POST", "/v2/rewrap")
            .with_status(403)
            .with_body("no entitlement")
            .create_async()
            .await;
        let err = transport.rewrap(request(&server.url()), &cancel).await.unwrap_err();
        assert!(matches!(err, RewrapError::AccessDenied(ref body) if body == "no entitlement"));
        m.remove_async().await;

        let _m = server.mock("POST", "/v2/rewrap").with_status(503).create_async().await;
        let err = transport.rewrap(request(&server.url()), &cancel).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_rewrap_deny_result() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "responses": [{
                "policyId": "p",
                "results": [{ "keyAccessObjectId": "kao-0", "status": "fail", "error": "forbidden" }]
            }]
        });
        let _m = server
            .mock("POST", "/v2/rewrap")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let transport = HttpRewrapTransport::builder().build().unwrap();
        let err = transport
            .rewrap(request(&server.url()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RewrapError::AccessDenied(ref msg) if msg == "forbidden"));
    }

    #[tokio::test]
    async fn test_http_rewrap_canceled() {
        let transport = HttpRewrapTransport::builder().build().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = transport
            .rewrap(request("http://127.0.0.1:9"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RewrapError::Canceled));
    }
}
