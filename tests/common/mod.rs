//! Common test utilities for opentdf-core integration tests
//!
//! [`MockKas`] plays the KAS side of the rewrap protocol in process: it
//! unwraps the key access object with its own private key and rewraps the
//! share to the client session key exactly as a real KAS would.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use opentdf_core::fqn::AttributeFqn;
use opentdf_core::kas::{RewrapError, RewrapRequest, RewrapResult, RewrapTransport};
use opentdf_core::keysplit::{AttributeRule, AttributeValue, KasGrant, KasPublicKey};
use opentdf_core::tdf::{FinalizeOptions, TdfWriter};
use opentdf_crypto::rsa::RsaPrivateKey;
use opentdf_crypto::{
    derive_wrap_key, parse_private_key_pem, parse_public_key_pem, AesGcmCipher, EcPrivateKey,
    EcWrappedKey, EcdhKem, KeyEncapsulation, OaepHash, OsRandom, PrivateKey, PublicKey,
    RsaOaepKem,
};
use opentdf_protocol::KeyAlgorithm;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const KAS1_URL: &str = "https://kas1.example.com";
pub const KAS2_URL: &str = "https://kas2.example.com";
pub const KAS_EC_URL: &str = "https://kas-ec.example.com";

pub const KAS1_RSA_PUBLIC: &str = include_str!("../fixtures/kas1_rsa_public.pem");
pub const KAS1_RSA_PRIVATE: &str = include_str!("../fixtures/kas1_rsa_private.pem");
pub const KAS2_RSA_PUBLIC: &str = include_str!("../fixtures/kas2_rsa_public.pem");
pub const KAS2_RSA_PRIVATE: &str = include_str!("../fixtures/kas2_rsa_private.pem");
pub const KAS_EC_PUBLIC: &str = include_str!("../fixtures/kas_ec_p256_public.pem");
pub const KAS_EC_PRIVATE: &str = include_str!("../fixtures/kas_ec_p256_private.pem");

/// Install a log subscriber honoring `RUST_LOG`; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Test data for encryption/decryption
pub const TEST_PLAINTEXT: &[u8] = b"Hello, OpenTDF! This is test data for encryption.";

pub fn kas1() -> KasGrant {
    KasGrant::new(KAS1_URL).with_public_key(KasPublicKey::new(KeyAlgorithm::RsaOaep, KAS1_RSA_PUBLIC).with_kid("r1"))
}

pub fn kas2() -> KasGrant {
    KasGrant::new(KAS2_URL).with_public_key(KasPublicKey::new(KeyAlgorithm::RsaOaep, KAS2_RSA_PUBLIC))
}

pub fn kas_ec() -> KasGrant {
    KasGrant::new(KAS_EC_URL).with_public_key(KasPublicKey::new(KeyAlgorithm::EcdhHkdf, KAS_EC_PUBLIC).with_kid("e1"))
}

pub fn attribute(url: &str, rule: AttributeRule, grant: KasGrant) -> AttributeValue {
    let fqn = AttributeFqn::parse(url).expect("valid attribute FQN");
    AttributeValue::new(fqn, rule).with_grant(grant)
}

/// Write `segments` (index, plaintext) in the given order and assemble the
/// archive in ascending index order
pub fn write_tdf(writer: &TdfWriter, segments: &[(i64, &[u8])], options: FinalizeOptions) -> Vec<u8> {
    let cancel = CancellationToken::new();
    let mut parts: Vec<(i64, Vec<u8>)> = segments
        .iter()
        .map(|(index, data)| (*index, writer.write_segment(*index, data, &cancel).expect("write segment").data))
        .collect();
    parts.sort_by_key(|(index, _)| *index);

    let mut tdf: Vec<u8> = parts.into_iter().flat_map(|(_, data)| data).collect();
    tdf.extend(writer.finalize(options, &cancel).expect("finalize").data);
    tdf
}

enum KasKey {
    Rsa(RsaPrivateKey, OaepHash),
    Ec(EcPrivateKey),
}

/// In-process KAS
#[derive(Default)]
pub struct MockKas {
    keys: HashMap<String, KasKey>,
    denied: HashSet<String>,
    corrupted: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockKas {
    pub fn new() -> Self {
        Self::default()
    }

    /// KAS1 and KAS2 with RSA keys, plus the P-256 KAS
    pub fn standard() -> Self {
        Self::new()
            .with_rsa(KAS1_URL, KAS1_RSA_PRIVATE, OaepHash::Sha1)
            .with_rsa(KAS2_URL, KAS2_RSA_PRIVATE, OaepHash::Sha1)
            .with_ec(KAS_EC_URL, KAS_EC_PRIVATE)
    }

    pub fn with_rsa(mut self, url: &str, pem: &str, hash: OaepHash) -> Self {
        let PrivateKey::Rsa(key) = parse_private_key_pem(pem).expect("RSA private key") else {
            panic!("expected an RSA key for {url}");
        };
        self.keys.insert(url.to_string(), KasKey::Rsa(key, hash));
        self
    }

    pub fn with_ec(mut self, url: &str, pem: &str) -> Self {
        let key = EcPrivateKey::from_pem(pem).expect("EC private key");
        self.keys.insert(url.to_string(), KasKey::Ec(key));
        self
    }

    /// Answer every request to `url` with a deny result
    pub fn deny(mut self, url: &str) -> Self {
        self.denied.insert(url.to_string());
        self
    }

    /// Return a share with one bit flipped for `url`
    pub fn corrupt(mut self, url: &str) -> Self {
        self.corrupted.insert(url.to_string());
        self
    }

    /// KAS URLs requested so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Unwrap the share a key access object carries
    pub fn unwrap_share(&self, request: &RewrapRequest) -> Result<Vec<u8>, RewrapError> {
        let kao = &request.key_access;
        let key = self
            .keys
            .get(&kao.url)
            .ok_or_else(|| RewrapError::HttpError(format!("HTTP 404: unknown KAS {}", kao.url)))?;
        let wrapped = BASE64.decode(&kao.wrapped_key)?;

        let share = match key {
            KasKey::Rsa(private_key, hash) => RsaOaepKem::new(*hash).unwrap_with_key(&wrapped, private_key)?,
            KasKey::Ec(private_key) => {
                let ephemeral = kao
                    .ephemeral_public_key
                    .clone()
                    .ok_or_else(|| RewrapError::InvalidResponse("missing ephemeral key".to_string()))?;
                EcdhKem::default().unwrap(
                    &EcWrappedKey {
                        wrapped,
                        ephemeral_public_key_pem: ephemeral,
                    },
                    private_key,
                )?
            }
        };
        Ok(share)
    }

    /// Rewrap synchronously, as the async transport does
    pub fn respond(&self, request: &RewrapRequest) -> Result<RewrapResult, RewrapError> {
        let url = request.kas_url().to_string();
        self.calls.lock().expect("calls lock").push(url.clone());
        if self.denied.contains(&url) {
            return Err(RewrapError::AccessDenied(format!("{url} denied")));
        }

        let mut share = self.unwrap_share(request)?;
        if self.corrupted.contains(&url) {
            share[0] ^= 0x01;
        }

        match parse_public_key_pem(&request.client_public_key)? {
            PublicKey::Rsa(client_key) => Ok(RewrapResult {
                wrapped_key: RsaOaepKem::with_sha1().wrap_with_key(&share, &client_key)?,
                session_public_key: None,
            }),
            PublicKey::Ec(client_key) => {
                let session = EcPrivateKey::generate(client_key.curve(), &OsRandom);
                let shared = session.diffie_hellman(&client_key)?;
                let wrap_key = derive_wrap_key(&shared, 32)?;
                let sealed = AesGcmCipher::new(&wrap_key)
                    .and_then(|cipher| cipher.encrypt(&share, &OsRandom))
                    .map_err(|e| RewrapError::CryptoError(e.to_string()))?;
                Ok(RewrapResult {
                    wrapped_key: sealed,
                    session_public_key: Some(session.public_key().to_pem()?),
                })
            }
        }
    }
}

#[async_trait]
impl RewrapTransport for MockKas {
    async fn rewrap(&self, request: RewrapRequest, _cancel: &CancellationToken) -> Result<RewrapResult, RewrapError> {
        self.respond(&request)
    }
}
