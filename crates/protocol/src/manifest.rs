//! TDF Manifest structures
//!
//! The JSON document stored as `0.manifest.json` in every TDF archive:
//! - Payload reference
//! - Encryption information (policy, key access objects, method)
//! - Integrity information (segments and root signature)
//! - Optional assertions
//!
//! Cryptographic operations (HMAC, policy binding generation) live in the
//! crypto crate.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::algorithm::{IntegrityAlgorithm, KeyAccessType};
use crate::assertion::Assertion;
use crate::ProtocolError;

/// `schemaVersion` written by this crate; manifests without one are legacy
pub const TDF_SPEC_VERSION: &str = "4.3.0";

/// `schemaVersion` of key access objects
pub const KEY_ACCESS_SCHEMA_VERSION: &str = "1.0";

/// Archive entry holding the encrypted payload
pub const PAYLOAD_ENTRY: &str = "0.payload";

/// Archive entry holding the manifest
pub const MANIFEST_ENTRY: &str = "0.manifest.json";

/// TDF manifest structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdfManifest {
    pub payload: Payload,
    #[serde(rename = "encryptionInformation")]
    pub encryption_information: EncryptionInformation,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,
    #[serde(rename = "schemaVersion", default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

/// Payload reference in TDF manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            payload_type: "reference".to_string(),
            url: PAYLOAD_ENTRY.to_string(),
            protocol: "zip".to_string(),
            mime_type: Some("application/octet-stream".to_string()),
            is_encrypted: true,
        }
    }
}

/// Encryption information in TDF manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionInformation {
    #[serde(rename = "type")]
    pub encryption_type: String,
    pub policy: String,
    #[serde(rename = "keyAccess")]
    pub key_access: Vec<KeyAccess>,
    pub method: EncryptionMethod,
    #[serde(rename = "integrityInformation")]
    pub integrity_information: IntegrityInformation,
}

/// Policy binding of a key access object
///
/// Legacy manifests store the binding hash as a bare string; it is read
/// into this structure with the algorithm defaulted to `HS256`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(from = "RawPolicyBinding")]
pub struct PolicyBinding {
    pub alg: String,
    pub hash: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPolicyBinding {
    Object {
        #[serde(default = "default_binding_alg")]
        alg: String,
        hash: String,
    },
    Legacy(String),
}

fn default_binding_alg() -> String {
    "HS256".to_string()
}

impl From<RawPolicyBinding> for PolicyBinding {
    fn from(raw: RawPolicyBinding) -> Self {
        match raw {
            RawPolicyBinding::Object { alg, hash } => PolicyBinding { alg, hash },
            RawPolicyBinding::Legacy(hash) => PolicyBinding {
                alg: default_binding_alg(),
                hash,
            },
        }
    }
}

impl PolicyBinding {
    pub fn hs256(hash: String) -> Self {
        PolicyBinding {
            alg: default_binding_alg(),
            hash,
        }
    }
}

/// Key access object in manifest
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KeyAccess {
    #[serde(rename = "type")]
    pub access_type: KeyAccessType,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "wrappedKey")]
    pub wrapped_key: String,
    #[serde(rename = "policyBinding")]
    pub policy_binding: PolicyBinding,
    #[serde(rename = "encryptedMetadata", default, skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Split identifier; absent when the key is not split
    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    pub split_id: Option<String>,
    #[serde(rename = "schemaVersion", default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    /// Ephemeral public key (PEM) for `eccWrapped` objects
    #[serde(rename = "ephemeralPublicKey", default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_public_key: Option<String>,
}

impl KeyAccess {
    /// Creates a `wrapped` key access object with an empty wrapped key
    pub fn new(url: impl Into<String>) -> Self {
        KeyAccess {
            access_type: KeyAccessType::Wrapped,
            url: url.into(),
            protocol: "kas".to_string(),
            wrapped_key: String::new(),
            policy_binding: PolicyBinding::hs256(String::new()),
            encrypted_metadata: None,
            kid: None,
            split_id: None,
            schema_version: Some(KEY_ACCESS_SCHEMA_VERSION.to_string()),
            ephemeral_public_key: None,
        }
    }

    /// Split id, treating an empty string like an absent one
    pub fn split_id(&self) -> &str {
        self.split_id.as_deref().unwrap_or("")
    }

    /// Decode `encryptedMetadata` into its JSON envelope
    pub fn decode_encrypted_metadata(&self) -> Result<Option<EncryptedMetadata>, ProtocolError> {
        match &self.encrypted_metadata {
            None => Ok(None),
            Some(encoded) if encoded.is_empty() => Ok(None),
            Some(encoded) => {
                let json = BASE64.decode(encoded)?;
                Ok(Some(serde_json::from_slice(&json)?))
            }
        }
    }
}

/// Envelope of the per-KAO encrypted metadata
///
/// `ciphertext` is `base64(nonce || ct || tag)`; `iv` repeats the nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMetadata {
    pub ciphertext: String,
    pub iv: String,
}

impl EncryptedMetadata {
    /// `base64(JSON(self))`, the form stored in the key access object
    pub fn to_base64(&self) -> Result<String, ProtocolError> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }
}

/// Encryption method configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMethod {
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iv: String,
    #[serde(rename = "isStreamable")]
    pub is_streamable: bool,
}

impl Default for EncryptionMethod {
    fn default() -> Self {
        Self {
            algorithm: "AES-256-GCM".to_string(),
            iv: String::new(),
            is_streamable: true,
        }
    }
}

/// Integrity information including segments and root signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityInformation {
    #[serde(rename = "rootSignature")]
    pub root_signature: RootSignature,
    #[serde(rename = "segmentHashAlg")]
    pub segment_hash_alg: IntegrityAlgorithm,
    #[serde(rename = "segmentSizeDefault")]
    pub segment_size_default: i64,
    #[serde(rename = "encryptedSegmentSizeDefault")]
    pub encrypted_segment_size_default: i64,
    pub segments: Vec<Segment>,
}

/// Root signature for integrity verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSignature {
    pub alg: IntegrityAlgorithm,
    pub sig: String,
}

/// One encrypted segment of the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub hash: String,
    #[serde(rename = "segmentSize", default)]
    pub segment_size: i64,
    #[serde(rename = "encryptedSegmentSize", default)]
    pub encrypted_segment_size: i64,
}

impl IntegrityInformation {
    /// Encrypted size of segment `index`, falling back to the default
    pub fn encrypted_size_of(&self, index: usize) -> Option<i64> {
        self.segments.get(index).map(|seg| {
            if seg.encrypted_segment_size > 0 {
                seg.encrypted_segment_size
            } else {
                self.encrypted_segment_size_default
            }
        })
    }

    /// Plaintext size of segment `index`, falling back to the default
    pub fn plaintext_size_of(&self, index: usize) -> Option<i64> {
        self.segments.get(index).map(|seg| {
            if seg.encrypted_segment_size > 0 {
                seg.segment_size
            } else {
                self.segment_size_default
            }
        })
    }
}

impl TdfManifest {
    /// True when the manifest predates `schemaVersion` (hex signatures)
    pub fn is_legacy(&self) -> bool {
        self.schema_version
            .as_deref()
            .map(str::is_empty)
            .unwrap_or(true)
    }

    /// Decoded policy JSON text
    pub fn policy_json(&self) -> Result<String, ProtocolError> {
        let bytes = BASE64.decode(&self.encryption_information.policy)?;
        String::from_utf8(bytes).map_err(|e| ProtocolError::InvalidPolicy(e.to_string()))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
