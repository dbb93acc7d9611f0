//! KAS (Key Access Service) v2 rewrap wire types
//!
//! The rewrap request is a JWT whose `requestBody` claim is the JSON of
//! [`UnsignedRewrapRequest`]; the response lists per-KAO results.

use serde::{Deserialize, Serialize};

use crate::algorithm::KeyAccessType;
use crate::manifest::{KeyAccess, PolicyBinding};

/// Unsigned rewrap request structure (before JWT signing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedRewrapRequest {
    #[serde(rename = "clientPublicKey")]
    pub client_public_key: String,
    pub requests: Vec<PolicyRequest>,
}

/// Individual policy request entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    pub policy: Policy,
    #[serde(rename = "keyAccessObjects")]
    pub key_access_objects: Vec<KeyAccessObjectWrapper>,
}

/// Policy structure for KAS requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    /// Base64-encoded policy JSON, exactly as in the manifest
    pub body: String,
}

/// Key access object wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAccessObjectWrapper {
    #[serde(rename = "keyAccessObjectId")]
    pub key_access_object_id: String,
    #[serde(rename = "keyAccessObject")]
    pub key_access_object: KeyAccessObject,
}

/// Key access object as sent to KAS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAccessObject {
    #[serde(rename = "type")]
    pub key_type: KeyAccessType,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "wrappedKey")]
    pub wrapped_key: String,
    #[serde(rename = "policyBinding")]
    pub policy_binding: KasPolicyBinding,
    #[serde(rename = "encryptedMetadata", default, skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    pub split_id: Option<String>,
    /// Ephemeral public key for EC-wrapped keys (PEM format)
    #[serde(rename = "ephemeralPublicKey", default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_public_key: Option<String>,
}

impl KeyAccessObject {
    /// Key type string for the `algorithm` member of the policy request
    pub fn detect_algorithm(&self) -> &'static str {
        match self.key_type {
            KeyAccessType::EcWrapped => "ec:secp256r1",
            KeyAccessType::Wrapped => "rsa:2048",
        }
    }

    pub fn is_ec_wrapped(&self) -> bool {
        self.key_type == KeyAccessType::EcWrapped
    }
}

/// Policy binding for KAS requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KasPolicyBinding {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

/// Signed rewrap request wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRewrapRequest {
    #[serde(rename = "signedRequestToken")]
    pub signed_request_token: String,
}

/// Rewrap response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewrapResponse {
    #[serde(default)]
    pub responses: Vec<PolicyRewrapResult>,
    #[serde(rename = "sessionPublicKey", default, skip_serializing_if = "Option::is_none")]
    pub session_public_key: Option<String>,
}

/// Policy rewrap result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRewrapResult {
    #[serde(rename = "policyId")]
    pub policy_id: String,
    #[serde(default)]
    pub results: Vec<KeyAccessRewrapResult>,
}

/// Individual key access rewrap result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAccessRewrapResult {
    #[serde(rename = "keyAccessObjectId")]
    pub key_access_object_id: String,
    pub status: String,
    #[serde(rename = "kasWrappedKey", default, skip_serializing_if = "Option::is_none")]
    pub kas_wrapped_key: Option<String>,
    /// Pre-v2 name of `kasWrappedKey`
    #[serde(rename = "entityWrappedKey", default, skip_serializing_if = "Option::is_none")]
    pub entity_wrapped_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KeyAccessRewrapResult {
    pub fn is_permit(&self) -> bool {
        self.status == "permit"
    }

    pub fn wrapped_key(&self) -> Option<&str> {
        self.kas_wrapped_key
            .as_deref()
            .or(self.entity_wrapped_key.as_deref())
    }
}

impl From<PolicyBinding> for KasPolicyBinding {
    fn from(pb: PolicyBinding) -> Self {
        Self {
            hash: pb.hash,
            algorithm: Some(pb.alg),
        }
    }
}

impl From<&KeyAccess> for KeyAccessObject {
    fn from(ka: &KeyAccess) -> Self {
        Self {
            key_type: ka.access_type,
            url: ka.url.clone(),
            protocol: ka.protocol.clone(),
            wrapped_key: ka.wrapped_key.clone(),
            policy_binding: ka.policy_binding.clone().into(),
            encrypted_metadata: ka.encrypted_metadata.clone(),
            kid: ka.kid.clone(),
            split_id: ka.split_id.clone(),
            ephemeral_public_key: ka.ephemeral_public_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kao_from_manifest_entry() {
        let mut ka = KeyAccess::new("https://kas.example.com");
        ka.access_type = KeyAccessType::EcWrapped;
        ka.split_id = Some("split-1".to_string());
        ka.ephemeral_public_key = Some("-----BEGIN PUBLIC KEY-----".to_string());

        let kao = KeyAccessObject::from(&ka);
        assert!(kao.is_ec_wrapped());
        assert_eq!(kao.detect_algorithm(), "ec:secp256r1");

        let json = serde_json::to_value(&kao).unwrap();
        assert_eq!(json["type"], "eccWrapped");
        assert_eq!(json["sid"], "split-1");
        assert_eq!(json["policyBinding"]["algorithm"], "HS256");
    }

    #[test]
    fn test_response_with_legacy_field() {
        let body = r#"{
            "responses":[{"policyId":"policy","results":[
                {"keyAccessObjectId":"kao-0","status":"permit","entityWrappedKey":"AAAA"},
                {"keyAccessObjectId":"kao-1","status":"fail","error":"forbidden"}
            ]}]
        }"#;
        let response: RewrapResponse = serde_json::from_str(body).unwrap();
        assert!(response.session_public_key.is_none());
        let results = &response.responses[0].results;
        assert!(results[0].is_permit());
        assert_eq!(results[0].wrapped_key(), Some("AAAA"));
        assert!(!results[1].is_permit());
        assert_eq!(results[1].wrapped_key(), None);
    }
}
