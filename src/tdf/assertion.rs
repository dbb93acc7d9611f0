//! Assertion signing and verification
//!
//! An assertion is bound to its TDF by a compact JWS whose claims are
//! `assertionHash` (hex SHA-256 of the assertion's canonical JSON) and
//! `assertionSig` = `base64(aggregate hash || assertion hash)`. The assertion
//! hash enters `assertionSig` as raw bytes, or as its hex text in legacy
//! TDFs; readers accept the hex text for either.

use crate::auth::jws::{self, JwsSigningKey, JwsVerifyingKey};
use crate::error::{IntegrityTarget, TdfError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use opentdf_crypto::{constant_time_eq, hex_decode, hex_encode, sha256};
use opentdf_protocol::{
    AppliesToState, Assertion, AssertionScope, AssertionType, Binding, Statement,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

/// Binding method written into every signed assertion
pub const BINDING_METHOD_JWS: &str = "jws";

/// An assertion to attach at finalize
#[derive(Debug, Clone)]
pub struct AssertionConfig {
    pub id: String,
    pub assertion_type: AssertionType,
    pub scope: AssertionScope,
    pub applies_to_state: Option<AppliesToState>,
    pub statement: Statement,
    /// Signs with the payload key (HS256) when unset
    pub signing_key: Option<JwsSigningKey>,
}

impl AssertionConfig {
    pub fn new(id: impl Into<String>, assertion_type: AssertionType, statement: Statement) -> Self {
        AssertionConfig {
            id: id.into(),
            assertion_type,
            scope: AssertionScope::Payload,
            applies_to_state: Some(AppliesToState::Unencrypted),
            statement,
            signing_key: None,
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: AssertionScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn with_applies_to_state(mut self, state: AppliesToState) -> Self {
        self.applies_to_state = Some(state);
        self
    }

    #[must_use]
    pub fn with_signing_key(mut self, key: JwsSigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    fn unsigned(&self) -> Assertion {
        Assertion {
            id: self.id.clone(),
            assertion_type: self.assertion_type,
            scope: self.scope,
            applies_to_state: self.applies_to_state,
            statement: self.statement.clone(),
            binding: Binding::default(),
        }
    }
}

/// Keys for checking assertion bindings on read
///
/// Lookup is by assertion id, then the default key; with neither the
/// payload key is used (HS256).
#[derive(Debug, Clone, Default)]
pub struct AssertionVerificationKeys {
    pub default_key: Option<JwsVerifyingKey>,
    pub keys: HashMap<String, JwsVerifyingKey>,
}

impl AssertionVerificationKeys {
    #[must_use]
    pub fn with_default_key(mut self, key: JwsVerifyingKey) -> Self {
        self.default_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_key(mut self, assertion_id: impl Into<String>, key: JwsVerifyingKey) -> Self {
        self.keys.insert(assertion_id.into(), key);
        self
    }

    pub fn get(&self, assertion_id: &str) -> Option<&JwsVerifyingKey> {
        self.keys.get(assertion_id).or(self.default_key.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.default_key.is_none() && self.keys.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BindingClaims {
    #[serde(rename = "assertionHash")]
    assertion_hash: String,
    #[serde(rename = "assertionSig")]
    assertion_sig: String,
}

/// Hex SHA-256 of the assertion's canonical JSON, binding excluded
pub fn assertion_hash(assertion: &Assertion) -> Result<String, TdfError> {
    let canonical = assertion.canonical_json()?;
    Ok(hex_encode(&sha256(canonical.as_bytes())))
}

/// `base64(aggregate || hash)`, with the hash as hex text when `hex_form`
fn binding_signature(aggregate: &[u8], hash_hex: &str, hex_form: bool) -> Result<String, TdfError> {
    let mut combined = aggregate.to_vec();
    if hex_form {
        combined.extend_from_slice(hash_hex.as_bytes());
    } else {
        combined.extend(
            hex_decode(hash_hex).map_err(|e| TdfError::InvalidManifest(format!("assertion hash: {}", e)))?,
        );
    }
    Ok(BASE64.encode(combined))
}

/// Build and sign one assertion against the payload's aggregate hash
pub(crate) fn sign_assertion(
    config: &AssertionConfig,
    payload_key: &[u8],
    aggregate_hash: &[u8],
    legacy: bool,
) -> Result<Assertion, TdfError> {
    let mut assertion = config.unsigned();
    let hash = assertion_hash(&assertion)?;
    let claims = BindingClaims {
        assertion_sig: binding_signature(aggregate_hash, &hash, legacy)?,
        assertion_hash: hash,
    };
    let key = match &config.signing_key {
        Some(key) => key.clone(),
        None => JwsSigningKey::hmac(payload_key),
    };

    assertion.binding = Binding {
        method: BINDING_METHOD_JWS.to_string(),
        signature: jws::sign(&key, json!({"typ": "JWT"}), &claims)?,
    };
    Ok(assertion)
}

/// Inputs shared by every assertion check of one manifest
pub(crate) struct AssertionContext<'a> {
    pub payload_key: &'a [u8],
    pub aggregate_hash: &'a [u8],
    pub legacy: bool,
    pub keys: &'a AssertionVerificationKeys,
}

/// Verify one assertion binding
pub(crate) fn verify_assertion(assertion: &Assertion, ctx: &AssertionContext<'_>) -> Result<(), TdfError> {
    let fail = |reason: String| {
        tracing::warn!(assertion_id = %assertion.id, %reason, "Assertion verification failed");
        TdfError::IntegrityFailure {
            target: IntegrityTarget::Assertion(assertion.id.clone()),
        }
    };

    if assertion.binding.signature.is_empty() {
        return Err(fail("assertion is not signed".to_string()));
    }

    let key = match ctx.keys.get(&assertion.id) {
        Some(key) => key.clone(),
        None => JwsVerifyingKey::hmac(ctx.payload_key),
    };
    let claims: BindingClaims =
        jws::verify(&assertion.binding.signature, &key).map_err(|e| fail(e.to_string()))?;

    let hash = assertion_hash(assertion)?;
    if !constant_time_eq(hash.as_bytes(), claims.assertion_hash.as_bytes()) {
        return Err(fail("assertion hash does not match its content".to_string()));
    }

    let expected = binding_signature(ctx.aggregate_hash, &hash, ctx.legacy)?;
    let hex_form = binding_signature(ctx.aggregate_hash, &hash, true)?;
    let sig = claims.assertion_sig.as_bytes();
    if constant_time_eq(expected.as_bytes(), sig) || constant_time_eq(hex_form.as_bytes(), sig) {
        Ok(())
    } else {
        Err(fail("assertion is bound to a different payload".to_string()))
    }
}
