//! OpenTDF Protocol Types
//!
//! Data structures for the TDF container and the KAS rewrap protocol:
//! - TDF manifest structures, policy and assertions
//! - Closed algorithm identifier sets
//! - KAS (Key Access Service) request/response types
//!
//! This crate contains NO cryptographic operations and NO I/O.

use thiserror::Error;

pub mod algorithm;
pub mod assertion;
pub mod kas;
pub mod manifest;
pub mod policy;

pub use algorithm::{IntegrityAlgorithm, KasKeyType, KeyAccessType, KeyAlgorithm};
pub use assertion::{AppliesToState, Assertion, AssertionScope, AssertionType, Binding, Statement};
pub use kas::{
    KasPolicyBinding, KeyAccessObject, KeyAccessObjectWrapper, KeyAccessRewrapResult,
    Policy as KasPolicy, PolicyRequest, PolicyRewrapResult, RewrapResponse, SignedRewrapRequest,
    UnsignedRewrapRequest,
};
pub use manifest::{
    EncryptedMetadata, EncryptionInformation, EncryptionMethod, IntegrityInformation, KeyAccess,
    Payload, PolicyBinding, RootSignature, Segment, TdfManifest, KEY_ACCESS_SCHEMA_VERSION,
    MANIFEST_ENTRY, PAYLOAD_ENTRY, TDF_SPEC_VERSION,
};
pub use policy::{AttributeObject, Policy, PolicyBody};

/// Errors raised while parsing protocol data
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown key algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Unknown KAS key type: {0}")]
    UnknownKeyType(String),

    #[error("Unknown key access type: {0}")]
    UnknownKeyAccessType(String),

    #[error("Unknown integrity algorithm: {0}")]
    UnknownIntegrityAlgorithm(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
