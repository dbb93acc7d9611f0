//! Unified error type for the TDF core
//!
//! Lower layers keep their own error enums for precise handling; this type
//! wraps them for callers of the writer, reader and rewrap flow.

use std::fmt;
use thiserror::Error;

/// What failed an integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityTarget {
    Segment(usize),
    RootSignature,
    Assertion(String),
}

impl fmt::Display for IntegrityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityTarget::Segment(index) => write!(f, "segment {}", index),
            IntegrityTarget::RootSignature => f.write_str("root signature"),
            IntegrityTarget::Assertion(id) => write!(f, "assertion '{}'", id),
        }
    }
}

/// Unified error type for TDF operations
///
/// # Error Categories
///
/// - **Crypto / Kem / Hmac / Key**: primitive failures from `opentdf-crypto`
/// - **Archive**: ZIP assembly or parsing
/// - **Split**: key-split planning
/// - **Auth / Rewrap**: token acquisition and KAS communication
/// - **IntegrityFailure / PolicyHmacMismatch**: tampered or mismatched TDFs
#[derive(Debug, Error)]
pub enum TdfError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] opentdf_crypto::EncryptionError),

    #[error("Key wrapping error: {0}")]
    Kem(#[from] opentdf_crypto::KemError),

    #[error("HMAC error: {0}")]
    Hmac(#[from] opentdf_crypto::HmacError),

    #[error("Key error: {0}")]
    Key(#[from] opentdf_crypto::KeyError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] opentdf_protocol::ProtocolError),

    #[error("Archive error: {0}")]
    Archive(#[from] crate::zipstream::ArchiveError),

    #[error("Key split error: {0}")]
    Split(#[from] crate::keysplit::SplitError),

    #[error("Segment lookup error: {0}")]
    Locator(#[from] crate::tdf::LocatorError),

    #[error("JWS error: {0}")]
    Jws(#[from] crate::auth::JwsError),

    #[error("Authentication error: {0}")]
    Auth(#[from] crate::auth::AuthError),

    #[error("Rewrap error: {0}")]
    Rewrap(#[from] crate::kas::RewrapError),

    #[error("Attribute FQN error: {0}")]
    Fqn(#[from] crate::fqn::FqnError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Integrity check failed for {target}")]
    IntegrityFailure { target: IntegrityTarget },

    #[error("Policy binding mismatch for KAS {kas_url}")]
    PolicyHmacMismatch { kas_url: String },

    #[error("Rewrap failed at {kas_url}: {reason}")]
    RewrapFailed { kas_url: String, reason: String },

    #[error("Operation canceled")]
    Canceled,

    #[error("Payload key has not been unwrapped")]
    KeyNotUnwrapped,

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Missing required field: {field}")]
    MissingRequiredField { field: &'static str },
}

impl TdfError {
    /// Returns true if retrying the operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rewrap(e) => e.is_retryable(),
            Self::Auth(e) => e.is_retryable(),
            Self::Archive(e) => e.is_retryable(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Rewrap(e) => e.suggestion(),
            Self::Auth(e) => e.suggestion(),
            Self::Archive(e) => e.suggestion(),
            Self::Split(crate::keysplit::SplitError::NoDefaultKas) => {
                Some("Configure a default KAS or grant a KAS on at least one attribute value")
            }
            Self::KeyNotUnwrapped => Some("Call unwrap_key before reading the payload"),
            Self::PolicyHmacMismatch { .. } => {
                Some("The policy was modified after encryption or the KAS returned the wrong key")
            }
            Self::IntegrityFailure { .. } => Some("The TDF was modified or corrupted; do not trust its content"),
            _ => None,
        }
    }

    /// Stable error code
    ///
    /// Error codes follow the format: `OPENTDF_E_<CATEGORY>_<SPECIFIC>`
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Crypto(_) => "OPENTDF_E_CRYPTO",
            Self::Kem(_) => "OPENTDF_E_CRYPTO_KEM",
            Self::Hmac(_) => "OPENTDF_E_CRYPTO_HMAC",
            Self::Key(_) => "OPENTDF_E_CRYPTO_KEY",
            Self::Protocol(_) => "OPENTDF_E_PROTOCOL",
            Self::Archive(_) => "OPENTDF_E_ARCHIVE",
            Self::Split(_) => "OPENTDF_E_SPLIT",
            Self::Locator(_) => "OPENTDF_E_SEGMENT_LOOKUP",
            Self::Jws(_) => "OPENTDF_E_JWS",
            Self::Auth(_) => "OPENTDF_E_AUTH",
            Self::Rewrap(_) => "OPENTDF_E_KAS_REWRAP",
            Self::Fqn(_) => "OPENTDF_E_FQN",
            Self::Json(_) => "OPENTDF_E_JSON",
            Self::Io(_) => "OPENTDF_E_IO",
            Self::IntegrityFailure { .. } => "OPENTDF_E_INTEGRITY",
            Self::PolicyHmacMismatch { .. } => "OPENTDF_E_POLICY_BINDING",
            Self::RewrapFailed { .. } => "OPENTDF_E_KAS_REWRAP_FAILED",
            Self::Canceled => "OPENTDF_E_CANCELED",
            Self::KeyNotUnwrapped => "OPENTDF_E_KEY_NOT_UNWRAPPED",
            Self::InvalidManifest(_) => "OPENTDF_E_MANIFEST_INVALID",
            Self::UnsupportedAlgorithm(_) => "OPENTDF_E_ALGORITHM_UNSUPPORTED",
            Self::MissingRequiredField { .. } => "OPENTDF_E_FIELD_REQUIRED",
        }
    }

    /// Returns true for tampering: segment, root signature, assertion or policy binding
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityFailure { .. } | Self::PolicyHmacMismatch { .. }
        )
    }

    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::Crypto(_) | Self::Kem(_) | Self::Hmac(_) | Self::Key(_)
        )
    }

    pub fn is_kas_error(&self) -> bool {
        matches!(
            self,
            Self::Rewrap(_) | Self::RewrapFailed { .. } | Self::Auth(_)
        )
    }
}
