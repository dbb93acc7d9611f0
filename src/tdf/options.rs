//! Writer, finalize and reader configuration

use super::assertion::{AssertionConfig, AssertionVerificationKeys};
use crate::kas::{ClientKeyPair, SessionKeyType};
use crate::keysplit::{AttributeValue, KasGrant};
use crate::zipstream::Zip64Mode;
use opentdf_crypto::{OsRandom, RandomSource};
use opentdf_protocol::IntegrityAlgorithm;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Plaintext bytes per segment used by the one-shot API
pub const DEFAULT_SEGMENT_SIZE: usize = 2 * 1024 * 1024; // 2MB

/// Configuration fixed when a [`TdfWriter`](super::TdfWriter) is created
#[derive(Clone)]
pub struct WriterConfig {
    /// Root signature algorithm
    pub integrity_algorithm: IntegrityAlgorithm,
    pub segment_integrity_algorithm: IntegrityAlgorithm,
    pub attributes: Vec<AttributeValue>,
    pub default_kas: Vec<KasGrant>,
    pub zip64: Zip64Mode,
    pub rng: Arc<dyn RandomSource>,
    /// Hex-encoded signatures and no `schemaVersion`, for readers that
    /// predate TDF 4.3
    pub legacy: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            integrity_algorithm: IntegrityAlgorithm::Hs256,
            segment_integrity_algorithm: IntegrityAlgorithm::Hs256,
            attributes: Vec::new(),
            default_kas: Vec::new(),
            zip64: Zip64Mode::Auto,
            rng: Arc::new(OsRandom),
            legacy: false,
        }
    }
}

impl fmt::Debug for WriterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterConfig")
            .field("integrity_algorithm", &self.integrity_algorithm)
            .field("segment_integrity_algorithm", &self.segment_integrity_algorithm)
            .field("attributes", &self.attributes.len())
            .field("default_kas", &self.default_kas)
            .field("zip64", &self.zip64)
            .field("legacy", &self.legacy)
            .finish_non_exhaustive()
    }
}

impl WriterConfig {
    #[must_use]
    pub fn integrity_algorithm(mut self, alg: IntegrityAlgorithm) -> Self {
        self.integrity_algorithm = alg;
        self
    }

    #[must_use]
    pub fn segment_integrity_algorithm(mut self, alg: IntegrityAlgorithm) -> Self {
        self.segment_integrity_algorithm = alg;
        self
    }

    #[must_use]
    pub fn attribute(mut self, value: AttributeValue) -> Self {
        self.attributes.push(value);
        self
    }

    #[must_use]
    pub fn attributes(mut self, values: Vec<AttributeValue>) -> Self {
        self.attributes = values;
        self
    }

    /// Add a KAS used when no attribute carries a grant
    #[must_use]
    pub fn default_kas(mut self, grant: KasGrant) -> Self {
        self.default_kas.push(grant);
        self
    }

    #[must_use]
    pub fn zip64(mut self, mode: Zip64Mode) -> Self {
        self.zip64 = mode;
        self
    }

    #[must_use]
    pub fn rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    #[must_use]
    pub fn legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }
}

/// Per-finalize settings
///
/// `attributes` and `default_kas` replace the writer's values when set.
#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    pub attributes: Option<Vec<AttributeValue>>,
    pub default_kas: Option<Vec<KasGrant>>,
    pub mime_type: Option<String>,
    /// Sealed per key access object with its split key
    pub encrypted_metadata: Option<Vec<u8>>,
    pub assertions: Vec<AssertionConfig>,
    pub dissem: Vec<String>,
}

impl FinalizeOptions {
    #[must_use]
    pub fn attributes(mut self, values: Vec<AttributeValue>) -> Self {
        self.attributes = Some(values);
        self
    }

    #[must_use]
    pub fn default_kas(mut self, grants: Vec<KasGrant>) -> Self {
        self.default_kas = Some(grants);
        self
    }

    #[must_use]
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn encrypted_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.encrypted_metadata = Some(metadata.into());
        self
    }

    #[must_use]
    pub fn assertion(mut self, assertion: AssertionConfig) -> Self {
        self.assertions.push(assertion);
        self
    }

    #[must_use]
    pub fn dissem(mut self, dissem: Vec<String>) -> Self {
        self.dissem = dissem;
        self
    }
}

/// Configuration for a [`TdfReader`](super::TdfReader)
#[derive(Clone)]
pub struct ReaderConfig {
    pub verification_keys: AssertionVerificationKeys,
    pub disable_assertion_verification: bool,
    /// Session key sent to KAS; generated per unwrap when unset
    pub session_key: Option<ClientKeyPair>,
    pub session_key_type: SessionKeyType,
    pub rng: Arc<dyn RandomSource>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            verification_keys: AssertionVerificationKeys::default(),
            disable_assertion_verification: false,
            session_key: None,
            session_key_type: SessionKeyType::default(),
            rng: Arc::new(OsRandom),
        }
    }
}

impl fmt::Debug for ReaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderConfig")
            .field("verification_keys", &self.verification_keys)
            .field("disable_assertion_verification", &self.disable_assertion_verification)
            .field("session_key", &self.session_key.is_some())
            .field("session_key_type", &self.session_key_type)
            .finish_non_exhaustive()
    }
}

impl ReaderConfig {
    #[must_use]
    pub fn verification_keys(mut self, keys: AssertionVerificationKeys) -> Self {
        self.verification_keys = keys;
        self
    }

    #[must_use]
    pub fn disable_assertion_verification(mut self, disable: bool) -> Self {
        self.disable_assertion_verification = disable;
        self
    }

    #[must_use]
    pub fn session_key(mut self, key: ClientKeyPair) -> Self {
        self.session_key = Some(key);
        self
    }

    #[must_use]
    pub fn session_key_type(mut self, key_type: SessionKeyType) -> Self {
        self.session_key_type = key_type;
        self
    }

    #[must_use]
    pub fn rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }
}
