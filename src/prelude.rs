//! OpenTDF Prelude
//!
//! Commonly used types for writing and reading TDFs.
//!
//! # Example
//!
//! ```rust
//! use opentdf_core::prelude::*;
//!
//! let config = WriterConfig::default()
//!     .default_kas(KasGrant::new("https://kas.example.com"))
//!     .zip64(Zip64Mode::Auto);
//! assert_eq!(config.default_kas.len(), 1);
//! ```

pub use crate::error::{IntegrityTarget, TdfError};
pub use crate::fqn::AttributeFqn;
pub use crate::keysplit::{AttributeRule, AttributeValue, KasGrant, KasPublicKey, SplitError, Splitter};
pub use crate::tdf::{
    AssertionConfig, AssertionVerificationKeys, FinalizeOptions, ReaderConfig, SegmentLocator, Tdf,
    TdfReader, TdfWriter, WriterConfig,
};
pub use crate::zipstream::{ArchiveError, Zip64Mode};

pub use crate::auth::{ClientCredentials, DpopKey, TokenSource, TokenSourceConfig};
pub use crate::kas::{
    ClientKeyPair, HttpRewrapTransport, RewrapError, RewrapRequest, RewrapResult, RewrapTransport,
    SessionKeyType,
};

// Re-export protocol types
pub use opentdf_protocol::{
    IntegrityAlgorithm, KeyAccess, KeyAlgorithm, Policy, Segment, TdfManifest,
};

// Re-export crypto types
pub use opentdf_crypto::{OsRandom, PayloadKey, RandomSource, SeededRandom};
