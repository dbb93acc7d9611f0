//! TDF writer and reader
//!
//! [`TdfWriter`] seals plaintext segments as they arrive and produces the
//! archive in pieces; [`TdfReader`] rewraps the key through a KAS, verifies
//! integrity and decrypts any segment or byte range. [`Tdf`] wraps both for
//! in-memory payloads.

mod assertion;
mod builder;
mod integrity;
mod locator;
mod options;
mod reader;
mod writer;

pub use assertion::{assertion_hash, AssertionConfig, AssertionVerificationKeys, BINDING_METHOD_JWS};
pub use builder::{Tdf, TdfDecryptBuilder, TdfEncryptBuilder};
pub use integrity::{aggregate_hash, calculate_signature, root_signature, verify_root_signature, verify_segment};
pub use locator::{LocatorError, SegmentLocator, SegmentSpan};
pub use options::{FinalizeOptions, ReaderConfig, WriterConfig, DEFAULT_MIME_TYPE, DEFAULT_SEGMENT_SIZE};
pub use reader::{Segments, TdfReader};
pub use writer::{FinalizeResult, SegmentResult, TdfWriter};
