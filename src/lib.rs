//! OpenTDF core: write and read Trusted Data Format archives
//!
//! - [`tdf`]: streaming writer, random-access reader and a one-shot API
//! - [`keysplit`]: attribute-driven XOR splitting of the payload key
//! - [`zipstream`]: out-of-order segmented ZIP container
//! - [`kas`]: rewrap transport and client session keys
//! - [`auth`]: OAuth client credentials with DPoP
//!
//! Cryptographic primitives live in [`opentdf_crypto`] and manifest and wire
//! types in [`opentdf_protocol`]; both are re-exported.

pub mod auth;
pub mod error;
pub mod fqn;
pub mod kas;
pub mod keysplit;
pub mod prelude;
pub mod tdf;
pub mod zipstream;

pub use error::{IntegrityTarget, TdfError};
pub use tdf::{Tdf, TdfReader, TdfWriter};

pub use opentdf_crypto;
pub use opentdf_protocol;
