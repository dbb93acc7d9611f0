//! Client authentication for KAS requests
//!
//! - [`jws`]: compact JWS signing shared by every token this crate produces
//! - [`dpop`]: DPoP proof-of-possession keys and proofs (RFC 9449)
//! - [`oauth`]: client-credentials token acquisition with a cached token

pub mod dpop;
pub mod jws;
pub mod oauth;

pub use dpop::DpopKey;
pub use jws::{JwsAlgorithm, JwsError, JwsSigningKey, JwsVerifyingKey};
pub use oauth::{ClientAuth, ClientCredentials, Token, TokenSource, TokenSourceConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token request failed with status {status}: {body}")]
    TokenAcquisitionFailed { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid token endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Token request canceled")]
    Canceled,
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Http(e) => e.is_timeout() || e.is_connect(),
            AuthError::TokenAcquisitionFailed { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            AuthError::TokenAcquisitionFailed { status: 401, .. } => {
                Some("Check the client id and client secret or assertion key")
            }
            AuthError::TokenAcquisitionFailed { status: 400, .. } => {
                Some("Check the requested scopes and that the IdP accepts DPoP-bound tokens")
            }
            AuthError::InvalidEndpoint(_) => Some("Use an absolute http(s) token endpoint URL"),
            _ => None,
        }
    }
}
