//! Zeroizing key material
//!
//! Fixed-size wrappers that clear their bytes on drop. The DEK and every
//! key split travel through the TDF layers in these types.

use crate::rng::RandomSource;
use zeroize::{Zeroize, ZeroizeOnDrop};

macro_rules! fixed_secret {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
        pub struct $name(pub(crate) [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            /// Copy from a slice of exactly `LEN` bytes
            pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
                if bytes.len() != $len {
                    return Err(KeyError::InvalidLength {
                        expected: $len,
                        got: bytes.len(),
                    });
                }
                let mut key = [0u8; $len];
                key.copy_from_slice(bytes);
                Ok($name(key))
            }

            pub fn as_slice(&self) -> &[u8] {
                &self.0
            }

            pub fn as_mut_slice(&mut self) -> &mut [u8] {
                &mut self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "([REDACTED; {}])"), $len)
            }
        }
    };
}

fixed_secret!(
    /// Data encryption key (AES-256)
    PayloadKey,
    32
);

fixed_secret!(
    /// One XOR share of a payload key
    SplitKey,
    32
);

fixed_secret!(
    /// 96-bit GCM nonce
    Nonce96,
    12
);

impl Default for Nonce96 {
    fn default() -> Self {
        Nonce96([0u8; 12])
    }
}

impl PayloadKey {
    /// Fresh random DEK
    pub fn generate(rng: &dyn RandomSource) -> Self {
        let mut key = [0u8; 32];
        rng.fill(&mut key);
        PayloadKey(key)
    }
}

impl SplitKey {
    /// Fresh random share
    pub fn random(rng: &dyn RandomSource) -> Self {
        let mut share = [0u8; 32];
        rng.fill(&mut share);
        SplitKey(share)
    }

    /// XOR `other` into this share in place
    pub fn xor_in(&mut self, other: &[u8]) -> Result<(), KeyError> {
        if other.len() != Self::LEN {
            return Err(KeyError::InvalidLength {
                expected: Self::LEN,
                got: other.len(),
            });
        }
        for (a, b) in self.0.iter_mut().zip(other) {
            *a ^= b;
        }
        Ok(())
    }
}

impl From<&PayloadKey> for SplitKey {
    fn from(key: &PayloadKey) -> Self {
        SplitKey(key.0)
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Key generation failed")]
    GenerationFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_checked() {
        assert!(PayloadKey::from_slice(&[0u8; 32]).is_ok());
        assert_eq!(
            PayloadKey::from_slice(&[0u8; 31]).unwrap_err(),
            KeyError::InvalidLength {
                expected: 32,
                got: 31
            }
        );
        assert!(Nonce96::from_slice(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let key = PayloadKey::from_slice(&[0xAB; 32]).unwrap();
        let shown = format!("{:?}", key);
        assert!(shown.contains("REDACTED"));
        assert!(!shown.to_lowercase().contains("ab, ab"));
    }

    #[test]
    fn test_xor_in() {
        let mut share = SplitKey::from_slice(&[0b1010; 32]).unwrap();
        share.xor_in(&[0b0110; 32]).unwrap();
        assert_eq!(share.as_slice(), &[0b1100; 32]);
        assert!(share.xor_in(&[0; 4]).is_err());
    }
}
