//! Closed sets of algorithm identifiers
//!
//! Strings from manifests, KAS key listings and configuration are parsed
//! into these enums at the edge; the rest of the code matches on variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// Key wrapping algorithm advertised by a KAS key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "RSA-OAEP", alias = "wrapped")]
    RsaOaep,
    #[serde(rename = "RSA-OAEP-256")]
    RsaOaep256,
    #[serde(rename = "ECDH-HKDF", alias = "ec-wrapped")]
    EcdhHkdf,
    #[serde(rename = "ML-KEM-768")]
    MlKem768,
    #[serde(rename = "ML-KEM-1024")]
    MlKem1024,
    #[serde(rename = "X-ECDH-ML-KEM-768")]
    XEcdhMlKem768,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::RsaOaep => "RSA-OAEP",
            KeyAlgorithm::RsaOaep256 => "RSA-OAEP-256",
            KeyAlgorithm::EcdhHkdf => "ECDH-HKDF",
            KeyAlgorithm::MlKem768 => "ML-KEM-768",
            KeyAlgorithm::MlKem1024 => "ML-KEM-1024",
            KeyAlgorithm::XEcdhMlKem768 => "X-ECDH-ML-KEM-768",
        }
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, KeyAlgorithm::RsaOaep | KeyAlgorithm::RsaOaep256)
    }

    pub fn is_ec(&self) -> bool {
        matches!(self, KeyAlgorithm::EcdhHkdf)
    }

    /// Key access object type produced when wrapping with this algorithm
    pub fn key_access_type(&self) -> KeyAccessType {
        if self.is_ec() {
            KeyAccessType::EcWrapped
        } else {
            KeyAccessType::Wrapped
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RSA-OAEP" | "wrapped" => Ok(KeyAlgorithm::RsaOaep),
            "RSA-OAEP-256" => Ok(KeyAlgorithm::RsaOaep256),
            "ECDH-HKDF" | "ec-wrapped" => Ok(KeyAlgorithm::EcdhHkdf),
            "ML-KEM-768" => Ok(KeyAlgorithm::MlKem768),
            "ML-KEM-1024" => Ok(KeyAlgorithm::MlKem1024),
            "X-ECDH-ML-KEM-768" => Ok(KeyAlgorithm::XEcdhMlKem768),
            other => match other.parse::<KasKeyType>() {
                Ok(key_type) => Ok(key_type.algorithm()),
                Err(_) => Err(ProtocolError::UnknownAlgorithm(other.to_string())),
            },
        }
    }
}

/// Key type labels used in KAS key listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KasKeyType {
    Rsa2048,
    Rsa4096,
    EcSecp256r1,
    EcSecp384r1,
    EcSecp521r1,
}

impl KasKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KasKeyType::Rsa2048 => "rsa:2048",
            KasKeyType::Rsa4096 => "rsa:4096",
            KasKeyType::EcSecp256r1 => "ec:secp256r1",
            KasKeyType::EcSecp384r1 => "ec:secp384r1",
            KasKeyType::EcSecp521r1 => "ec:secp521r1",
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KasKeyType::Rsa2048 | KasKeyType::Rsa4096 => KeyAlgorithm::RsaOaep,
            _ => KeyAlgorithm::EcdhHkdf,
        }
    }

    /// Curve name for EC key types
    pub fn curve_name(&self) -> Option<&'static str> {
        match self {
            KasKeyType::EcSecp256r1 => Some("secp256r1"),
            KasKeyType::EcSecp384r1 => Some("secp384r1"),
            KasKeyType::EcSecp521r1 => Some("secp521r1"),
            _ => None,
        }
    }
}

impl fmt::Display for KasKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KasKeyType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa:2048" => Ok(KasKeyType::Rsa2048),
            "rsa:4096" => Ok(KasKeyType::Rsa4096),
            "ec:secp256r1" => Ok(KasKeyType::EcSecp256r1),
            "ec:secp384r1" => Ok(KasKeyType::EcSecp384r1),
            "ec:secp521r1" => Ok(KasKeyType::EcSecp521r1),
            other => Err(ProtocolError::UnknownKeyType(other.to_string())),
        }
    }
}

/// `type` member of a key access object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAccessType {
    #[serde(rename = "wrapped")]
    Wrapped,
    #[serde(rename = "eccWrapped", alias = "ec-wrapped")]
    EcWrapped,
}

impl KeyAccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAccessType::Wrapped => "wrapped",
            KeyAccessType::EcWrapped => "eccWrapped",
        }
    }
}

impl fmt::Display for KeyAccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAccessType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wrapped" => Ok(KeyAccessType::Wrapped),
            "eccWrapped" | "ec-wrapped" => Ok(KeyAccessType::EcWrapped),
            other => Err(ProtocolError::UnknownKeyAccessType(other.to_string())),
        }
    }
}

/// Segment and root signature algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IntegrityAlgorithm {
    /// HMAC-SHA256 keyed with the payload key
    #[default]
    #[serde(rename = "HS256", alias = "hs256")]
    Hs256,
    /// The trailing 16-byte GCM tag of the data
    #[serde(rename = "GMAC", alias = "gmac")]
    Gmac,
}

impl IntegrityAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityAlgorithm::Hs256 => "HS256",
            IntegrityAlgorithm::Gmac => "GMAC",
        }
    }
}

impl fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrityAlgorithm {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("HS256") {
            Ok(IntegrityAlgorithm::Hs256)
        } else if s.eq_ignore_ascii_case("GMAC") {
            Ok(IntegrityAlgorithm::Gmac)
        } else {
            Err(ProtocolError::UnknownIntegrityAlgorithm(s.to_string()))
        }
    }
}
