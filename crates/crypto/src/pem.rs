//! PEM and DER key parsing
//!
//! KAS public keys arrive as SPKI `PUBLIC KEY` blocks, PKCS#1
//! `RSA PUBLIC KEY` blocks or X.509 certificates. Everything is normalized
//! to [`PublicKey`], with RSA sizes restricted to 2048 and 4096 bits and EC
//! keys restricted to the NIST curves.

use crate::kem::ec::{EcCurve, EcPrivateKey, EcPublicKey};
use crate::kem::KemError;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_cert::der::{Decode, Encode};
use x509_cert::spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};
use x509_cert::Certificate;

const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_SECP256K1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.10");

/// RSA modulus sizes accepted for KAS keys
pub const ALLOWED_RSA_BITS: [usize; 2] = [2048, 4096];

/// A parsed KAS public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ec(EcPublicKey),
}

/// Where a public key was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeySource {
    PublicKey,
    Certificate,
}

/// Kind and strength of a public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyType {
    Rsa { bits: usize },
    Ec { curve: EcCurve },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyInfo {
    pub key_type: PublicKeyType,
    pub source: PublicKeySource,
}

/// A parsed client or KAS private key
#[derive(Debug, Clone)]
pub enum PrivateKey {
    Rsa(RsaPrivateKey),
    Ec(EcPrivateKey),
}

impl PublicKey {
    pub fn key_type(&self) -> PublicKeyType {
        match self {
            PublicKey::Rsa(key) => PublicKeyType::Rsa {
                bits: key.size() * 8,
            },
            PublicKey::Ec(key) => PublicKeyType::Ec { curve: key.curve() },
        }
    }
}

fn parse_pem_block(text: &str) -> Result<::pem::Pem, KemError> {
    ::pem::parse(text.trim()).map_err(|e| KemError::InvalidPemBlock(e.to_string()))
}

fn check_rsa_size(key: &RsaPublicKey) -> Result<(), KemError> {
    let bits = key.size() * 8;
    if ALLOWED_RSA_BITS.contains(&bits) {
        Ok(())
    } else {
        Err(KemError::InvalidRsaKeySize { bits })
    }
}

/// Parse an SPKI DER structure into a public key
pub fn parse_spki_der(der: &[u8]) -> Result<PublicKey, KemError> {
    let spki = SubjectPublicKeyInfoRef::from_der(der)
        .map_err(|e| KemError::InvalidKey(format!("Malformed SubjectPublicKeyInfo: {}", e)))?;
    let (algorithm, parameters) = spki
        .algorithm
        .oids()
        .map_err(|e| KemError::InvalidKey(format!("Malformed algorithm identifier: {}", e)))?;

    if algorithm == OID_RSA_ENCRYPTION {
        let key = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| KemError::InvalidKey(format!("Failed to parse RSA public key: {}", e)))?;
        check_rsa_size(&key)?;
        return Ok(PublicKey::Rsa(key));
    }

    if algorithm == OID_EC_PUBLIC_KEY {
        let curve_oid = parameters.ok_or(KemError::InvalidPublicKey)?;
        if curve_oid == OID_SECP256K1 {
            return Err(KemError::InvalidEcCurve("secp256k1".to_string()));
        }
        let curve = EcCurve::from_oid(curve_oid)
            .ok_or_else(|| KemError::InvalidEcCurve(curve_oid.to_string()))?;
        return EcPublicKey::from_spki_der(curve, der).map(PublicKey::Ec);
    }

    Err(KemError::UnsupportedPublicKeyType(algorithm.to_string()))
}

fn parse_public_block(block: &::pem::Pem) -> Result<(PublicKey, PublicKeySource), KemError> {
    match block.tag() {
        "PUBLIC KEY" => Ok((parse_spki_der(block.contents())?, PublicKeySource::PublicKey)),
        "RSA PUBLIC KEY" => {
            let key = RsaPublicKey::from_pkcs1_der(block.contents()).map_err(|e| {
                KemError::InvalidKey(format!("Failed to parse PKCS#1 public key: {}", e))
            })?;
            check_rsa_size(&key)?;
            Ok((PublicKey::Rsa(key), PublicKeySource::PublicKey))
        }
        "CERTIFICATE" => {
            let cert = Certificate::from_der(block.contents())
                .map_err(|e| KemError::InvalidKey(format!("Failed to parse certificate: {}", e)))?;
            let spki = cert
                .tbs_certificate
                .subject_public_key_info
                .to_der()
                .map_err(|e| KemError::EncodingError(e.to_string()))?;
            Ok((parse_spki_der(&spki)?, PublicKeySource::Certificate))
        }
        other => Err(KemError::InvalidPemBlock(format!(
            "expected a public key or certificate, found {}",
            other
        ))),
    }
}

/// Parse a public key from PEM (SPKI, PKCS#1 or X.509 certificate)
pub fn parse_public_key_pem(text: &str) -> Result<PublicKey, KemError> {
    let block = parse_pem_block(text)?;
    parse_public_block(&block).map(|(key, _)| key)
}

/// Describe a public key PEM, rejecting sizes and curves KAS cannot use
pub fn validate_public_key_pem(text: &str) -> Result<PublicKeyInfo, KemError> {
    let block = parse_pem_block(text)?;
    let (key, source) = parse_public_block(&block)?;
    Ok(PublicKeyInfo {
        key_type: key.key_type(),
        source,
    })
}

/// Parse a private key from PEM (PKCS#8, PKCS#1 RSA or SEC1 EC)
pub fn parse_private_key_pem(text: &str) -> Result<PrivateKey, KemError> {
    let block = parse_pem_block(text)?;
    let der = block.contents();
    match block.tag() {
        "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(der)
            .map(PrivateKey::Rsa)
            .map_err(|_| KemError::InvalidPrivateKey),
        "EC PRIVATE KEY" => EcPrivateKey::from_sec1_der(der).map(PrivateKey::Ec),
        "PRIVATE KEY" => {
            if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
                return Ok(PrivateKey::Rsa(key));
            }
            EcPrivateKey::from_pkcs8_der(der).map(PrivateKey::Ec)
        }
        other => Err(KemError::InvalidPemBlock(format!(
            "expected a private key, found {}",
            other
        ))),
    }
}

/// True when `data` holds a private key, either as PEM text or raw DER
pub fn is_pem_or_der_private_key(data: &[u8]) -> bool {
    if let Ok(block) = ::pem::parse(data) {
        return block.tag().contains("PRIVATE KEY");
    }
    RsaPrivateKey::from_pkcs8_der(data).is_ok()
        || RsaPrivateKey::from_pkcs1_der(data).is_ok()
        || EcPrivateKey::from_pkcs8_der(data).is_ok()
        || EcPrivateKey::from_sec1_der(data).is_ok()
}
