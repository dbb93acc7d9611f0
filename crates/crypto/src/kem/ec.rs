//! Elliptic-curve key wrapping (`eccWrapped` key access objects)
//!
//! # Protocol Flow
//!
//! 1. Generate an ephemeral key pair on the recipient's curve
//! 2. ECDH with the recipient public key, keep the x-coordinate
//! 3. HKDF-SHA256 with salt `SHA-256("TDF")` and empty info
//! 4. XOR the key with the first `len(key)` derived bytes
//! 5. Publish the ephemeral public key as SPKI PEM next to the wrapped key
//!
//! The same derivation (with AES-GCM instead of XOR) protects KAS rewrap
//! responses; see [`derive_wrap_key`].

use super::{KemError, KeyEncapsulation};
use crate::rng::{OsRandom, RandomSource, RngAdapter};
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use x509_cert::spki::ObjectIdentifier;
use zeroize::Zeroizing;

const OID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
const OID_SECP521R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");

/// Elliptic curve selection for ECDH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    /// NIST P-256 (secp256r1)
    P256,
    /// NIST P-384 (secp384r1)
    P384,
    /// NIST P-521 (secp521r1)
    P521,
}

impl EcCurve {
    /// SEC 2 curve name
    pub fn name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "secp256r1",
            EcCurve::P384 => "secp384r1",
            EcCurve::P521 => "secp521r1",
        }
    }

    /// JOSE `crv` member
    pub fn jwk_name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }

    /// Length of a field element in bytes
    pub fn field_size(&self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }

    pub fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        if oid == OID_SECP256R1 {
            Some(EcCurve::P256)
        } else if oid == OID_SECP384R1 {
            Some(EcCurve::P384)
        } else if oid == OID_SECP521R1 {
            Some(EcCurve::P521)
        } else {
            None
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EcCurve {
    type Err = KemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "secp256r1" | "p-256" | "p256" | "prime256v1" => Ok(EcCurve::P256),
            "secp384r1" | "p-384" | "p384" => Ok(EcCurve::P384),
            "secp521r1" | "p-521" | "p521" => Ok(EcCurve::P521),
            other => Err(KemError::InvalidEcCurve(other.to_string())),
        }
    }
}

/// EC public key on one of the supported curves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcPublicKey {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
}

/// EC private key on one of the supported curves
#[derive(Debug, Clone)]
pub enum EcPrivateKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

impl EcPublicKey {
    pub fn curve(&self) -> EcCurve {
        match self {
            EcPublicKey::P256(_) => EcCurve::P256,
            EcPublicKey::P384(_) => EcCurve::P384,
            EcPublicKey::P521(_) => EcCurve::P521,
        }
    }

    /// Parse SPKI DER for a known curve
    pub fn from_spki_der(curve: EcCurve, der: &[u8]) -> Result<Self, KemError> {
        let invalid = |e: pkcs8::spki::Error| {
            KemError::InvalidKey(format!("Failed to parse {} public key: {}", curve, e))
        };
        Ok(match curve {
            EcCurve::P256 => EcPublicKey::P256(p256::PublicKey::from_public_key_der(der).map_err(invalid)?),
            EcCurve::P384 => EcPublicKey::P384(p384::PublicKey::from_public_key_der(der).map_err(invalid)?),
            EcCurve::P521 => EcPublicKey::P521(p521::PublicKey::from_public_key_der(der).map_err(invalid)?),
        })
    }

    /// Parse an SPKI `PUBLIC KEY` PEM block, detecting the curve
    pub fn from_pem(pem: &str) -> Result<Self, KemError> {
        match crate::pem::parse_public_key_pem(pem)? {
            crate::pem::PublicKey::Ec(key) => Ok(key),
            crate::pem::PublicKey::Rsa(_) => Err(KemError::UnsupportedPublicKeyType(
                "expected an EC public key, found RSA".to_string(),
            )),
        }
    }

    /// Encode as an SPKI `PUBLIC KEY` PEM block
    pub fn to_pem(&self) -> Result<String, KemError> {
        let encoded = match self {
            EcPublicKey::P256(key) => key.to_public_key_pem(LineEnding::LF),
            EcPublicKey::P384(key) => key.to_public_key_pem(LineEnding::LF),
            EcPublicKey::P521(key) => key.to_public_key_pem(LineEnding::LF),
        };
        encoded.map_err(|e| KemError::EncodingError(e.to_string()))
    }

    /// SEC1 point encoding
    pub fn to_sec1_bytes(&self, compress: bool) -> Vec<u8> {
        match self {
            EcPublicKey::P256(key) => key.to_encoded_point(compress).as_bytes().to_vec(),
            EcPublicKey::P384(key) => key.to_encoded_point(compress).as_bytes().to_vec(),
            EcPublicKey::P521(key) => key.to_encoded_point(compress).as_bytes().to_vec(),
        }
    }

    /// Decode a SEC1 point (compressed or uncompressed)
    pub fn from_sec1_bytes(curve: EcCurve, bytes: &[u8]) -> Result<Self, KemError> {
        Ok(match curve {
            EcCurve::P256 => EcPublicKey::P256(
                p256::PublicKey::from_sec1_bytes(bytes).map_err(|_| KemError::InvalidPublicKey)?,
            ),
            EcCurve::P384 => EcPublicKey::P384(
                p384::PublicKey::from_sec1_bytes(bytes).map_err(|_| KemError::InvalidPublicKey)?,
            ),
            EcCurve::P521 => EcPublicKey::P521(
                p521::PublicKey::from_sec1_bytes(bytes).map_err(|_| KemError::InvalidPublicKey)?,
            ),
        })
    }
}

impl EcPrivateKey {
    /// Generate a key pair on `curve`
    pub fn generate(curve: EcCurve, rng: &dyn RandomSource) -> Self {
        let mut rng = RngAdapter(rng);
        match curve {
            EcCurve::P256 => EcPrivateKey::P256(p256::SecretKey::random(&mut rng)),
            EcCurve::P384 => EcPrivateKey::P384(p384::SecretKey::random(&mut rng)),
            EcCurve::P521 => EcPrivateKey::P521(p521::SecretKey::random(&mut rng)),
        }
    }

    pub fn curve(&self) -> EcCurve {
        match self {
            EcPrivateKey::P256(_) => EcCurve::P256,
            EcPrivateKey::P384(_) => EcCurve::P384,
            EcPrivateKey::P521(_) => EcCurve::P521,
        }
    }

    pub fn public_key(&self) -> EcPublicKey {
        match self {
            EcPrivateKey::P256(key) => EcPublicKey::P256(key.public_key()),
            EcPrivateKey::P384(key) => EcPublicKey::P384(key.public_key()),
            EcPrivateKey::P521(key) => EcPublicKey::P521(key.public_key()),
        }
    }

    /// Parse PKCS#8 DER, detecting the curve
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, KemError> {
        if let Ok(key) = p256::SecretKey::from_pkcs8_der(der) {
            return Ok(EcPrivateKey::P256(key));
        }
        if let Ok(key) = p384::SecretKey::from_pkcs8_der(der) {
            return Ok(EcPrivateKey::P384(key));
        }
        p521::SecretKey::from_pkcs8_der(der)
            .map(EcPrivateKey::P521)
            .map_err(|_| KemError::InvalidPrivateKey)
    }

    /// Parse SEC1 `ECPrivateKey` DER, detecting the curve
    pub fn from_sec1_der(der: &[u8]) -> Result<Self, KemError> {
        if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
            return Ok(EcPrivateKey::P256(key));
        }
        if let Ok(key) = p384::SecretKey::from_sec1_der(der) {
            return Ok(EcPrivateKey::P384(key));
        }
        p521::SecretKey::from_sec1_der(der)
            .map(EcPrivateKey::P521)
            .map_err(|_| KemError::InvalidPrivateKey)
    }

    /// Parse a PKCS#8 or SEC1 PEM block
    pub fn from_pem(pem: &str) -> Result<Self, KemError> {
        match crate::pem::parse_private_key_pem(pem)? {
            crate::pem::PrivateKey::Ec(key) => Ok(key),
            crate::pem::PrivateKey::Rsa(_) => Err(KemError::InvalidPrivateKey),
        }
    }

    /// Encode as a PKCS#8 `PRIVATE KEY` PEM block
    pub fn to_pem(&self) -> Result<Zeroizing<String>, KemError> {
        let encoded = match self {
            EcPrivateKey::P256(key) => key.to_pkcs8_pem(LineEnding::LF),
            EcPrivateKey::P384(key) => key.to_pkcs8_pem(LineEnding::LF),
            EcPrivateKey::P521(key) => key.to_pkcs8_pem(LineEnding::LF),
        };
        encoded.map_err(|e| KemError::EncodingError(e.to_string()))
    }

    /// Raw ECDH shared secret (the x-coordinate)
    pub fn diffie_hellman(&self, peer: &EcPublicKey) -> Result<Zeroizing<Vec<u8>>, KemError> {
        let secret = match (self, peer) {
            (EcPrivateKey::P256(sk), EcPublicKey::P256(pk)) => {
                p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            (EcPrivateKey::P384(sk), EcPublicKey::P384(pk)) => {
                p384::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            (EcPrivateKey::P521(sk), EcPublicKey::P521(pk)) => {
                p521::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            _ => {
                return Err(KemError::InvalidEcCurve(format!(
                    "private key is on {} but peer key is on {}",
                    self.curve(),
                    peer.curve()
                )))
            }
        };
        Ok(Zeroizing::new(secret))
    }
}

/// HKDF salt shared by TDF key wrapping and rewrap sessions
pub fn tdf_salt() -> [u8; 32] {
    Sha256::digest(b"TDF").into()
}

/// HKDF-SHA256 over an ECDH secret with the TDF salt and empty info
pub fn derive_wrap_key(shared_secret: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>, KemError> {
    let salt = tdf_salt();
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut okm = Zeroizing::new(vec![0u8; len]);
    hk.expand(&[], &mut okm)
        .map_err(|_| KemError::KeyDerivationFailed)?;
    Ok(okm)
}

/// Convert an uncompressed SEC1 point `0x04 || X || Y` to compressed form
pub fn compress_ec_point(uncompressed: &[u8]) -> Result<Vec<u8>, KemError> {
    if uncompressed.len() < 3 || uncompressed[0] != 0x04 || (uncompressed.len() - 1) % 2 != 0 {
        return Err(KemError::InvalidPublicKey);
    }
    let coord_len = (uncompressed.len() - 1) / 2;
    let x = &uncompressed[1..1 + coord_len];
    let y = &uncompressed[1 + coord_len..];

    let prefix = if y[coord_len - 1] & 1 == 0 { 0x02 } else { 0x03 };
    let mut out = Vec::with_capacity(1 + coord_len);
    out.push(prefix);
    out.extend_from_slice(x);
    Ok(out)
}

/// Output of [`EcdhKem::wrap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcWrappedKey {
    pub wrapped: Vec<u8>,
    pub ephemeral_public_key_pem: String,
}

/// ECDH + HKDF key encapsulation
pub struct EcdhKem {
    rng: Arc<dyn RandomSource>,
}

impl Default for EcdhKem {
    fn default() -> Self {
        EcdhKem {
            rng: Arc::new(OsRandom),
        }
    }
}

impl EcdhKem {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        EcdhKem { rng }
    }
}

fn xor_with_derived(key: &[u8], shared_secret: &[u8]) -> Result<Vec<u8>, KemError> {
    let derived = derive_wrap_key(shared_secret, key.len())?;
    Ok(key.iter().zip(derived.iter()).map(|(a, b)| a ^ b).collect())
}

impl KeyEncapsulation for EcdhKem {
    type PublicKey = EcPublicKey;
    type PrivateKey = EcPrivateKey;
    type WrappedKey = EcWrappedKey;

    fn wrap(&self, key: &[u8], public_key: &EcPublicKey) -> Result<EcWrappedKey, KemError> {
        let ephemeral = EcPrivateKey::generate(public_key.curve(), self.rng.as_ref());
        let shared = ephemeral.diffie_hellman(public_key)?;
        Ok(EcWrappedKey {
            wrapped: xor_with_derived(key, &shared)?,
            ephemeral_public_key_pem: ephemeral.public_key().to_pem()?,
        })
    }

    fn unwrap(&self, wrapped: &EcWrappedKey, private_key: &EcPrivateKey) -> Result<Vec<u8>, KemError> {
        let ephemeral = EcPublicKey::from_pem(&wrapped.ephemeral_public_key_pem)?;
        let shared = private_key.diffie_hellman(&ephemeral)?;
        xor_with_derived(&wrapped.wrapped, &shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRandom;

    const KAS_P256_PUBLIC: &str = include_str!("../../testdata/kas_ec_p256_public.pem");
    const KAS_P256_PRIVATE: &str = include_str!("../../testdata/kas_ec_p256_private.pem");
    const KAS_P521_PUBLIC: &str = include_str!("../../testdata/kas_ec_p521_public.pem");
    const KAS_P521_PRIVATE: &str = include_str!("../../testdata/kas_ec_p521_private.pem");

    #[test]
    fn test_wrap_unwrap_with_fixture_keys() {
        let kem = EcdhKem::default();
        let key = [0x5Au8; 32];

        for (public, private) in [
            (KAS_P256_PUBLIC, KAS_P256_PRIVATE),
            (KAS_P521_PUBLIC, KAS_P521_PRIVATE),
        ] {
            let recipient = EcPublicKey::from_pem(public).unwrap();
            let wrapped = kem.wrap(&key, &recipient).unwrap();
            assert_eq!(wrapped.wrapped.len(), key.len());
            assert_ne!(wrapped.wrapped, key);
            assert!(wrapped
                .ephemeral_public_key_pem
                .starts_with("-----BEGIN PUBLIC KEY-----"));

            let sk = EcPrivateKey::from_pem(private).unwrap();
            assert_eq!(kem.unwrap(&wrapped, &sk).unwrap(), key);
        }
    }

    #[test]
    fn test_wrap_p384_generated() {
        let rng = SeededRandom::from_u64(11);
        let recipient = EcPrivateKey::generate(EcCurve::P384, &rng);
        let kem = EcdhKem::new(Arc::new(SeededRandom::from_u64(12)));

        let wrapped = kem.wrap(b"0123456789abcdef", &recipient.public_key()).unwrap();
        assert_eq!(kem.unwrap(&wrapped, &recipient).unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn test_ecdh_is_symmetric() {
        let rng = SeededRandom::from_u64(1);
        let a = EcPrivateKey::generate(EcCurve::P256, &rng);
        let b = EcPrivateKey::generate(EcCurve::P256, &rng);
        let ab = a.diffie_hellman(&b.public_key()).unwrap();
        let ba = b.diffie_hellman(&a.public_key()).unwrap();
        assert_eq!(*ab, *ba);
        assert_eq!(ab.len(), 32);
    }

    #[test]
    fn test_curve_mismatch() {
        let rng = SeededRandom::from_u64(2);
        let a = EcPrivateKey::generate(EcCurve::P256, &rng);
        let b = EcPrivateKey::generate(EcCurve::P384, &rng);
        assert!(matches!(
            a.diffie_hellman(&b.public_key()),
            Err(KemError::InvalidEcCurve(_))
        ));
    }

    #[test]
    fn test_curve_names() {
        assert_eq!("secp256r1".parse::<EcCurve>().unwrap(), EcCurve::P256);
        assert_eq!("P-521".parse::<EcCurve>().unwrap(), EcCurve::P521);
        assert!(matches!(
            "secp256k1".parse::<EcCurve>(),
            Err(KemError::InvalidEcCurve(_))
        ));
    }

    #[test]
    fn test_compress_matches_library_encoding() {
        let rng = SeededRandom::from_u64(3);
        for curve in [EcCurve::P256, EcCurve::P384, EcCurve::P521] {
            let pk = EcPrivateKey::generate(curve, &rng).public_key();
            let uncompressed = pk.to_sec1_bytes(false);
            assert_eq!(uncompressed.len(), 1 + 2 * curve.field_size());
            assert_eq!(compress_ec_point(&uncompressed).unwrap(), pk.to_sec1_bytes(true));
        }
        assert!(compress_ec_point(&[0x02, 1, 2]).is_err());
    }

    #[test]
    fn test_pem_roundtrip() {
        let rng = SeededRandom::from_u64(4);
        let sk = EcPrivateKey::generate(EcCurve::P256, &rng);
        let restored = EcPrivateKey::from_pem(&sk.to_pem().unwrap()).unwrap();
        assert_eq!(restored.public_key(), sk.public_key());
        assert_eq!(
            EcPublicKey::from_pem(&sk.public_key().to_pem().unwrap()).unwrap(),
            sk.public_key()
        );
    }

    #[test]
    fn test_salt_is_sha256_of_tdf() {
        assert_eq!(
            hex::encode(tdf_salt()),
            "aa17cf44585fe15fd634c27b9512d842b42af1bac6178d92161edb4e2abf8197"
        );
    }
}
