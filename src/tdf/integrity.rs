//! Segment and root signatures
//!
//! HS256 signs with HMAC-SHA256 keyed by the payload key; GMAC reuses the
//! trailing 16-byte GCM tag. Legacy TDFs (no `schemaVersion`) store the hex
//! text of the signature instead of its raw bytes. In both cases the
//! manifest holds the base64 of that value.

use crate::error::{IntegrityTarget, TdfError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use opentdf_crypto::symmetric::TAG_SIZE;
use opentdf_crypto::{calculate_hmac, constant_time_eq, hex_encode, EncryptionError};
use opentdf_protocol::{IntegrityAlgorithm, IntegrityInformation, Segment};

/// Signature bytes as they are base64-encoded into the manifest
pub fn calculate_signature(
    alg: IntegrityAlgorithm,
    key: &[u8],
    data: &[u8],
    legacy: bool,
) -> Result<Vec<u8>, TdfError> {
    let raw = match alg {
        IntegrityAlgorithm::Hs256 => calculate_hmac(key, data)?,
        IntegrityAlgorithm::Gmac => {
            if data.len() < TAG_SIZE {
                return Err(EncryptionError::InvalidCiphertext {
                    reason: format!("{} bytes is too short for a GMAC tag", data.len()),
                }
                .into());
            }
            data[data.len() - TAG_SIZE..].to_vec()
        }
    };
    Ok(if legacy { hex_encode(&raw).into_bytes() } else { raw })
}

/// Concatenation of the decoded segment hashes, in manifest order
pub fn aggregate_hash(segments: &[Segment]) -> Result<Vec<u8>, TdfError> {
    let mut aggregate = Vec::with_capacity(segments.len() * 32);
    for (index, segment) in segments.iter().enumerate() {
        let decoded = BASE64.decode(&segment.hash).map_err(|_| TdfError::IntegrityFailure {
            target: IntegrityTarget::Segment(index),
        })?;
        aggregate.extend_from_slice(&decoded);
    }
    Ok(aggregate)
}

/// `base64(signature(aggregate))`
pub fn root_signature(
    alg: IntegrityAlgorithm,
    key: &[u8],
    aggregate: &[u8],
    legacy: bool,
) -> Result<String, TdfError> {
    Ok(BASE64.encode(calculate_signature(alg, key, aggregate, legacy)?))
}

/// Check the root signature of `info` against the payload key
pub fn verify_root_signature(
    info: &IntegrityInformation,
    key: &[u8],
    legacy: bool,
) -> Result<Vec<u8>, TdfError> {
    let aggregate = aggregate_hash(&info.segments)?;
    let expected = root_signature(info.root_signature.alg, key, &aggregate, legacy)?;
    if constant_time_eq(expected.as_bytes(), info.root_signature.sig.as_bytes()) {
        Ok(aggregate)
    } else {
        Err(TdfError::IntegrityFailure {
            target: IntegrityTarget::RootSignature,
        })
    }
}

/// Check one encrypted segment against its manifest hash
pub fn verify_segment(
    alg: IntegrityAlgorithm,
    key: &[u8],
    ciphertext: &[u8],
    segment: &Segment,
    index: usize,
    legacy: bool,
) -> Result<(), TdfError> {
    let failure = || TdfError::IntegrityFailure {
        target: IntegrityTarget::Segment(index),
    };
    let stored = BASE64.decode(&segment.hash).map_err(|_| failure())?;
    let calculated = calculate_signature(alg, key, ciphertext, legacy).map_err(|_| failure())?;
    if constant_time_eq(&calculated, &stored) {
        Ok(())
    } else {
        Err(failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x24; 32];

    fn segment(data: &[u8], alg: IntegrityAlgorithm, legacy: bool) -> Segment {
        Segment {
            hash: BASE64.encode(calculate_signature(alg, &KEY, data, legacy).unwrap()),
            segment_size: 0,
            encrypted_segment_size: data.len() as i64,
        }
    }

    #[test]
    fn test_gmac_is_trailing_tag() {
        let data: Vec<u8> = (0u8..40).collect();
        let sig = calculate_signature(IntegrityAlgorithm::Gmac, &KEY, &data, false).unwrap();
        assert_eq!(sig, data[24..].to_vec());

        let legacy = calculate_signature(IntegrityAlgorithm::Gmac, &KEY, &data, true).unwrap();
        assert_eq!(legacy, hex_encode(&data[24..]).into_bytes());

        assert!(calculate_signature(IntegrityAlgorithm::Gmac, &KEY, &[0u8; 8], false).is_err());
    }

    #[test]
    fn test_hs256_legacy_is_hex_text() {
        let raw = calculate_signature(IntegrityAlgorithm::Hs256, &KEY, b"ct", false).unwrap();
        let legacy = calculate_signature(IntegrityAlgorithm::Hs256, &KEY, b"ct", true).unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(legacy, hex_encode(&raw).into_bytes());
    }

    #[test]
    fn test_segment_verification() {
        for legacy in [false, true] {
            let seg = segment(b"ciphertext-bytes-long-enough", IntegrityAlgorithm::Hs256, legacy);
            verify_segment(IntegrityAlgorithm::Hs256, &KEY, b"ciphertext-bytes-long-enough", &seg, 0, legacy)
                .unwrap();
            let err = verify_segment(IntegrityAlgorithm::Hs256, &KEY, b"ciphertext-bytes-long-enougH", &seg, 4, legacy)
                .unwrap_err();
            assert!(matches!(
                err,
                TdfError::IntegrityFailure { target: IntegrityTarget::Segment(4) }
            ));
        }
    }

    #[test]
    fn test_root_signature_over_aggregate() {
        let segments = vec![
            segment(b"first segment ciphertext", IntegrityAlgorithm::Gmac, false),
            segment(b"second segment ciphertext", IntegrityAlgorithm::Gmac, false),
        ];
        let aggregate = aggregate_hash(&segments).unwrap();
        assert_eq!(aggregate.len(), 32);

        let mut info = IntegrityInformation {
            root_signature: opentdf_protocol::RootSignature {
                alg: IntegrityAlgorithm::Hs256,
                sig: root_signature(IntegrityAlgorithm::Hs256, &KEY, &aggregate, false).unwrap(),
            },
            segment_hash_alg: IntegrityAlgorithm::Gmac,
            segment_size_default: 0,
            encrypted_segment_size_default: 0,
            segments,
        };
        assert_eq!(verify_root_signature(&info, &KEY, false).unwrap(), aggregate);

        info.segments.swap(0, 1);
        let err = verify_root_signature(&info, &KEY, false).unwrap_err();
        assert!(matches!(
            err,
            TdfError::IntegrityFailure { target: IntegrityTarget::RootSignature }
        ));
    }
}
