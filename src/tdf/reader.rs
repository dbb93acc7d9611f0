//! TDF reader
//!
//! Opening parses the archive and manifest only. [`TdfReader::unwrap_key`]
//! rewraps the key access objects through a [`RewrapTransport`] and
//! rebuilds the payload key; the first payload read then checks the root
//! signature and assertions, and every segment is checked against its hash
//! before it is decrypted.

use super::assertion::{verify_assertion, AssertionContext};
use super::integrity::{verify_root_signature, verify_segment};
use super::locator::{LocatorError, SegmentLocator, SegmentSpan};
use super::options::ReaderConfig;
use crate::error::{IntegrityTarget, TdfError};
use crate::kas::{ClientKeyPair, RewrapRequest, RewrapTransport};
use crate::zipstream::ArchiveReader;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use opentdf_crypto::{verify_policy_binding, AesGcmCipher, PayloadKey, SplitKey};
use opentdf_protocol::{KeyAccess, Policy, TdfManifest, MANIFEST_ENTRY, PAYLOAD_ENTRY};
use std::collections::BTreeMap;
use std::io::{Read, Seek};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

/// Upper bound on buffer space reserved from manifest-declared sizes
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

fn preallocation(declared: u64) -> usize {
    declared.min(MAX_PREALLOCATION) as usize
}

/// Reader over a TDF archive in any `Read + Seek` source
pub struct TdfReader<R> {
    archive: ArchiveReader<R>,
    manifest: TdfManifest,
    locator: SegmentLocator,
    config: ReaderConfig,
    payload_key: Option<PayloadKey>,
    cipher: Option<AesGcmCipher>,
    metadata: Option<Zeroizing<Vec<u8>>>,
    verified: bool,
}

impl<R> std::fmt::Debug for TdfReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdfReader")
            .field("segments", &self.locator.segment_count())
            .field("unwrapped", &self.payload_key.is_some())
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek> TdfReader<R> {
    pub fn open(inner: R) -> Result<Self, TdfError> {
        Self::open_with_config(inner, ReaderConfig::default())
    }

    pub fn open_with_config(inner: R, config: ReaderConfig) -> Result<Self, TdfError> {
        let mut archive = ArchiveReader::new(inner)?;
        let manifest_bytes = archive.read_entry(MANIFEST_ENTRY)?;
        let manifest: TdfManifest = serde_json::from_slice(&manifest_bytes)?;

        if manifest.encryption_information.key_access.is_empty() {
            return Err(TdfError::InvalidManifest("no key access objects".to_string()));
        }
        let locator = SegmentLocator::from_integrity(&manifest.encryption_information.integrity_information)
            .map_err(|e| TdfError::InvalidManifest(e.to_string()))?;
        let payload_size = archive
            .entry(PAYLOAD_ENTRY)
            .map(|e| e.size)
            .ok_or_else(|| TdfError::InvalidManifest(format!("missing {} entry", PAYLOAD_ENTRY)))?;
        if locator.encrypted_total_size() != payload_size {
            return Err(TdfError::InvalidManifest(format!(
                "segments cover {} bytes but the payload has {}",
                locator.encrypted_total_size(),
                payload_size
            )));
        }

        tracing::debug!(
            segments = locator.segment_count(),
            key_access_objects = manifest.encryption_information.key_access.len(),
            legacy = manifest.is_legacy(),
            "Opened TDF"
        );
        Ok(TdfReader {
            archive,
            manifest,
            locator,
            config,
            payload_key: None,
            cipher: None,
            metadata: None,
            verified: false,
        })
    }

    pub fn manifest(&self) -> &TdfManifest {
        &self.manifest
    }

    pub fn policy(&self) -> Result<Policy, TdfError> {
        Ok(Policy::from_base64(&self.manifest.encryption_information.policy)?)
    }

    pub fn is_legacy(&self) -> bool {
        self.manifest.is_legacy()
    }

    pub fn segment_count(&self) -> usize {
        self.locator.segment_count()
    }

    /// Plaintext size of the whole payload
    pub fn plaintext_size(&self) -> u64 {
        self.locator.total_size()
    }

    pub fn locator(&self) -> &SegmentLocator {
        &self.locator
    }

    /// Decrypted metadata of the first key access object that carried it
    pub fn metadata(&self) -> Option<&[u8]> {
        self.metadata.as_deref().map(Vec::as_slice)
    }

    pub fn is_unwrapped(&self) -> bool {
        self.payload_key.is_some()
    }

    /// Recover the payload key through `transport`
    ///
    /// Key access objects are grouped by split id; one successful rewrap per
    /// group is enough. A recovered share whose policy binding does not
    /// match aborts the unwrap.
    pub async fn unwrap_key(
        &mut self,
        transport: &dyn RewrapTransport,
        cancel: &CancellationToken,
    ) -> Result<(), TdfError> {
        let session = match &self.config.session_key {
            Some(key) => key.clone(),
            None => ClientKeyPair::generate(self.config.session_key_type, self.config.rng.as_ref())?,
        };
        let policy = self.manifest.encryption_information.policy.clone();

        let mut groups: BTreeMap<&str, Vec<&KeyAccess>> = BTreeMap::new();
        for kao in &self.manifest.encryption_information.key_access {
            groups.entry(kao.split_id()).or_default().push(kao);
        }

        let mut dek = SplitKey::from_slice(&[0u8; SplitKey::LEN])?;
        let mut metadata = None;
        for (split_id, kaos) in &groups {
            let mut failure = None;
            let mut share = None;
            for kao in kaos {
                if cancel.is_cancelled() {
                    return Err(TdfError::Canceled);
                }
                tracing::debug!(kas_url = %kao.url, split_id = %split_id, "Requesting rewrap");
                let request = RewrapRequest {
                    key_access: (*kao).clone(),
                    policy: policy.clone(),
                    client_public_key: session.public_key_pem().to_string(),
                };
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TdfError::Canceled),
                    result = transport.rewrap(request, cancel) => result,
                };
                let recovered = result.and_then(|r| session.unwrap(&r));
                match recovered {
                    Ok(bytes) => {
                        let recovered = SplitKey::from_slice(&bytes)?;
                        if verify_policy_binding(&policy, recovered.as_slice(), &kao.policy_binding.hash).is_err() {
                            tracing::warn!(kas_url = %kao.url, "Policy binding mismatch");
                            return Err(TdfError::PolicyHmacMismatch {
                                kas_url: kao.url.clone(),
                            });
                        }
                        if metadata.is_none() {
                            metadata = decrypt_metadata(kao, &recovered)?;
                        }
                        share = Some(recovered);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(kas_url = %kao.url, error = %e, "Rewrap failed");
                        failure = Some((kao.url.clone(), e.to_string()));
                    }
                }
            }

            match share {
                Some(share) => dek.xor_in(share.as_slice())?,
                None => {
                    let (kas_url, reason) = failure.unwrap_or_default();
                    return Err(TdfError::RewrapFailed { kas_url, reason });
                }
            }
        }

        let key = PayloadKey::from_slice(dek.as_slice())?;
        self.cipher = Some(AesGcmCipher::new(key.as_slice())?);
        self.payload_key = Some(key);
        self.metadata = metadata;
        self.verified = false;
        tracing::info!(splits = groups.len(), "Unwrapped TDF payload key");
        Ok(())
    }

    /// Check the root signature and assertions once per unwrapped key
    pub fn verify(&mut self) -> Result<(), TdfError> {
        if self.verified {
            return Ok(());
        }
        let key = self.payload_key.as_ref().ok_or(TdfError::KeyNotUnwrapped)?;
        let legacy = self.manifest.is_legacy();
        let integrity = &self.manifest.encryption_information.integrity_information;
        let aggregate = verify_root_signature(integrity, key.as_slice(), legacy)?;

        if !self.config.disable_assertion_verification {
            let ctx = AssertionContext {
                payload_key: key.as_slice(),
                aggregate_hash: &aggregate,
                legacy,
                keys: &self.config.verification_keys,
            };
            for assertion in &self.manifest.assertions {
                verify_assertion(assertion, &ctx)?;
            }
        }
        self.verified = true;
        Ok(())
    }

    /// Verify and decrypt segment `index` (manifest order)
    pub fn read_segment(&mut self, index: usize) -> Result<Vec<u8>, TdfError> {
        self.verify()?;
        let span = self.locator.span(index)?;
        self.decrypt_span(&span)
    }

    /// Decrypt the whole payload; nothing is returned if any segment fails
    pub fn decrypt_all(&mut self) -> Result<Vec<u8>, TdfError> {
        self.verify()?;
        let mut out = Vec::with_capacity(preallocation(self.locator.total_size()));
        for index in 0..self.locator.segment_count() {
            let span = self.locator.span(index)?;
            out.extend(self.decrypt_span(&span)?);
        }
        Ok(out)
    }

    /// Decrypt `len` plaintext bytes starting at `offset`
    ///
    /// Only the segments overlapping the range are read.
    pub fn read_range(&mut self, offset: u64, len: u64) -> Result<Vec<u8>, TdfError> {
        let end = offset.checked_add(len).ok_or(LocatorError::InvalidRange {
            start: offset,
            end: u64::MAX,
            total: self.locator.total_size(),
        })?;
        let spans = self.locator.range(offset, end)?;
        self.verify()?;

        let mut out = Vec::with_capacity(preallocation(len));
        for span in spans {
            let plaintext = self.decrypt_span(&span)?;
            let from = offset.saturating_sub(span.plaintext_offset) as usize;
            let to = (end.min(span.plaintext_end()) - span.plaintext_offset) as usize;
            out.extend_from_slice(&plaintext[from..to]);
        }
        Ok(out)
    }

    /// Iterate decrypted segments in order; iteration stops after the first error
    pub fn segments(&mut self) -> Segments<'_, R> {
        Segments {
            reader: self,
            next: 0,
            done: false,
        }
    }

    fn decrypt_span(&mut self, span: &SegmentSpan) -> Result<Vec<u8>, TdfError> {
        let key = self.payload_key.as_ref().ok_or(TdfError::KeyNotUnwrapped)?;
        let cipher = self.cipher.as_ref().ok_or(TdfError::KeyNotUnwrapped)?;
        let integrity = &self.manifest.encryption_information.integrity_information;
        let segment = integrity
            .segments
            .get(span.index)
            .ok_or(LocatorError::SegmentOutOfRange {
                index: span.index,
                count: integrity.segments.len(),
            })?;

        let ciphertext = self
            .archive
            .read_range(PAYLOAD_ENTRY, span.encrypted_offset, span.encrypted_size)?;
        verify_segment(
            integrity.segment_hash_alg,
            key.as_slice(),
            &ciphertext,
            segment,
            span.index,
            self.manifest.is_legacy(),
        )?;
        cipher.decrypt(&ciphertext).map_err(|_| TdfError::IntegrityFailure {
            target: IntegrityTarget::Segment(span.index),
        })
    }
}

/// Iterator returned by [`TdfReader::segments`]
pub struct Segments<'a, R> {
    reader: &'a mut TdfReader<R>,
    next: usize,
    done: bool,
}

impl<R: Read + Seek> Iterator for Segments<'_, R> {
    type Item = Result<Vec<u8>, TdfError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next >= self.reader.segment_count() {
            return None;
        }
        let result = self.reader.read_segment(self.next);
        self.next += 1;
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

fn decrypt_metadata(kao: &KeyAccess, share: &SplitKey) -> Result<Option<Zeroizing<Vec<u8>>>, TdfError> {
    let Some(envelope) = kao.decode_encrypted_metadata()? else {
        return Ok(None);
    };
    let sealed = BASE64
        .decode(&envelope.ciphertext)
        .map_err(opentdf_protocol::ProtocolError::from)?;
    let plaintext = AesGcmCipher::new(share.as_slice())?.decrypt(&sealed)?;
    Ok(Some(Zeroizing::new(plaintext)))
}
