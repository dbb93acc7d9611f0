//! Streaming TDF writer
//!
//! Segments are sealed and emitted as they arrive, in any index order; the
//! caller concatenates the returned bytes in ascending index order and
//! appends the [`FinalizeResult::data`] trailer. Only per-segment sizes,
//! hashes and CRCs are kept in memory.
//!
//! # Example
//!
//! ```no_run
//! use opentdf_core::keysplit::{KasGrant, KasPublicKey};
//! use opentdf_core::tdf::{FinalizeOptions, TdfWriter, WriterConfig};
//! use opentdf_protocol::KeyAlgorithm;
//! use tokio_util::sync::CancellationToken;
//!
//! # fn example(kas_pem: &str) -> Result<(), opentdf_core::TdfError> {
//! let kas = KasGrant::new("https://kas.example.com")
//!     .with_public_key(KasPublicKey::new(KeyAlgorithm::RsaOaep, kas_pem));
//! let writer = TdfWriter::new(WriterConfig::default().default_kas(kas))?;
//! let cancel = CancellationToken::new();
//!
//! let mut tdf = writer.write_segment(0, b"hello ", &cancel)?.data;
//! tdf.extend(writer.write_segment(1, b"world", &cancel)?.data);
//! tdf.extend(writer.finalize(FinalizeOptions::default(), &cancel)?.data);
//! # Ok(())
//! # }
//! ```

use super::assertion::sign_assertion;
use super::integrity::{aggregate_hash, calculate_signature, root_signature};
use super::options::{FinalizeOptions, WriterConfig, DEFAULT_MIME_TYPE};
use crate::error::TdfError;
use crate::keysplit::{KasPublicKey, Split, Splitter};
use crate::zipstream::{ArchiveError, SegmentWriter};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use opentdf_crypto::symmetric::NONCE_SIZE;
use opentdf_crypto::{
    calculate_policy_binding, crc32, parse_public_key_pem, AesGcmCipher, EcdhKem,
    KeyEncapsulation, OaepHash, PayloadKey, PublicKey, RsaOaepKem,
};
use opentdf_protocol::{
    EncryptedMetadata, EncryptionInformation, EncryptionMethod, IntegrityInformation, KeyAccess,
    KeyAccessType, KeyAlgorithm, Payload, Policy, PolicyBinding, RootSignature, Segment,
    TdfManifest, TDF_SPEC_VERSION,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Output of [`TdfWriter::write_segment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentResult {
    /// Archive bytes for this segment: any ZIP header followed by the ciphertext
    pub data: Vec<u8>,
    pub index: i64,
    /// Base64 segment signature as recorded in the manifest
    pub hash: String,
    pub plaintext_size: u64,
    pub encrypted_size: u64,
    pub crc32: u32,
}

/// Output of [`TdfWriter::finalize`]
#[derive(Debug, Clone)]
pub struct FinalizeResult {
    /// Archive trailer: data descriptor, manifest entry and central directory
    pub data: Vec<u8>,
    pub manifest: TdfManifest,
    pub total_segments: usize,
    /// Plaintext bytes across all segments
    pub total_size: u64,
    /// Payload entry bytes (ciphertext with nonces and tags)
    pub encrypted_size: u64,
}

struct WriterState {
    /// `None` once finalized or closed
    dek: Option<PayloadKey>,
    cipher: Option<AesGcmCipher>,
    segments: BTreeMap<i64, Segment>,
    finalized: Option<TdfManifest>,
}

/// Segment-at-a-time TDF writer
///
/// Methods take `&self` and serialize on an internal mutex, so one writer
/// can be fed from several threads.
pub struct TdfWriter {
    config: WriterConfig,
    archive: SegmentWriter,
    state: Mutex<WriterState>,
}

impl std::fmt::Debug for TdfWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdfWriter")
            .field("config", &self.config)
            .field("status", &self.archive.status())
            .finish_non_exhaustive()
    }
}

impl TdfWriter {
    /// Create a writer with a fresh payload key
    pub fn new(config: WriterConfig) -> Result<Self, TdfError> {
        let dek = PayloadKey::generate(config.rng.as_ref());
        let cipher = AesGcmCipher::new(dek.as_slice())?;
        Ok(TdfWriter {
            archive: SegmentWriter::new(config.zip64),
            state: Mutex::new(WriterState {
                dek: Some(dek),
                cipher: Some(cipher),
                segments: BTreeMap::new(),
                finalized: None,
            }),
            config,
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Encrypt one segment
    ///
    /// Indices may arrive in any order and may be sparse; each index can be
    /// written once. A failed or canceled call leaves the writer unchanged.
    pub fn write_segment(
        &self,
        index: i64,
        plaintext: &[u8],
        cancel: &CancellationToken,
    ) -> Result<SegmentResult, TdfError> {
        if cancel.is_cancelled() {
            return Err(TdfError::Canceled);
        }
        let mut state = self.lock();
        let (dek, cipher) = match (&state.dek, &state.cipher) {
            (Some(dek), Some(cipher)) => (dek, cipher),
            _ => return Err(ArchiveError::WriterClosed.into()),
        };
        if index < 0 {
            return Err(ArchiveError::InvalidSegment { index }.into());
        }
        if state.segments.contains_key(&index) {
            return Err(ArchiveError::DuplicateSegment { index: index as u64 }.into());
        }

        let ciphertext = cipher.encrypt(plaintext, self.config.rng.as_ref())?;
        let signature = calculate_signature(
            self.config.segment_integrity_algorithm,
            dek.as_slice(),
            &ciphertext,
            self.config.legacy,
        )?;
        let hash = BASE64.encode(signature);
        let crc = crc32::compute(&ciphertext);

        let mut data = self
            .archive
            .write_segment(index, ciphertext.len() as u64, crc)?;
        data.extend_from_slice(&ciphertext);

        state.segments.insert(
            index,
            Segment {
                hash: hash.clone(),
                segment_size: plaintext.len() as i64,
                encrypted_segment_size: ciphertext.len() as i64,
            },
        );

        tracing::debug!(
            index,
            plaintext_size = plaintext.len(),
            encrypted_size = ciphertext.len(),
            "Wrote TDF segment"
        );
        Ok(SegmentResult {
            data,
            index,
            hash,
            plaintext_size: plaintext.len() as u64,
            encrypted_size: ciphertext.len() as u64,
            crc32: crc,
        })
    }

    /// Split and wrap the key, build the manifest and emit the archive trailer
    pub fn finalize(
        &self,
        options: FinalizeOptions,
        cancel: &CancellationToken,
    ) -> Result<FinalizeResult, TdfError> {
        if cancel.is_cancelled() {
            return Err(TdfError::Canceled);
        }
        let mut state = self.lock();
        let dek = state.dek.as_ref().ok_or(ArchiveError::WriterClosed)?;
        if state.segments.is_empty() {
            return Err(ArchiveError::SegmentMissing { index: 0 }.into());
        }

        let attributes = options.attributes.as_ref().unwrap_or(&self.config.attributes);
        let default_kas = options.default_kas.as_ref().unwrap_or(&self.config.default_kas);
        let split = Splitter::new(self.config.rng.clone()).split(dek, attributes, default_kas)?;

        let policy = Policy::new(
            self.policy_uuid(),
            attributes.iter().map(|value| value.fqn.to_url()),
            options.dissem.clone(),
        );
        let policy_b64 = policy.to_base64()?;

        let mut key_access = Vec::new();
        for s in &split.splits {
            for url in &s.kas_urls {
                let public_key = split.kas_public_keys.get(url).ok_or_else(|| {
                    TdfError::InvalidManifest(format!("no public key for KAS {}", url))
                })?;
                key_access.push(self.key_access(
                    s,
                    url,
                    public_key,
                    &policy_b64,
                    options.encrypted_metadata.as_deref(),
                )?);
            }
        }

        let segments: Vec<Segment> = state.segments.values().cloned().collect();
        let (segment_size_default, encrypted_segment_size_default) =
            (segments[0].segment_size, segments[0].encrypted_segment_size);
        let aggregate = aggregate_hash(&segments)?;
        let root = root_signature(
            self.config.integrity_algorithm,
            dek.as_slice(),
            &aggregate,
            self.config.legacy,
        )?;
        let integrity_information = IntegrityInformation {
            root_signature: RootSignature {
                alg: self.config.integrity_algorithm,
                sig: root,
            },
            segment_hash_alg: self.config.segment_integrity_algorithm,
            segment_size_default,
            encrypted_segment_size_default,
            segments,
        };

        let assertions = options
            .assertions
            .iter()
            .map(|config| sign_assertion(config, dek.as_slice(), &aggregate, self.config.legacy))
            .collect::<Result<Vec<_>, _>>()?;

        let manifest = TdfManifest {
            payload: Payload {
                mime_type: Some(
                    options
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                ),
                ..Payload::default()
            },
            encryption_information: EncryptionInformation {
                encryption_type: "split".to_string(),
                policy: policy_b64,
                key_access,
                method: EncryptionMethod::default(),
                integrity_information,
            },
            assertions,
            schema_version: (!self.config.legacy).then(|| TDF_SPEC_VERSION.to_string()),
        };

        let manifest_json = manifest.to_json()?;
        let data = self.archive.finalize(manifest_json.as_bytes())?;

        let total_segments = manifest.encryption_information.integrity_information.segments.len();
        let total_size = manifest
            .encryption_information
            .integrity_information
            .segments
            .iter()
            .map(|s| s.segment_size as u64)
            .sum();
        tracing::info!(
            segments = total_segments,
            key_access_objects = manifest.encryption_information.key_access.len(),
            total_size,
            "Finalized TDF"
        );

        state.dek = None;
        state.cipher = None;
        state.finalized = Some(manifest.clone());
        Ok(FinalizeResult {
            data,
            manifest,
            total_segments,
            total_size,
            encrypted_size: self.archive.total_size(),
        })
    }

    /// Drop the payload key without finalizing; idempotent
    pub fn close(&self) {
        let mut state = self.lock();
        state.dek = None;
        state.cipher = None;
        self.archive.close();
    }

    /// The manifest produced by a successful finalize
    pub fn manifest(&self) -> Option<TdfManifest> {
        self.lock().finalized.clone()
    }

    pub fn segment_count(&self) -> usize {
        self.lock().segments.len()
    }

    fn key_access(
        &self,
        split: &Split,
        url: &str,
        public_key: &KasPublicKey,
        policy_b64: &str,
        metadata: Option<&[u8]>,
    ) -> Result<KeyAccess, TdfError> {
        let share = split.data.as_slice();
        let mut kao = KeyAccess::new(url);
        kao.policy_binding = PolicyBinding::hs256(calculate_policy_binding(policy_b64, share)?);
        kao.kid = public_key.kid.clone();
        kao.split_id = (!split.id.is_empty()).then(|| split.id.clone());
        if self.config.legacy {
            kao.schema_version = None;
        }

        if let Some(metadata) = metadata {
            let sealed = AesGcmCipher::new(share)?.encrypt(metadata, self.config.rng.as_ref())?;
            kao.encrypted_metadata = Some(
                EncryptedMetadata {
                    iv: BASE64.encode(&sealed[..NONCE_SIZE]),
                    ciphertext: BASE64.encode(&sealed),
                }
                .to_base64()?,
            );
        }

        let parsed = parse_public_key_pem(&public_key.pem)?;
        match (public_key.algorithm, parsed) {
            (KeyAlgorithm::RsaOaep | KeyAlgorithm::RsaOaep256, PublicKey::Rsa(key)) => {
                let hash = if public_key.algorithm == KeyAlgorithm::RsaOaep256 {
                    OaepHash::Sha256
                } else {
                    OaepHash::Sha1
                };
                let wrapped = RsaOaepKem::new(hash)
                    .with_rng(self.config.rng.clone())
                    .wrap_with_key(share, &key)?;
                kao.access_type = KeyAccessType::Wrapped;
                kao.wrapped_key = BASE64.encode(wrapped);
            }
            (KeyAlgorithm::EcdhHkdf, PublicKey::Ec(key)) => {
                let wrapped = EcdhKem::new(self.config.rng.clone()).wrap(share, &key)?;
                kao.access_type = KeyAccessType::EcWrapped;
                kao.wrapped_key = BASE64.encode(wrapped.wrapped);
                kao.ephemeral_public_key = Some(wrapped.ephemeral_public_key_pem);
            }
            (alg @ (KeyAlgorithm::RsaOaep | KeyAlgorithm::RsaOaep256 | KeyAlgorithm::EcdhHkdf), _) => {
                return Err(TdfError::UnsupportedAlgorithm(format!(
                    "public key for {} does not match algorithm {}",
                    url,
                    alg.as_str()
                )));
            }
            (alg, _) => return Err(TdfError::UnsupportedAlgorithm(alg.as_str().to_string())),
        }
        Ok(kao)
    }

    fn policy_uuid(&self) -> String {
        let mut bytes = [0u8; 16];
        self.config.rng.fill(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
