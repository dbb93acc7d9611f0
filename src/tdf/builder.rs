//! One-shot TDF API over the streaming writer and reader
//!
//! ```no_run
//! use opentdf_core::keysplit::{KasGrant, KasPublicKey};
//! use opentdf_core::kas::{HttpRewrapTransport, RewrapTransport};
//! use opentdf_core::tdf::Tdf;
//! use opentdf_protocol::KeyAlgorithm;
//! use std::sync::Arc;
//!
//! # async fn example(kas_pem: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let tdf = Tdf::encrypt(b"Sensitive data")
//!     .kas(KasGrant::new("https://kas.example.com")
//!         .with_public_key(KasPublicKey::new(KeyAlgorithm::RsaOaep, kas_pem)))
//!     .mime_type("text/plain")
//!     .to_bytes()?;
//!
//! let transport: Arc<dyn RewrapTransport> =
//!     Arc::new(HttpRewrapTransport::builder().access_token("token").build()?);
//! let plaintext = Tdf::decrypt(tdf).transport(transport).to_bytes().await?;
//! # let _ = plaintext;
//! # Ok(())
//! # }
//! ```

use super::assertion::AssertionConfig;
use super::options::{FinalizeOptions, ReaderConfig, WriterConfig, DEFAULT_SEGMENT_SIZE};
use super::reader::TdfReader;
use super::writer::{FinalizeResult, TdfWriter};
use crate::error::TdfError;
use crate::kas::RewrapTransport;
use crate::keysplit::{AttributeValue, KasGrant};
use crate::zipstream::Zip64Mode;
use opentdf_crypto::RandomSource;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// High-level TDF operations
pub struct Tdf;

impl Tdf {
    /// Encrypt data to TDF format
    pub fn encrypt(data: impl Into<Vec<u8>>) -> TdfEncryptBuilder {
        TdfEncryptBuilder::new(data.into())
    }

    /// Decrypt TDF bytes; a [`RewrapTransport`] is required
    pub fn decrypt(data: impl Into<Vec<u8>>) -> TdfDecryptBuilder {
        TdfDecryptBuilder::new(data.into())
    }
}

/// Builder for encrypting data to TDF format
#[derive(Debug)]
pub struct TdfEncryptBuilder {
    data: Vec<u8>,
    segment_size: usize,
    config: WriterConfig,
    options: FinalizeOptions,
}

impl TdfEncryptBuilder {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            segment_size: DEFAULT_SEGMENT_SIZE,
            config: WriterConfig::default(),
            options: FinalizeOptions::default(),
        }
    }

    /// Set the segment size for encryption (default: 2MB)
    #[must_use]
    pub fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Add a KAS used when no attribute names one
    #[must_use]
    pub fn kas(mut self, grant: KasGrant) -> Self {
        self.config = self.config.default_kas(grant);
        self
    }

    #[must_use]
    pub fn attribute(mut self, value: AttributeValue) -> Self {
        self.config = self.config.attribute(value);
        self
    }

    #[must_use]
    pub fn attributes(mut self, values: Vec<AttributeValue>) -> Self {
        self.config = self.config.attributes(values);
        self
    }

    /// Set the MIME type for the encrypted data
    #[must_use]
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.options = self.options.mime_type(mime_type);
        self
    }

    /// Metadata sealed into every key access object
    #[must_use]
    pub fn metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.options = self.options.encrypted_metadata(metadata);
        self
    }

    #[must_use]
    pub fn assertion(mut self, assertion: AssertionConfig) -> Self {
        self.options = self.options.assertion(assertion);
        self
    }

    #[must_use]
    pub fn zip64(mut self, mode: Zip64Mode) -> Self {
        self.config = self.config.zip64(mode);
        self
    }

    #[must_use]
    pub fn rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.config = self.config.rng(rng);
        self
    }

    /// Replace the writer configuration wholesale
    #[must_use]
    pub fn config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    /// Build and return encrypted TDF as bytes
    pub fn to_bytes(self) -> Result<Vec<u8>, TdfError> {
        let mut out = Vec::with_capacity(self.data.len() + self.data.len() / 16 + 4096);
        self.write_into(&mut out)?;
        Ok(out)
    }

    /// Build and write encrypted TDF to file
    pub fn to_file(self, path: impl AsRef<Path>) -> Result<(), TdfError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn write_into(self, out: &mut Vec<u8>) -> Result<FinalizeResult, TdfError> {
        if self.segment_size == 0 {
            return Err(TdfError::MissingRequiredField {
                field: "segment_size",
            });
        }
        if self.config.default_kas.is_empty() && self.config.attributes.is_empty() {
            return Err(TdfError::MissingRequiredField { field: "kas" });
        }

        let writer = TdfWriter::new(self.config)?;
        let cancel = CancellationToken::new();

        if self.data.is_empty() {
            out.extend(writer.write_segment(0, &[], &cancel)?.data);
        } else {
            for (index, chunk) in self.data.chunks(self.segment_size).enumerate() {
                out.extend(writer.write_segment(index as i64, chunk, &cancel)?.data);
            }
        }

        let result = writer.finalize(self.options, &cancel)?;
        out.extend_from_slice(&result.data);
        Ok(result)
    }
}

/// Builder for decrypting TDF data
pub struct TdfDecryptBuilder {
    data: Vec<u8>,
    transport: Option<Arc<dyn RewrapTransport>>,
    config: ReaderConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TdfDecryptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdfDecryptBuilder")
            .field("len", &self.data.len())
            .field("transport", &self.transport.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl TdfDecryptBuilder {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            transport: None,
            config: ReaderConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the transport used to rewrap key access objects
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn RewrapTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Decrypt and return plaintext as bytes
    pub async fn to_bytes(self) -> Result<Vec<u8>, TdfError> {
        let transport = self
            .transport
            .ok_or(TdfError::MissingRequiredField { field: "transport" })?;

        let mut reader = TdfReader::open_with_config(Cursor::new(self.data), self.config)?;
        reader.unwrap_key(transport.as_ref(), &self.cancel).await?;
        reader.decrypt_all()
    }

    /// Decrypt and write plaintext to file
    pub async fn to_file(self, path: impl AsRef<Path>) -> Result<(), TdfError> {
        let plaintext = self.to_bytes().await?;
        std::fs::write(path, plaintext)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keysplit::KasPublicKey;
    use opentdf_crypto::SeededRandom;
    use opentdf_protocol::KeyAlgorithm;
    use tempfile::NamedTempFile;

    const KAS_RSA_PUBLIC: &str = include_str!("../../tests/fixtures/kas1_rsa_public.pem");

    fn kas() -> KasGrant {
        KasGrant::new("https://kas.example.com")
            .with_public_key(KasPublicKey::new(KeyAlgorithm::RsaOaep, KAS_RSA_PUBLIC))
    }

    #[test]
    fn test_encrypt_segments_payload() -> Result<(), Box<dyn std::error::Error>> {
        let data = vec![0x5au8; 2500];
        let tdf = Tdf::encrypt(data)
            .kas(kas())
            .segment_size(1000)
            .mime_type("text/plain")
            .rng(Arc::new(SeededRandom::from_u64(5)))
            .to_bytes()?;

        let reader = TdfReader::open(Cursor::new(tdf))?;
        assert_eq!(reader.segment_count(), 3);
        assert_eq!(reader.plaintext_size(), 2500);
        assert_eq!(reader.manifest().payload.mime_type.as_deref(), Some("text/plain"));
        Ok(())
    }

    #[test]
    fn test_encrypt_empty_payload() -> Result<(), Box<dyn std::error::Error>> {
        let tdf = Tdf::encrypt(Vec::new()).kas(kas()).to_bytes()?;
        let reader = TdfReader::open(Cursor::new(tdf))?;
        assert_eq!(reader.segment_count(), 1);
        assert_eq!(reader.plaintext_size(), 0);
        Ok(())
    }

    #[test]
    fn test_encrypt_to_file() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        Tdf::encrypt(b"Hello, TDF!".to_vec()).kas(kas()).to_file(file.path())?;
        let bytes = std::fs::read(file.path())?;
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        Ok(())
    }

    #[test]
    fn test_missing_required_fields() {
        let err = Tdf::encrypt(b"data".to_vec()).to_bytes().unwrap_err();
        assert!(matches!(err, TdfError::MissingRequiredField { field: "kas" }));

        let err = Tdf::encrypt(b"data".to_vec())
            .kas(kas())
            .segment_size(0)
            .to_bytes()
            .unwrap_err();
        assert!(matches!(err, TdfError::MissingRequiredField { field: "segment_size" }));
    }

    #[tokio::test]
    async fn test_decrypt_requires_transport() {
        let tdf = Tdf::encrypt(b"data".to_vec()).kas(kas()).to_bytes().unwrap();
        let err = Tdf::decrypt(tdf).to_bytes().await.unwrap_err();
        assert!(matches!(err, TdfError::MissingRequiredField { field: "transport" }));
    }
}
