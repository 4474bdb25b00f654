//! Encryption provider and the encrypting wrappers around the batch codec.
//!
//! Batch files stay appendable: each event payload is encrypted on its own and
//! then framed by the plain codec. Single-blob files (batch metadata,
//! datastore records) are encrypted as a whole and can only be overwritten.

use std::path::Path;
use std::sync::Arc;

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::batch_codec::{
    BatchFileReaderWriter, FileReaderWriter, PlainBatchFileReaderWriter, PlainFileReaderWriter,
    RawBatchEvent,
};
use crate::error::{StorageError, StorageResult};

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts opaque byte buffers.
pub trait Encryption: Send + Sync {
    /// Encrypts `plaintext`.
    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>>;
    /// Decrypts `ciphertext` produced by [`Encryption::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> StorageResult<Vec<u8>>;
}

/// Key material for [`AeadEncryption`], wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

/// Cipher used by [`AeadEncryption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    /// AES-256-GCM
    #[default]
    AesGcm256,
    /// ChaCha20-Poly1305, for devices without AES instructions
    ChaCha20Poly1305,
}

/// Per-feature key derived from `master_key` with HKDF-SHA256.
pub fn derive_feature_key(master_key: &EncryptionKey, feature: &str) -> EncryptionKey {
    let hk = Hkdf::<Sha256>::new(None, &master_key.0);
    let mut okm = [0u8; 32];
    let mut info = Vec::with_capacity(16 + feature.len());
    info.extend_from_slice(b"eventspool-feature");
    info.extend_from_slice(feature.as_bytes());
    hk.expand(&info, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    EncryptionKey(okm)
}

fn random_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// AEAD provider. Output layout is `[nonce:12][ciphertext + tag]`.
#[derive(Debug, Clone)]
pub struct AeadEncryption {
    key: EncryptionKey,
    algo: EncryptionAlgorithm,
}

impl AeadEncryption {
    /// Provider using `key` with `algo`.
    pub fn new(key: EncryptionKey, algo: EncryptionAlgorithm) -> Self {
        Self { key, algo }
    }
}

impl Encryption for AeadEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let nonce = random_nonce();
        let ciphertext = match self.algo {
            EncryptionAlgorithm::AesGcm256 => {
                let cipher = Aes256Gcm::new_from_slice(&self.key.0)
                    .map_err(|e| StorageError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
                    .map_err(|e| StorageError::Encryption(e.to_string()))?
            }
            EncryptionAlgorithm::ChaCha20Poly1305 => {
                use chacha20poly1305::aead::Aead as _;
                use chacha20poly1305::KeyInit as _;
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key.0)
                    .map_err(|e| StorageError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
                    .map_err(|e| StorageError::Encryption(e.to_string()))?
            }
        };
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> StorageResult<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(StorageError::Encryption("ciphertext shorter than nonce".to_string()));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        match self.algo {
            EncryptionAlgorithm::AesGcm256 => {
                let cipher = Aes256Gcm::new_from_slice(&self.key.0)
                    .map_err(|e| StorageError::Encryption(e.to_string()))?;
                cipher
                    .decrypt(aes_gcm::Nonce::from_slice(nonce), body)
                    .map_err(|_| StorageError::Encryption("authentication tag mismatch".to_string()))
            }
            EncryptionAlgorithm::ChaCha20Poly1305 => {
                use chacha20poly1305::aead::Aead as _;
                use chacha20poly1305::KeyInit as _;
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key.0)
                    .map_err(|e| StorageError::Encryption(e.to_string()))?;
                cipher
                    .decrypt(chacha20poly1305::Nonce::from_slice(nonce), body)
                    .map_err(|_| StorageError::Encryption("authentication tag mismatch".to_string()))
            }
        }
    }
}

fn encrypt_non_empty(encryption: &dyn Encryption, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
    let encrypted = encryption.encrypt(plaintext)?;
    if encrypted.is_empty() {
        return Err(StorageError::Encryption(
            "empty ciphertext is indistinguishable from missing data".to_string(),
        ));
    }
    Ok(encrypted)
}

/// Encrypts each event individually, then frames it with the plain codec.
pub struct EncryptedBatchReaderWriter {
    encryption: Arc<dyn Encryption>,
    delegate: PlainBatchFileReaderWriter,
}

impl EncryptedBatchReaderWriter {
    /// Wraps the plain codec with `encryption`.
    pub fn new(encryption: Arc<dyn Encryption>) -> Self {
        Self {
            encryption,
            delegate: PlainBatchFileReaderWriter,
        }
    }

    fn encrypt_event(&self, event: &RawBatchEvent) -> StorageResult<RawBatchEvent> {
        let metadata = if event.metadata.is_empty() {
            Vec::new()
        } else {
            encrypt_non_empty(self.encryption.as_ref(), &event.metadata)?
        };
        Ok(RawBatchEvent {
            data: encrypt_non_empty(self.encryption.as_ref(), &event.data)?,
            metadata,
        })
    }

    fn decrypt_event(&self, event: RawBatchEvent) -> StorageResult<RawBatchEvent> {
        let metadata = if event.metadata.is_empty() {
            Vec::new()
        } else {
            self.encryption.decrypt(&event.metadata)?
        };
        Ok(RawBatchEvent {
            data: self.encryption.decrypt(&event.data)?,
            metadata,
        })
    }
}

impl BatchFileReaderWriter for EncryptedBatchReaderWriter {
    fn write_event(&self, file: &Path, event: &RawBatchEvent, append: bool) -> bool {
        match self.encrypt_event(event) {
            Ok(encrypted) => self.delegate.write_event(file, &encrypted, append),
            Err(e) => {
                error!(path = %file.display(), error = %e, "failed to encrypt batch event, write aborted");
                false
            }
        }
    }

    fn read_events(&self, file: &Path) -> Vec<RawBatchEvent> {
        let mut events = Vec::new();
        for event in self.delegate.read_events(file) {
            match self.decrypt_event(event) {
                Ok(decrypted) => events.push(decrypted),
                Err(e) => {
                    error!(path = %file.display(), error = %e, "failed to decrypt batch event, skipping it");
                }
            }
        }
        events
    }
}

/// Whole-file encryption around the plain single-blob reader/writer.
pub struct EncryptedFileReaderWriter {
    encryption: Arc<dyn Encryption>,
    delegate: PlainFileReaderWriter,
}

impl EncryptedFileReaderWriter {
    /// Wraps the plain reader/writer with `encryption`.
    pub fn new(encryption: Arc<dyn Encryption>) -> Self {
        Self {
            encryption,
            delegate: PlainFileReaderWriter,
        }
    }
}

impl FileReaderWriter for EncryptedFileReaderWriter {
    fn write_data(&self, file: &Path, data: &[u8], append: bool) -> bool {
        if append {
            let err = StorageError::AppendNotSupported {
                path: file.to_path_buf(),
            };
            error!(error = %err, "refusing append write to encrypted file");
            return false;
        }
        match encrypt_non_empty(self.encryption.as_ref(), data) {
            Ok(encrypted) => self.delegate.write_data(file, &encrypted, false),
            Err(e) => {
                error!(path = %file.display(), error = %e, "failed to encrypt file, write aborted");
                false
            }
        }
    }

    fn read_data(&self, file: &Path) -> Vec<u8> {
        let raw = self.delegate.read_data(file);
        if raw.is_empty() {
            return raw;
        }
        match self.encryption.decrypt(&raw) {
            Ok(plain) => plain,
            Err(e) => {
                error!(path = %file.display(), error = %e, "failed to decrypt file");
                Vec::new()
            }
        }
    }
}

/// Picks the batch codec for an optional provider.
pub fn batch_reader_writer(encryption: Option<Arc<dyn Encryption>>) -> Arc<dyn BatchFileReaderWriter> {
    match encryption {
        Some(encryption) => Arc::new(EncryptedBatchReaderWriter::new(encryption)),
        None => Arc::new(PlainBatchFileReaderWriter),
    }
}

/// Picks the single-blob reader/writer for an optional provider.
pub fn file_reader_writer(encryption: Option<Arc<dyn Encryption>>) -> Arc<dyn FileReaderWriter> {
    match encryption {
        Some(encryption) => Arc::new(EncryptedFileReaderWriter::new(encryption)),
        None => Arc::new(PlainFileReaderWriter),
    }
}
