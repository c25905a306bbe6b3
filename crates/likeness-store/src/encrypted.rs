//! AES-256-GCM encryption of stored values.
//!
//! Values are sealed into a JSON envelope before reaching the inner
//! backend. Each write uses a fresh random nonce.

use std::string::FromUtf8Error;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose, Engine as _};
use likeness_core::{BackendError, KeyValueStore};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const ENVELOPE_VERSION: u32 = 1;
const ENVELOPE_ALGORITHM: &str = "AES-256-GCM";
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("value is not an encrypted envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported envelope algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("invalid base64 in envelope: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("expected a 12-byte nonce, found {0}")]
    NonceLength(usize),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed — wrong passphrase or tampered data")]
    Decrypt,
    #[error("decrypted value is not UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

impl From<CryptoError> for BackendError {
    fn from(err: CryptoError) -> Self {
        BackendError::new("encrypted store", err)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    algorithm: String,
    nonce: String,
    ciphertext: String,
}

/// Wraps a backend so that it only ever sees ciphertext.
pub struct EncryptedStore<S> {
    inner: S,
    cipher: Aes256Gcm,
}

impl<S> EncryptedStore<S> {
    pub fn new(inner: S, key: &[u8; 32]) -> Self {
        Self {
            inner,
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Derive the key as SHA-256 of `passphrase`.
    pub fn with_passphrase(inner: S, passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        Self {
            inner,
            cipher: Aes256Gcm::new(&digest),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            algorithm: ENVELOPE_ALGORITHM.to_string(),
            nonce: general_purpose::STANDARD.encode(nonce),
            ciphertext: general_purpose::STANDARD.encode(ciphertext),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    fn unseal(&self, sealed: &str) -> Result<String, CryptoError> {
        let envelope: Envelope = serde_json::from_str(sealed)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(envelope.version));
        }
        if envelope.algorithm != ENVELOPE_ALGORITHM {
            return Err(CryptoError::UnsupportedAlgorithm(envelope.algorithm));
        }

        let nonce = general_purpose::STANDARD.decode(envelope.nonce.trim())?;
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::NonceLength(nonce.len()));
        }
        let ciphertext = general_purpose::STANDARD.decode(envelope.ciphertext.trim())?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

impl<S: KeyValueStore> KeyValueStore for EncryptedStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        match self.inner.get(key)? {
            Some(sealed) => Ok(Some(self.unseal(&sealed)?)),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        let sealed = self.seal(value)?;
        self.inner.set(key, &sealed)
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.inner.remove(key)
    }
}
