//! Payload codecs applied between a provider's snapshot bytes and storage.
//!
//! Digests are computed over the encoded bytes, so tampering with stored
//! data is caught before any decode is attempted.

use crate::error::{CheckpointError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

const NONCE_LEN: usize = 12;

pub trait PayloadCodec: Send + Sync {
    fn name(&self) -> &str;

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn compresses(&self) -> bool {
        false
    }

    fn encrypts(&self) -> bool {
        false
    }
}

/// Stores payloads unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityCodec;

impl PayloadCodec for IdentityCodec {
    fn name(&self) -> &str {
        "identity"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Gzip compression.
#[derive(Clone, Copy, Debug)]
pub struct GzipCodec {
    level: u32,
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl PayloadCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| CheckpointError::Codec(format!("gzip encode: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| CheckpointError::Codec(format!("gzip encode: {}", e)))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CheckpointError::Codec(format!("gzip decode: {}", e)))?;
        Ok(out)
    }

    fn compresses(&self) -> bool {
        true
    }
}

/// AES-256-GCM. Each payload is stored as `nonce || ciphertext` with a fresh
/// random nonce.
#[derive(Clone)]
pub struct AesGcmCodec {
    key: [u8; 32],
}

impl AesGcmCodec {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Codec with a random key. Payloads are unreadable once it is dropped.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CheckpointError::Codec(format!("aes-gcm key: {}", e)))
    }
}

impl fmt::Debug for AesGcmCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmCodec").finish_non_exhaustive()
    }
}

impl PayloadCodec for AesGcmCodec {
    fn name(&self) -> &str {
        "aes-256-gcm"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), data)
            .map_err(|e| CheckpointError::Codec(format!("aes-gcm encrypt: {}", e)))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(CheckpointError::Codec("aes-gcm payload shorter than nonce".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CheckpointError::Codec(format!("aes-gcm decrypt: {}", e)))
    }

    fn encrypts(&self) -> bool {
        true
    }
}

/// Ordered codecs: encode applies them first to last, decode last to first.
#[derive(Clone, Default)]
pub struct CodecChain {
    codecs: Vec<Arc<dyn PayloadCodec>>,
    name: String,
}

impl CodecChain {
    pub fn identity() -> Self {
        Self {
            codecs: Vec::new(),
            name: "identity".into(),
        }
    }

    pub fn then(mut self, codec: impl PayloadCodec + 'static) -> Self {
        self.codecs.push(Arc::new(codec));
        self.name = self
            .codecs
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join("+");
        self
    }

    pub fn name(&self) -> &str {
        if self.codecs.is_empty() {
            "identity"
        } else {
            &self.name
        }
    }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        for codec in &self.codecs {
            buf = codec.encode(&buf)?;
        }
        Ok(buf)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        for codec in self.codecs.iter().rev() {
            buf = codec.decode(&buf)?;
        }
        Ok(buf)
    }

    pub fn compresses(&self) -> bool {
        self.codecs.iter().any(|c| c.compresses())
    }

    pub fn encrypts(&self) -> bool {
        self.codecs.iter().any(|c| c.encrypts())
    }
}

impl fmt::Debug for CodecChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodecChain({})", self.name())
    }
}
