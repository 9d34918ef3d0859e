// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned AES-256-GCM envelope for OAuth material at rest.

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use serde::{Deserialize, Serialize};

/// Current envelope format version. Bump when the AEAD algorithm or framing
/// changes; decryption dispatches on this field.
const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("encryption key must be exactly 32 bytes, got {0}")]
    BadKeyLength(usize),
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("seal failed")]
    SealFailed,
    #[error("open failed (wrong key or tampered ciphertext)")]
    OpenFailed,
    #[error("random generation failed")]
    RandomFailed,
}

/// A versioned, self-describing encrypted blob.
///
/// `iv` is a 12-byte GCM nonce, fresh per encryption. `ciphertext` includes
/// the authentication tag appended by `ring`, matching its `seal_in_place`
/// convention, so there is no separate `tag` field to carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    pub iv: String,
    pub ciphertext: String,
}

/// A 32-byte AES-256-GCM key, held by the OAuth Lifecycle Manager only.
pub struct EncryptionKey(LessSafeKey);

impl EncryptionKey {
    pub fn from_bytes(key: &[u8]) -> Result<Self, EnvelopeError> {
        if key.len() != 32 {
            return Err(EnvelopeError::BadKeyLength(key.len()));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| EnvelopeError::BadKeyLength(key.len()))?;
        Ok(Self(LessSafeKey::new(unbound)))
    }

    /// Encrypt `plaintext` into a versioned envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, EnvelopeError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        ring::rand::SecureRandom::fill(&ring::rand::SystemRandom::new(), &mut nonce_bytes)
            .map_err(|_| EnvelopeError::RandomFailed)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.0
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| EnvelopeError::SealFailed)?;

        Ok(Envelope {
            version: ENVELOPE_VERSION,
            iv: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, nonce_bytes),
            ciphertext: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &in_out),
        })
    }

    /// Decrypt a versioned envelope back to plaintext.
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(envelope.version));
        }
        let iv = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &envelope.iv)
            .map_err(|_| EnvelopeError::OpenFailed)?;
        let nonce_bytes: [u8; NONCE_LEN] =
            iv.try_into().map_err(|_| EnvelopeError::OpenFailed)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &envelope.ciphertext)
                .map_err(|_| EnvelopeError::OpenFailed)?;

        let plaintext = self
            .0
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| EnvelopeError::OpenFailed)?;
        Ok(plaintext.to_vec())
    }

    /// Convenience: seal a UTF-8 string.
    pub fn seal_str(&self, plaintext: &str) -> Result<Envelope, EnvelopeError> {
        self.seal(plaintext.as_bytes())
    }

    /// Convenience: open back into a UTF-8 string.
    pub fn open_str(&self, envelope: &Envelope) -> Result<String, EnvelopeError> {
        let bytes = self.open(envelope)?;
        String::from_utf8(bytes).map_err(|_| EnvelopeError::OpenFailed)
    }
}

/// Derive a 32-byte AES-256-GCM key from an arbitrary-length configured
/// secret. The config contract requires >= 32 bytes of entropy in the
/// secret, not in its literal length, so this hashes rather than truncates.
pub fn derive_key(secret: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(secret.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod envelope_tests;
