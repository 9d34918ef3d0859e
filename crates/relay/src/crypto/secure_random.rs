// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secure random issuance for API key plaintext material.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};

#[derive(Debug, thiserror::Error)]
#[error("secure random generation failed")]
pub struct SecureRandomError;

/// Generate a key plaintext: `{prefix}_{32 random bytes, url-safe base64}`.
///
/// Matches the API-key plaintext guard `^(sk_|cr_|pk_)[A-Za-z0-9_]{17,253}$` —
/// URL-safe-no-pad base64 of 32 bytes yields 43 chars of `[A-Za-z0-9_-]`; only
/// `-` needs substitution, since `_` is already in the guard's alphabet.
pub fn random_token(prefix: &str) -> Result<String, SecureRandomError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|_| SecureRandomError)?;
    let encoded = URL_SAFE_NO_PAD.encode(bytes).replace('-', "x");
    Ok(format!("{prefix}_{encoded}"))
}

#[cfg(test)]
#[path = "secure_random_tests.rs"]
mod secure_random_tests;
