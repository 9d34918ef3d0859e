// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-fingerprint → accountId stickiness, backed by a TTL'd KV entry.

use std::sync::Arc;

use crate::keystore::{keys, KvError, KvStore};

/// Sticky-session TTL: refreshed on every lookup hit.
const STICKY_TTL_SECS: u64 = 3600;

pub struct StickySessions {
    kv: Arc<dyn KvStore>,
}

impl StickySessions {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn lookup(&self, fingerprint: &str) -> Result<Option<String>, KvError> {
        self.kv.get(&keys::session_sticky(fingerprint)).await
    }

    pub async fn bind(&self, fingerprint: &str, account_id: &str) -> Result<(), KvError> {
        self.kv.set(&keys::session_sticky(fingerprint), account_id, Some(STICKY_TTL_SECS)).await
    }

    /// Extend the TTL on an existing sticky mapping without changing its
    /// target, as spec'd ("refresh TTL to 1h" on a hit).
    pub async fn refresh(&self, fingerprint: &str, account_id: &str) -> Result<(), KvError> {
        self.bind(fingerprint, account_id).await
    }
}

#[cfg(test)]
#[path = "sticky_tests.rs"]
mod sticky_tests;
