// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Issue/validate/meter self-issued API keys.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::crypto::{constant_time_eq, random_token, sha256_hex};
use crate::keystore::{keys, KvStore};

use super::{ApiKeyRecord, ApiKeyState, IssueSpec, IssuedKey, OverdrawPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ApiKeyServiceError {
    #[error("quotas are invalid")]
    InvalidQuota,
    #[error("key is unknown or malformed")]
    Unauthorized,
    #[error("key is disabled")]
    Disabled,
    #[error("key is expired")]
    Expired,
    #[error("kv store error: {0}")]
    Kv(#[from] crate::keystore::KvError),
}

/// Plaintext format guard: `^(sk_|cr_|pk_)[A-Za-z0-9_]{17,253}$`.
///
/// Defends against injection of raw key material into logs/URLs by
/// rejecting anything that doesn't look like a key before it's ever hashed
/// or looked up.
fn matches_plaintext_guard(s: &str) -> bool {
    let Some(rest) = s.strip_prefix("sk_").or_else(|| s.strip_prefix("cr_")).or_else(|| s.strip_prefix("pk_"))
    else {
        return false;
    };
    (17..=253).contains(&rest.len()) && rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

pub struct ApiKeyService {
    kv: Arc<dyn KvStore>,
}

impl ApiKeyService {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Issue a new key. `plaintext` is returned exactly once; only its hash
    /// is ever persisted.
    pub async fn issue(&self, spec: IssueSpec) -> Result<IssuedKey, ApiKeyServiceError> {
        if !spec.quotas.is_valid() {
            return Err(ApiKeyServiceError::InvalidQuota);
        }

        let id = Uuid::new_v4().to_string();
        let plaintext = random_token("cr").map_err(|_| ApiKeyServiceError::InvalidQuota)?;
        debug_assert!(matches_plaintext_guard(&plaintext));
        let hash = sha256_hex(&plaintext);

        let record = ApiKeyRecord {
            id: id.clone(),
            hash: hash.clone(),
            display_name: spec.display_name,
            owner_ref: spec.owner_ref,
            quotas: spec.quotas,
            daily_cost_limit: spec.daily_cost_limit,
            allowed_model_patterns: spec.allowed_model_patterns,
            dedicated_binding: spec.dedicated_binding,
            group_binding: spec.group_binding,
            state: ApiKeyState::Active,
            created_at: epoch_secs(),
            last_used_at: 0,
            expires_at: spec.expires_at,
            overdrawn: false,
            overdraw_policy: spec.overdraw_policy,
            balance_tracked: spec.initial_balance.is_some(),
        };

        self.put(&record).await?;
        // Write-only hash index: readers never observe a partial write since
        // this follows the record write — a race where validate runs between
        // the two writes just sees the key as not-yet-issued, which is a
        // correct outcome (not usable until the index entry lands).
        self.kv.set(&keys::api_key_hash_index(&hash), &id, None).await?;
        if let Some(balance) = spec.initial_balance {
            self.kv.set(&keys::credit_balance(&id), &balance.to_string(), None).await?;
        }

        Ok(IssuedKey { id, plaintext, hash })
    }

    /// Validate a plaintext key: recompute its hash, look up the hash
    /// index, and compare in constant time before returning the record.
    pub async fn validate(&self, plaintext: &str) -> Result<ApiKeyRecord, ApiKeyServiceError> {
        if !matches_plaintext_guard(plaintext) {
            return Err(ApiKeyServiceError::Unauthorized);
        }

        let hash = sha256_hex(plaintext);
        let Some(id) = self.kv.get(&keys::api_key_hash_index(&hash)).await? else {
            return Err(ApiKeyServiceError::Unauthorized);
        };

        let record = self.get(&id).await?;
        if !constant_time_eq(&record.hash, &hash) {
            return Err(ApiKeyServiceError::Unauthorized);
        }

        match record.state {
            ApiKeyState::Disabled => return Err(ApiKeyServiceError::Disabled),
            ApiKeyState::Expired => return Err(ApiKeyServiceError::Expired),
            ApiKeyState::Active if record.is_expired(epoch_secs()) => {
                return Err(ApiKeyServiceError::Expired)
            }
            ApiKeyState::Active => {}
        }

        self.bump_last_used(&record.id);
        Ok(record)
    }

    /// Fire-and-forget `lastUsedAt` bump; must never block the request path.
    fn bump_last_used(&self, id: &str) {
        let kv = Arc::clone(&self.kv);
        let id = id.to_owned();
        tokio::spawn(async move {
            let key = keys::api_key(&id);
            if let Ok(mut fields) = kv.hash_get_all(&key).await {
                if let Some(data) = fields.remove("data") {
                    if let Ok(mut record) = serde_json::from_str::<ApiKeyRecord>(&data) {
                        record.last_used_at = epoch_secs();
                        if let Ok(updated) = serde_json::to_string(&record) {
                            let _ = kv.hash_set(&key, &[("data", updated.as_str())], None).await;
                        }
                    }
                }
            }
        });
    }

    pub async fn get(&self, id: &str) -> Result<ApiKeyRecord, ApiKeyServiceError> {
        let fields = self.kv.hash_get_all(&keys::api_key(id)).await?;
        let data = fields.get("data").ok_or(ApiKeyServiceError::Unauthorized)?;
        serde_json::from_str(data).map_err(|_| ApiKeyServiceError::Unauthorized)
    }

    pub async fn put(&self, record: &ApiKeyRecord) -> Result<(), ApiKeyServiceError> {
        let data = serde_json::to_string(record).map_err(|_| ApiKeyServiceError::InvalidQuota)?;
        self.kv.hash_set(&keys::api_key(&record.id), &[("data", data.as_str())], None).await?;
        Ok(())
    }

    /// Revoke: flips state to disabled and removes the hash index entry so
    /// a fresh lookup returns absent immediately.
    pub async fn revoke(&self, id: &str) -> Result<(), ApiKeyServiceError> {
        let mut record = self.get(id).await?;
        record.state = ApiKeyState::Disabled;
        self.kv.delete(&keys::api_key_hash_index(&record.hash)).await?;
        self.put(&record).await
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod service_tests;
