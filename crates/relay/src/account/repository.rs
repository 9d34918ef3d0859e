// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CRUD over upstream accounts and groups, stored as KV hash maps.

use std::sync::Arc;

use crate::keystore::{keys, KvStore};

use super::{AccountGroup, UpstreamAccount};

#[derive(Debug, thiserror::Error)]
pub enum AccountRepositoryError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("group not found: {0}")]
    GroupNotFound(String),
    #[error("kv store error: {0}")]
    Kv(#[from] crate::keystore::KvError),
    #[error("corrupt account record for {0}: {1}")]
    Corrupt(String, String),
}

/// Repository over [`UpstreamAccount`]/[`AccountGroup`] records. Records are
/// stored whole as a single JSON blob under the `account:{id}` hash field
/// `data`, rather than field-per-hash-key — the encrypted envelope is opaque
/// to every reader except the OAuth manager anyway, so there is nothing to
/// gain from exploding it across hash fields.
pub struct AccountRepository {
    kv: Arc<dyn KvStore>,
}

impl AccountRepository {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, id: &str) -> Result<UpstreamAccount, AccountRepositoryError> {
        let fields = self.kv.hash_get_all(&keys::account(id)).await?;
        let Some(data) = fields.get("data") else {
            return Err(AccountRepositoryError::NotFound(id.to_owned()));
        };
        serde_json::from_str(data).map_err(|e| AccountRepositoryError::Corrupt(id.to_owned(), e.to_string()))
    }

    pub async fn put(&self, account: &UpstreamAccount) -> Result<(), AccountRepositoryError> {
        let data = serde_json::to_string(account)
            .map_err(|e| AccountRepositoryError::Corrupt(account.id.clone(), e.to_string()))?;
        self.kv.hash_set(&keys::account(&account.id), &[("data", data.as_str())], None).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), AccountRepositoryError> {
        self.kv.delete(&keys::account(id)).await?;
        Ok(())
    }

    /// List all account ids currently persisted. Best-effort (keyspace scan).
    pub async fn list_ids(&self) -> Result<Vec<String>, AccountRepositoryError> {
        let raw = self.kv.scan_prefix("account:").await?;
        Ok(raw
            .into_iter()
            .filter_map(|k| k.strip_prefix("account:").map(str::to_owned))
            // "account_group:*" also matches the "account:" prefix search is
            // exact-prefix so this can't happen, but guard anyway for safety
            // against a future key-layout change.
            .filter(|id| !id.is_empty())
            .collect())
    }

    pub async fn list_all(&self) -> Result<Vec<UpstreamAccount>, AccountRepositoryError> {
        let mut out = Vec::new();
        for id in self.list_ids().await? {
            out.push(self.get(&id).await?);
        }
        Ok(out)
    }

    pub async fn get_group(&self, id: &str) -> Result<AccountGroup, AccountRepositoryError> {
        let fields = self.kv.hash_get_all(&keys::account_group(id)).await?;
        let Some(data) = fields.get("data") else {
            return Err(AccountRepositoryError::GroupNotFound(id.to_owned()));
        };
        serde_json::from_str(data).map_err(|e| AccountRepositoryError::Corrupt(id.to_owned(), e.to_string()))
    }

    pub async fn put_group(&self, group: &AccountGroup) -> Result<(), AccountRepositoryError> {
        let data = serde_json::to_string(group)
            .map_err(|e| AccountRepositoryError::Corrupt(group.id.clone(), e.to_string()))?;
        self.kv.hash_set(&keys::account_group(&group.id), &[("data", data.as_str())], None).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod repository_tests;
