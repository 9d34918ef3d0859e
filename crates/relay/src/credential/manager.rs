// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth Lifecycle Manager: `EnsureFresh`, refresh-lock coalescing, and the
//! account state machine described by the account status transitions.
//!
//! The manager is the only component that ever calls [`crate::crypto::Envelope`]
//! decryption on a token envelope. Everything else calls [`CredentialManager::ensure_fresh`]
//! and receives a plaintext access token or a tagged, non-exceptional outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::account::{AccountRepository, AccountRepositoryError, AccountStatus, UpstreamAccount};
use crate::credential::oauth::TokenResponse;
use crate::credential::refresh::{refresh_with_retries, RefreshError};
use crate::credential::{refresh_skew_secs, AccountEvent};
use crate::crypto::envelope::{EncryptionKey, EnvelopeError};
use crate::health::Metrics;
use crate::keystore::{keys, KvError, KvStore};

#[derive(Debug, thiserror::Error)]
pub enum EnsureFreshError {
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("account is unauthorized, reauth required: {0}")]
    AccountUnauthorized(String),
    #[error("refresh failed transiently, retry eligible: {0}")]
    RefreshTransient(String),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("kv store error: {0}")]
    Kv(#[from] KvError),
    #[error("account repository error: {0}")]
    Repository(#[from] AccountRepositoryError),
}

/// Bound on how long a caller that lost the refresh-lock race waits before
/// re-reading the envelope and giving up.
const LOCK_WAIT_BOUND: Duration = Duration::from_secs(5);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// TTL on the refresh lock itself: long enough to cover a slow upstream, but
/// short enough that a crashed holder doesn't wedge the account forever.
const REFRESH_LOCK_TTL_SECS: u64 = 20;
const MAX_REFRESH_RETRIES: u32 = 3;

pub struct CredentialManager {
    kv: Arc<dyn KvStore>,
    accounts: Arc<AccountRepository>,
    encryption_key: Arc<EncryptionKey>,
    http_clients: RwLock<HashMap<String, reqwest::Client>>,
    event_tx: broadcast::Sender<AccountEvent>,
    metrics: Arc<Metrics>,
}

impl CredentialManager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        accounts: Arc<AccountRepository>,
        encryption_key: Arc<EncryptionKey>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        Arc::new(Self { kv, accounts, encryption_key, http_clients: RwLock::new(HashMap::new()), event_tx, metrics })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.event_tx.subscribe()
    }

    /// Return a usable access token for `account_id`, refreshing it first if
    /// it's within the skew window of expiry.
    pub async fn ensure_fresh(&self, account_id: &str) -> Result<String, EnsureFreshError> {
        self.ensure_fresh_inner(account_id, false).await
    }

    /// Force a refresh regardless of the skew window. Used by the relay
    /// engine when upstream rejects the cached token with a `401` — the
    /// envelope is stale by upstream's judgment even if our clock thinks
    /// otherwise.
    pub async fn force_refresh(&self, account_id: &str) -> Result<String, EnsureFreshError> {
        self.ensure_fresh_inner(account_id, true).await
    }

    async fn ensure_fresh_inner(&self, account_id: &str, force: bool) -> Result<String, EnsureFreshError> {
        let account = match self.accounts.get(account_id).await {
            Ok(account) => account,
            Err(AccountRepositoryError::NotFound(id)) => return Err(EnsureFreshError::AccountNotFound(id)),
            Err(e) => return Err(e.into()),
        };

        if !force {
            if let Some(token) = self.fresh_token_or_none(&account)? {
                return Ok(token);
            }
        }

        let lock_key = keys::refresh_lock(account_id);
        let holder = Uuid::new_v4().to_string();
        let acquired = self.kv.set_if_absent(&lock_key, &holder, REFRESH_LOCK_TTL_SECS).await?;

        if acquired {
            let result = self.do_refresh_locked(&account).await;
            self.kv.delete(&lock_key).await?;
            return result;
        }

        // Another process holds the lock. Poll bounded by LOCK_WAIT_BOUND,
        // re-reading the envelope each time, then re-read once more either
        // way before giving up.
        let deadline = tokio::time::Instant::now() + LOCK_WAIT_BOUND;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
            let account = self.accounts.get(account_id).await?;
            if let Some(token) = self.fresh_token_or_none(&account)? {
                return Ok(token);
            }
        }

        let account = self.accounts.get(account_id).await?;
        match account.state {
            AccountStatus::Unauthorized => Err(EnsureFreshError::AccountUnauthorized(account_id.to_owned())),
            _ => self
                .fresh_token_or_none(&account)?
                .ok_or_else(|| EnsureFreshError::RefreshTransient("refresh lock wait exceeded bound".to_owned())),
        }
    }

    /// If the current envelope is still valid under the skew, decrypt and
    /// return it; otherwise `None` — a data condition, not an error.
    fn fresh_token_or_none(&self, account: &UpstreamAccount) -> Result<Option<String>, EnsureFreshError> {
        let now = epoch_secs();
        if now + refresh_skew_secs() < account.credential.expires_at {
            let token = self.encryption_key.open_str(&account.credential.access_token)?;
            return Ok(Some(token));
        }
        Ok(None)
    }

    /// Perform the refresh while holding the lock. Re-checks freshness first
    /// in case another process refreshed between our initial read and lock
    /// acquisition.
    async fn do_refresh_locked(&self, stale: &UpstreamAccount) -> Result<String, EnsureFreshError> {
        let account = self.accounts.get(&stale.id).await?;
        if let Some(token) = self.fresh_token_or_none(&account)? {
            return Ok(token);
        }

        let refresh_token = match &account.credential.refresh_token {
            Some(envelope) => self.encryption_key.open_str(envelope)?,
            None => {
                return Err(EnsureFreshError::AccountUnauthorized(format!(
                    "{} has no refresh token on file",
                    account.id
                )))
            }
        };

        let client = self.client_for(&account).await;
        let token_url = provider_token_url(&account)
            .ok_or_else(|| EnsureFreshError::RefreshTransient("no token_url configured".to_owned()))?;
        let client_id = provider_client_id(&account).unwrap_or_default();

        match refresh_with_retries(&client, &token_url, &client_id, &refresh_token, MAX_REFRESH_RETRIES)
            .await
        {
            Ok(token) => self.commit_refresh(account, token).await,
            Err(RefreshError::InvalidGrant(msg)) => {
                self.metrics.inc_refresh_failures();
                let mut account = account;
                account.state = AccountStatus::Unauthorized;
                account.last_error = Some(msg.clone());
                self.accounts.put(&account).await?;
                let _ = self
                    .event_tx
                    .send(AccountEvent::Unauthorized { account_id: account.id.clone() });
                Err(EnsureFreshError::AccountUnauthorized(msg))
            }
            Err(RefreshError::Transient(msg)) => {
                self.metrics.inc_refresh_failures();
                let _ = self.event_tx.send(AccountEvent::RefreshFailed {
                    account_id: account.id.clone(),
                    error: msg.clone(),
                });
                Err(EnsureFreshError::RefreshTransient(msg))
            }
        }
    }

    async fn commit_refresh(
        &self,
        mut account: UpstreamAccount,
        token: TokenResponse,
    ) -> Result<String, EnsureFreshError> {
        let expires_at = epoch_secs() + token.expires_in;
        account.credential.access_token = self.encryption_key.seal_str(&token.access_token)?;
        if let Some(rt) = &token.refresh_token {
            account.credential.refresh_token = Some(self.encryption_key.seal_str(rt)?);
        }
        account.credential.expires_at = expires_at;
        account.state = AccountStatus::Active;
        account.last_error = None;
        self.accounts.put(&account).await?;

        self.metrics.inc_refreshes();
        let _ = self.event_tx.send(AccountEvent::Refreshed { account_id: account.id.clone(), expires_at });
        tracing::info!(account = %account.id, expires_at, "credential refreshed");
        Ok(token.access_token)
    }

    /// Build (and cache) a `reqwest::Client` for this account's outbound
    /// proxy. Accounts without a configured proxy share the default client.
    async fn client_for(&self, account: &UpstreamAccount) -> reqwest::Client {
        let Some(proxy) = &account.outbound_proxy else {
            return self.default_client();
        };

        if let Some(client) = self.http_clients.read().await.get(&account.id) {
            return client.clone();
        }

        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Ok(p) = reqwest::Proxy::all(proxy.to_url()) {
            builder = builder.proxy(p);
        }
        let client = builder.build().unwrap_or_default();
        self.http_clients.write().await.insert(account.id.clone(), client.clone());
        client
    }

    fn default_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default()
    }
}

/// Resolve the refresh token_url for an account's provider. Kept as a small
/// static table; per-provider base URLs and timeouts are config overrides,
/// this is just the compiled-in default.
fn provider_token_url(account: &UpstreamAccount) -> Option<String> {
    match account.provider {
        crate::account::Provider::ClaudeOauth => {
            Some("https://console.anthropic.com/v1/oauth/token".to_owned())
        }
        _ => None,
    }
}

fn provider_client_id(account: &UpstreamAccount) -> Option<String> {
    match account.provider {
        crate::account::Provider::ClaudeOauth => {
            Some("9d1c250a-e61b-44d9-88ed-5944d1962f5e".to_owned())
        }
        _ => None,
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
