// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test harness: build a fully-wired `AppState` over the in-process
//! KV fallback, with no Redis dependency, for integration tests.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use relaybroker::account::AccountRepository;
use relaybroker::accounting::{Accounting, PricingTable};
use relaybroker::apikey::{ApiKeyService, IssueSpec, IssuedKey, OverdrawPolicy, Quotas};
use relaybroker::breaker::CircuitBreaker;
use relaybroker::config::RelayConfig;
use relaybroker::credential::manager::CredentialManager;
use relaybroker::crypto::envelope::{derive_key, EncryptionKey};
use relaybroker::health::Metrics;
use relaybroker::keystore::InMemoryKv;
use relaybroker::relay::RelayEngine;
use relaybroker::scheduler::Scheduler;
use relaybroker::state::AppState;

pub fn test_config() -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        encryption_key: "test-encryption-key-at-least-32-bytes-long".to_owned(),
        jwt_signing_key: None,
        kv_url: "redis://127.0.0.1:1".to_owned(),
        claude_base_url: "https://api.anthropic.com".to_owned(),
        gemini_base_url: "https://generativelanguage.googleapis.com".to_owned(),
        bedrock_base_url: "https://bedrock-runtime.amazonaws.com".to_owned(),
        beta_features: vec![],
        default_proxy: None,
        pricing_table_path: None,
        request_timeout_secs: 300,
        stream_timeout_secs: 600,
        stream_idle_timeout_secs: 60,
        max_retries: 3,
        max_body_bytes: 10 * 1024 * 1024,
        max_open_connections: 1000,
        log_level: "info".to_owned(),
    }
}

pub fn test_state() -> Arc<AppState> {
    test_state_with_config(test_config())
}

pub fn test_state_with_config(config: RelayConfig) -> Arc<AppState> {
    let kv = InMemoryKv::new();
    let encryption_key = Arc::new(EncryptionKey::from_bytes(&derive_key(&config.encryption_key)).unwrap());

    let accounts = Arc::new(AccountRepository::new(kv.clone()));
    let api_keys = Arc::new(ApiKeyService::new(kv.clone()));
    let metrics = Arc::new(Metrics::new());
    let credentials = CredentialManager::new(kv.clone(), accounts.clone(), encryption_key, metrics.clone());
    let breaker = Arc::new(CircuitBreaker::new(kv.clone()));
    let scheduler = Arc::new(Scheduler::new(kv.clone(), accounts.clone(), breaker.clone()));
    let accounting = Arc::new(Accounting::new(kv.clone(), api_keys.clone(), PricingTable::new()));

    let relay = RelayEngine::new(
        Arc::new(config.clone()),
        accounts.clone(),
        credentials.clone(),
        scheduler.clone(),
        breaker.clone(),
        accounting.clone(),
        metrics.clone(),
    );

    Arc::new(AppState {
        config,
        shutdown: CancellationToken::new(),
        kv,
        accounts,
        api_keys,
        credentials,
        scheduler,
        breaker,
        accounting,
        relay,
        metrics,
    })
}

/// Issue a usable API key against `state`'s own `ApiKeyService`, returning
/// the plaintext the test should send on `x-api-key`.
pub async fn issue_key(state: &AppState, allowed_model_patterns: Vec<String>) -> IssuedKey {
    state
        .api_keys
        .issue(IssueSpec {
            display_name: "test key".to_owned(),
            owner_ref: None,
            quotas: Quotas { tokens_per_window: 100_000, requests_per_window: 1000, window_seconds: 60, max_concurrent: 5 },
            daily_cost_limit: None,
            allowed_model_patterns,
            dedicated_binding: None,
            group_binding: None,
            expires_at: None,
            initial_balance: None,
            overdraw_policy: OverdrawPolicy::Soft,
        })
        .await
        .expect("issue key")
}
