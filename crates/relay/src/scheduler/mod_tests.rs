use std::sync::Arc;

use super::*;
use crate::account::{CredentialEnvelope, Provider, UpstreamAccount};
use crate::apikey::{ApiKeyState, OverdrawPolicy, Quotas};
use crate::crypto::envelope::EncryptionKey;
use crate::keystore::InMemoryKv;

fn test_key() -> EncryptionKey {
    EncryptionKey::from_bytes(&[3u8; 32]).unwrap()
}

fn account(id: &str, priority: i32, max_concurrent: u32, key: &EncryptionKey) -> UpstreamAccount {
    UpstreamAccount {
        id: id.to_owned(),
        provider: Provider::ClaudeOauth,
        credential: CredentialEnvelope {
            access_token: key.seal_str("token").unwrap(),
            refresh_token: None,
            scopes: vec![],
            expires_at: u64::MAX,
            token_type: "Bearer".to_owned(),
        },
        outbound_proxy: None,
        priority,
        group_membership: None,
        state: crate::account::AccountStatus::Active,
        cooldown_until: 0,
        last_error: None,
        last_used_at: 0,
        allowed_model_patterns: Vec::new(),
        max_concurrent,
    }
}

fn test_api_key(id: &str) -> ApiKeyRecord {
    ApiKeyRecord {
        id: id.to_owned(),
        hash: "irrelevant".to_owned(),
        display_name: "test".to_owned(),
        owner_ref: None,
        quotas: Quotas { tokens_per_window: 1000, requests_per_window: 100, window_seconds: 60, max_concurrent: 10 },
        daily_cost_limit: None,
        allowed_model_patterns: Vec::new(),
        dedicated_binding: None,
        group_binding: None,
        state: ApiKeyState::Active,
        created_at: 0,
        last_used_at: 0,
        expires_at: None,
        overdrawn: false,
        overdraw_policy: OverdrawPolicy::Soft,
        balance_tracked: false,
    }
}

async fn scheduler_with_accounts(accounts: Vec<UpstreamAccount>) -> (Scheduler, Arc<AccountRepository>) {
    let kv: Arc<dyn KvStore> = InMemoryKv::new();
    let repo = Arc::new(AccountRepository::new(kv.clone()));
    for a in &accounts {
        repo.put(a).await.unwrap();
    }
    let breaker = Arc::new(CircuitBreaker::new(kv.clone()));
    (Scheduler::new(kv, repo.clone(), breaker), repo)
}

#[tokio::test]
async fn picks_lowest_priority_then_id_in_shared_pool() {
    let key = test_key();
    let (scheduler, _repo) = scheduler_with_accounts(vec![
        account("b", 1, 4, &key),
        account("a", 1, 4, &key),
        account("c", 0, 4, &key),
    ])
    .await;

    let api_key = test_api_key("k1");
    let chosen = scheduler.select(&api_key, Provider::ClaudeOauth, "claude-3-5-sonnet", "fp-1").await.unwrap();
    assert_eq!(chosen, "c");
}

#[tokio::test]
async fn dedicated_binding_wins_even_if_not_lowest_priority() {
    let key = test_key();
    let (scheduler, _repo) =
        scheduler_with_accounts(vec![account("low-priority", 0, 4, &key), account("pinned", 5, 4, &key)]).await;

    let mut api_key = test_api_key("k1");
    api_key.dedicated_binding = Some("pinned".to_owned());
    let chosen = scheduler.select(&api_key, Provider::ClaudeOauth, "claude-3-5-sonnet", "fp-1").await.unwrap();
    assert_eq!(chosen, "pinned");
}

#[tokio::test]
async fn sticky_session_is_honored_on_repeat_fingerprint() {
    let key = test_key();
    let (scheduler, _repo) =
        scheduler_with_accounts(vec![account("a", 0, 4, &key), account("b", 0, 4, &key)]).await;

    let api_key = test_api_key("k1");
    let first = scheduler.select(&api_key, Provider::ClaudeOauth, "claude-3-5-sonnet", "fp-1").await.unwrap();
    scheduler.release(&first).await.unwrap();
    let second = scheduler.select(&api_key, Provider::ClaudeOauth, "claude-3-5-sonnet", "fp-1").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn no_account_available_when_pool_empty() {
    let (scheduler, _repo) = scheduler_with_accounts(vec![]).await;
    let api_key = test_api_key("k1");
    let err = scheduler.select(&api_key, Provider::ClaudeOauth, "claude-3-5-sonnet", "fp-1").await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoAccountAvailable { .. }));
}

#[tokio::test]
async fn max_concurrent_skips_saturated_account() {
    let key = test_key();
    let (scheduler, _repo) =
        scheduler_with_accounts(vec![account("saturated", 0, 1, &key), account("spare", 1, 1, &key)]).await;

    let api_key = test_api_key("k1");
    let first = scheduler.select(&api_key, Provider::ClaudeOauth, "m", "fp-1").await.unwrap();
    assert_eq!(first, "saturated");
    // saturated is now at its max_concurrent=1 cap; next distinct session
    // fingerprint (so sticky doesn't short-circuit) must fall through to spare.
    let second = scheduler.select(&api_key, Provider::ClaudeOauth, "m", "fp-2").await.unwrap();
    assert_eq!(second, "spare");
}

#[tokio::test]
async fn model_allow_list_excludes_non_matching_accounts() {
    let key = test_key();
    let mut restricted = account("restricted", 0, 4, &key);
    restricted.allowed_model_patterns = vec!["claude-3-opus*".to_owned()];
    let (scheduler, _repo) = scheduler_with_accounts(vec![restricted, account("open", 1, 4, &key)]).await;

    let api_key = test_api_key("k1");
    let chosen = scheduler.select(&api_key, Provider::ClaudeOauth, "claude-3-5-sonnet", "fp-1").await.unwrap();
    assert_eq!(chosen, "open");
}
