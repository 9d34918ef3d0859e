use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use super::*;
use crate::account::{CredentialEnvelope, Provider};
use crate::keystore::InMemoryKv;

fn epoch_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn test_key() -> Arc<EncryptionKey> {
    Arc::new(EncryptionKey::from_bytes(&[7u8; 32]).expect("key"))
}

fn make_manager(kv: Arc<dyn KvStore>, key: Arc<EncryptionKey>) -> (Arc<CredentialManager>, Arc<AccountRepository>) {
    let accounts = Arc::new(AccountRepository::new(kv.clone()));
    let manager = CredentialManager::new(kv, accounts.clone(), key, Arc::new(crate::health::Metrics::new()));
    (manager, accounts)
}

async fn seed_account(
    accounts: &AccountRepository,
    key: &EncryptionKey,
    id: &str,
    access_token: &str,
    expires_at: u64,
) -> UpstreamAccount {
    let account = UpstreamAccount {
        id: id.to_owned(),
        provider: Provider::ClaudeOauth,
        credential: CredentialEnvelope {
            access_token: key.seal_str(access_token).unwrap(),
            refresh_token: Some(key.seal_str("refresh-secret").unwrap()),
            scopes: vec!["inference".to_owned()],
            expires_at,
            token_type: "Bearer".to_owned(),
        },
        outbound_proxy: None,
        priority: 0,
        group_membership: None,
        state: AccountStatus::Active,
        cooldown_until: 0,
        last_error: None,
        last_used_at: 0,
        allowed_model_patterns: Vec::new(),
        max_concurrent: 4,
    };
    accounts.put(&account).await.unwrap();
    account
}

#[tokio::test]
async fn returns_cached_token_without_refresh_when_fresh() {
    let kv: Arc<dyn KvStore> = InMemoryKv::new();
    let key = test_key();
    let (manager, accounts) = make_manager(kv, key.clone());
    seed_account(&accounts, &key, "acct-1", "still-good", epoch_now() + 3600).await;

    let token = manager.ensure_fresh("acct-1").await.expect("fresh token");
    assert_eq!(token, "still-good");
}

#[tokio::test]
async fn account_within_skew_of_expiry_is_treated_as_stale() {
    let kv: Arc<dyn KvStore> = InMemoryKv::new();
    let key = test_key();
    let (_manager, accounts) = make_manager(kv, key.clone());
    seed_account(&accounts, &key, "acct-1", "stale", epoch_now() + 1).await;

    let account = accounts.get("acct-1").await.unwrap();
    assert!(epoch_now() + refresh_skew_secs() >= account.credential.expires_at);
}

#[tokio::test]
async fn missing_account_surfaces_not_found() {
    let kv: Arc<dyn KvStore> = InMemoryKv::new();
    let key = test_key();
    let (manager, _accounts) = make_manager(kv, key);

    let err = manager.ensure_fresh("ghost").await.unwrap_err();
    assert!(matches!(err, EnsureFreshError::AccountNotFound(_)));
}

#[tokio::test]
async fn refresh_lock_is_mutually_exclusive() {
    let kv: Arc<dyn KvStore> = InMemoryKv::new();
    let lock_key = keys::refresh_lock("acct-1");
    let first = kv.set_if_absent(&lock_key, "holder-a", 20).await.unwrap();
    let second = kv.set_if_absent(&lock_key, "holder-b", 20).await.unwrap();
    assert!(first);
    assert!(!second);
}

#[tokio::test]
async fn account_with_no_refresh_token_is_unauthorized_on_stale_fetch() {
    let kv: Arc<dyn KvStore> = InMemoryKv::new();
    let key = test_key();
    let (manager, accounts) = make_manager(kv, key.clone());
    let mut account = seed_account(&accounts, &key, "acct-1", "stale", epoch_now() - 1).await;
    account.credential.refresh_token = None;
    accounts.put(&account).await.unwrap();

    let err = manager.ensure_fresh("acct-1").await.unwrap_err();
    assert!(matches!(err, EnsureFreshError::AccountUnauthorized(_)));

    let persisted = accounts.get("acct-1").await.unwrap();
    // no refresh token means the manager never reaches the HTTP call or
    // mutates state; it just reports unauthorized.
    assert_eq!(persisted.state, AccountStatus::Active);
}

#[tokio::test]
async fn invalid_grant_marks_account_unauthorized() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = Arc::clone(&counter);
    let router = Router::new().route(
        "/token",
        post(move || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({
                        "error": "invalid_grant",
                        "error_description": "token revoked",
                    })),
                )
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    let token_url = format!("http://{addr}/token");

    let client = reqwest::Client::new();
    let err = crate::credential::refresh::do_refresh(&client, &token_url, "client-id", "revoked")
        .await
        .unwrap_err();
    assert!(matches!(err, crate::credential::refresh::RefreshError::InvalidGrant(_)));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
