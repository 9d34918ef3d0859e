use super::*;

fn sample_account(state: AccountStatus, cooldown_until: u64) -> UpstreamAccount {
    UpstreamAccount {
        id: "acct-1".to_owned(),
        provider: Provider::ClaudeOauth,
        credential: CredentialEnvelope {
            access_token: Envelope { version: 1, iv: String::new(), ciphertext: String::new() },
            refresh_token: None,
            scopes: vec![],
            expires_at: 0,
            token_type: "Bearer".to_owned(),
        },
        outbound_proxy: None,
        priority: 1,
        group_membership: None,
        state,
        cooldown_until,
        last_error: None,
        last_used_at: 0,
        allowed_model_patterns: vec!["claude-3-5-*".to_owned()],
        max_concurrent: 5,
    }
}

#[test]
fn active_account_is_always_usable() {
    let acct = sample_account(AccountStatus::Active, 0);
    assert!(acct.is_usable(1_000));
}

#[test]
fn rate_limited_account_usable_only_after_cooldown() {
    let acct = sample_account(AccountStatus::RateLimited, 1_100);
    assert!(!acct.is_usable(1_000));
    assert!(acct.is_usable(1_100));
    assert!(acct.is_usable(1_200));
}

#[test]
fn disabled_and_unauthorized_are_never_usable() {
    assert!(!sample_account(AccountStatus::Disabled, 0).is_usable(1_000));
    assert!(!sample_account(AccountStatus::Unauthorized, 0).is_usable(1_000));
}

#[test]
fn model_allow_list_matches_prefix_wildcard() {
    let acct = sample_account(AccountStatus::Active, 0);
    assert!(acct.supports_model("claude-3-5-sonnet"));
    assert!(!acct.supports_model("gpt-4"));
}

#[test]
fn empty_allow_list_supports_any_model() {
    let mut acct = sample_account(AccountStatus::Active, 0);
    acct.allowed_model_patterns.clear();
    assert!(acct.supports_model("anything"));
}

#[test]
fn view_never_carries_the_credential_envelope() {
    let acct = sample_account(AccountStatus::Active, 0);
    let view = acct.view();
    assert_eq!(view.id, acct.id);
    // AccountView has no `credential` field at all — compile-time guarantee,
    // this test documents the intent for readers of the type.
    let _: AccountView = view;
}
