// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn model_glob_match_exact() {
    assert!(model_glob_match("claude-3-5-sonnet", "claude-3-5-sonnet"));
    assert!(!model_glob_match("claude-3-5-sonnet", "claude-3-5-haiku"));
}

#[test]
fn model_glob_match_wildcard_prefix() {
    assert!(model_glob_match("claude-3-5-*", "claude-3-5-sonnet"));
    assert!(model_glob_match("claude-3-5-*", "claude-3-5-haiku"));
    assert!(!model_glob_match("claude-3-5-*", "claude-3-opus"));
}

#[test]
fn reject_unsupported_model_empty_allowlist_allows_anything() {
    let key = sample_key(vec![]);
    assert!(reject_unsupported_model(&key, "anything").is_none());
}

#[test]
fn reject_unsupported_model_enforces_allowlist() {
    let key = sample_key(vec!["claude-3-5-*".to_owned()]);
    assert!(reject_unsupported_model(&key, "claude-3-5-sonnet").is_none());
    assert!(reject_unsupported_model(&key, "gpt-4").is_some());
}

#[test]
fn wants_streaming_from_accept_header() {
    let mut headers = HeaderMap::new();
    headers.insert(axum::http::header::ACCEPT, "text/event-stream".parse().unwrap());
    assert!(wants_streaming(&headers, None));
}

#[test]
fn wants_streaming_from_body_flag() {
    let headers = HeaderMap::new();
    let body = serde_json::json!({"stream": true});
    assert!(wants_streaming(&headers, Some(&body)));
}

#[test]
fn wants_streaming_defaults_false() {
    let headers = HeaderMap::new();
    assert!(!wants_streaming(&headers, None));
}

#[test]
fn extract_gemini_model_strips_prefix_and_action() {
    assert_eq!(extract_gemini_model("models/gemini-1.5-pro:streamGenerateContent"), "gemini-1.5-pro");
    assert_eq!(extract_gemini_model("models/gemini-1.5-pro:generateContent"), "gemini-1.5-pro");
}

#[test]
fn estimate_tokens_reads_max_tokens() {
    let body = serde_json::json!({"max_tokens": 4096});
    assert_eq!(estimate_tokens(Some(&body)), 4096);
}

#[test]
fn estimate_tokens_defaults_when_absent() {
    assert_eq!(estimate_tokens(None), 1024);
}

#[test]
fn session_fingerprint_stable_for_identical_requests() {
    let body = serde_json::json!({
        "system": "you are helpful",
        "messages": [{"role": "user", "content": "hello there"}]
    });
    let a = session_fingerprint(Some(&body));
    let b = session_fingerprint(Some(&body));
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
}

#[test]
fn session_fingerprint_differs_on_different_first_message() {
    let a = session_fingerprint(Some(&serde_json::json!({
        "messages": [{"role": "user", "content": "hello there"}]
    })));
    let b = session_fingerprint(Some(&serde_json::json!({
        "messages": [{"role": "user", "content": "goodbye now"}]
    })));
    assert_ne!(a, b);
}

#[test]
fn session_fingerprint_handles_missing_body() {
    let fp = session_fingerprint(None);
    assert_eq!(fp.len(), 64);
}

fn sample_key(allowed_model_patterns: Vec<String>) -> ApiKeyRecord {
    ApiKeyRecord {
        id: "key-1".to_owned(),
        hash: "deadbeef".to_owned(),
        display_name: "test key".to_owned(),
        owner_ref: None,
        quotas: Quotas { tokens_per_window: 1000, requests_per_window: 100, window_seconds: 60, max_concurrent: 5 },
        daily_cost_limit: None,
        allowed_model_patterns,
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
