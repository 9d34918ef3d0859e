use super::*;

#[test]
fn scheduler_no_account_maps_to_retry_hint() {
    let err = scheduler_err(SchedulerError::NoAccountAvailable { retry_after_secs: 7 });
    assert!(matches!(err, RelayError::NoAccountAvailable { retry_after_secs: 7 }));
}

#[test]
fn ensure_fresh_unauthorized_maps_to_upstream_unauthorized() {
    let err = ensure_fresh_err(EnsureFreshError::AccountUnauthorized("acct".to_owned()));
    assert!(matches!(err, RelayError::UpstreamUnauthorized));
}

#[test]
fn ensure_fresh_transient_maps_to_upstream_error() {
    let err = ensure_fresh_err(EnsureFreshError::RefreshTransient("timeout".to_owned()));
    assert!(matches!(err, RelayError::UpstreamError));
}

#[test]
fn diagnostic_headers_are_attached_when_valid() {
    let builder = axum::response::Response::builder();
    let builder = with_diagnostic_headers(builder, "acct-1", "fp-1");
    let response = builder.body(Body::empty()).unwrap();
    assert_eq!(response.headers().get("x-relay-account-id").unwrap(), "acct-1");
    assert_eq!(response.headers().get("x-relay-session").unwrap(), "fp-1");
}
