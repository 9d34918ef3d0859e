use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use super::*;

async fn spawn_token_endpoint(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}/token")
}

#[tokio::test]
async fn successful_refresh_returns_token() {
    let router = Router::new().route(
        "/token",
        post(|| async {
            axum::Json(serde_json::json!({
                "access_token": "new-token",
                "refresh_token": "new-refresh",
                "expires_in": 3600,
            }))
        }),
    );
    let url = spawn_token_endpoint(router).await;
    let client = reqwest::Client::new();

    let token = do_refresh(&client, &url, "client-id", "old-refresh").await.expect("refresh");
    assert_eq!(token.access_token, "new-token");
    assert_eq!(token.expires_in, 3600);
}

#[tokio::test]
async fn invalid_grant_is_not_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let router = Router::new().route(
        "/token",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({
                        "error": "invalid_grant",
                        "error_description": "refresh token revoked",
                    })),
                )
            }
        }),
    );
    let url = spawn_token_endpoint(router).await;
    let client = reqwest::Client::new();

    let err = refresh_with_retries(&client, &url, "client-id", "revoked", 3).await.unwrap_err();
    assert!(matches!(err, RefreshError::InvalidGrant(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_failure_retries_up_to_max() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let router = Router::new().route(
        "/token",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }),
    );
    let url = spawn_token_endpoint(router).await;
    let client = reqwest::Client::new();

    let err = refresh_with_retries(&client, &url, "client-id", "rt", 2).await.unwrap_err();
    assert!(matches!(err, RefreshError::Transient(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 3); // initial + 2 retries
}
