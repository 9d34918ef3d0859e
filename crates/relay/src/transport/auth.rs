// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API-key authentication middleware: extracts `x-api-key` (preferred) or
//! `authorization: Bearer <apiKey>`, validates it, and injects the resolved
//! [`ApiKeyRecord`] into request extensions for downstream handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::apikey::{ApiKeyRecord, ApiKeyServiceError};
use crate::error::RelayError;
use crate::state::AppState;

const UNAUTHENTICATED_PATHS: &[&str] = &["/health", "/liveness", "/readiness", "/metrics"];

fn extract_plaintext(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value);
    }
    headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer "))
}

fn map_validate_err(err: ApiKeyServiceError) -> RelayError {
    match err {
        ApiKeyServiceError::Unauthorized => RelayError::AuthInvalid,
        ApiKeyServiceError::Disabled => RelayError::KeyDisabled,
        ApiKeyServiceError::Expired => RelayError::KeyExpired,
        ApiKeyServiceError::InvalidQuota | ApiKeyServiceError::Kv(_) => RelayError::Internal,
    }
}

/// Axum middleware enforcing API-key auth on every route except the
/// unauthenticated health/metrics surface.
pub async fn auth_layer(state: State<Arc<AppState>>, mut req: Request<axum::body::Body>, next: Next) -> Response {
    if UNAUTHENTICATED_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let Some(plaintext) = extract_plaintext(req.headers()) else {
        return RelayError::AuthMissing.into_response();
    };

    match state.api_keys.validate(plaintext).await {
        Ok(record) => {
            req.extensions_mut().insert(Arc::new(record) as Arc<ApiKeyRecord>);
            next.run(req).await
        }
        Err(e) => map_validate_err(e).into_response(),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod auth_tests;
