// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-facing error taxonomy: HTTP status + machine-readable code + retry hints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Errors surfaced to API clients, one variant per spec error kind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("no credential header present")]
    AuthMissing,
    #[error("api key is unknown or malformed")]
    AuthInvalid,
    #[error("api key is disabled")]
    KeyDisabled,
    #[error("api key has expired")]
    KeyExpired,
    #[error("quota exceeded, retry after {retry_after_secs}s")]
    QuotaExceeded { retry_after_secs: u64 },
    #[error("no upstream account available, retry after {retry_after_secs}s")]
    NoAccountAvailable { retry_after_secs: u64 },
    #[error("upstream rejected credentials after refresh")]
    UpstreamUnauthorized,
    #[error("upstream rate limited, retry after {retry_after_secs}s")]
    UpstreamRateLimited { retry_after_secs: u64 },
    #[error("upstream error after exhausted retries")]
    UpstreamError,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal,
}

impl RelayError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::AuthMissing | Self::AuthInvalid => StatusCode::UNAUTHORIZED,
            Self::KeyDisabled | Self::KeyExpired => StatusCode::FORBIDDEN,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NoAccountAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamUnauthorized => StatusCode::BAD_GATEWAY,
            Self::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamError => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthMissing => "AuthMissing",
            Self::AuthInvalid => "AuthInvalid",
            Self::KeyDisabled => "KeyDisabled",
            Self::KeyExpired => "KeyExpired",
            Self::QuotaExceeded { .. } => "QuotaExceeded",
            Self::NoAccountAvailable { .. } => "NoAccountAvailable",
            Self::UpstreamUnauthorized => "UpstreamUnauthorized",
            Self::UpstreamRateLimited { .. } => "UpstreamRateLimited",
            Self::UpstreamError => "UpstreamError",
            Self::BadRequest(_) => "BadRequest",
            Self::Internal => "Internal",
        }
    }

    /// `Retry-After` header value, if this error kind carries one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::QuotaExceeded { retry_after_secs }
            | Self::NoAccountAvailable { retry_after_secs }
            | Self::UpstreamRateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let retry_after = self.retry_after_secs();
        let mut resp =
            (status, Json(ErrorResponse { error: self.code().to_owned() })).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        resp
    }
}

/// Clamp a retry-after duration to the `[1, 60]` second window spec requires
/// for `NoAccountAvailable`.
pub fn clamp_retry_after(secs: i64) -> u64 {
    secs.clamp(1, 60) as u64
}
