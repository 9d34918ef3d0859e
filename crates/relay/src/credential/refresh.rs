// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth token refresh with retries, through the account's outbound proxy.

use std::time::Duration;

use crate::credential::oauth::{OAuthErrorBody, TokenResponse};

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// Provider rejected the refresh token outright; terminal until reauth.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    /// Network error, non-2xx that isn't `invalid_grant`, or a malformed
    /// response body; eligible for retry.
    #[error("transient refresh failure: {0}")]
    Transient(String),
}

/// Perform a single token refresh request against `token_url`, through
/// `client` (a `reqwest::Client` already configured with the account's
/// outbound proxy, if any).
pub async fn do_refresh(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    refresh_token: &str,
) -> Result<TokenResponse, RefreshError> {
    let resp = client
        .post(token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await
        .map_err(|e| RefreshError::Transient(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if let Ok(body) = serde_json::from_str::<OAuthErrorBody>(&text) {
            if body.is_invalid_grant() {
                return Err(RefreshError::InvalidGrant(
                    body.error_description.unwrap_or(body.error),
                ));
            }
        }
        return Err(RefreshError::Transient(format!("refresh failed ({status}): {text}")));
    }

    resp.json().await.map_err(|e| RefreshError::Transient(e.to_string()))
}

/// Refresh with exponential backoff retries. `invalid_grant` is terminal and
/// short-circuits immediately — it is a data condition about the refresh
/// token, not something retrying fixes.
pub async fn refresh_with_retries(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    refresh_token: &str,
    max_retries: u32,
) -> Result<TokenResponse, RefreshError> {
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(60);

    for attempt in 0..=max_retries {
        match do_refresh(client, token_url, client_id, refresh_token).await {
            Ok(token) => return Ok(token),
            Err(RefreshError::InvalidGrant(msg)) => return Err(RefreshError::InvalidGrant(msg)),
            Err(e @ RefreshError::Transient(_)) => {
                if attempt == max_retries {
                    return Err(e);
                }
                tracing::debug!(attempt, err = %e, "refresh attempt failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }

    Err(RefreshError::Transient("refresh exhausted all retries".to_owned()))
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod refresh_tests;
