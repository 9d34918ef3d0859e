// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingress header rewrite: strip client credentials, inject upstream ones.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::account::Provider;

const HOP_BY_HOP: &[&str] = &["authorization", "x-api-key", "host", "content-length"];

/// Strip headers that must never reach the upstream verbatim: the client's
/// own credential and anything connection-scoped.
pub fn strip_client_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Inject the upstream credential appropriate for `provider`.
pub fn inject_upstream_credential(headers: &mut HeaderMap, provider: Provider, access_token: &str) {
    match provider {
        Provider::ClaudeOauth => {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {access_token}")) {
                headers.insert(HeaderName::from_static("authorization"), value);
            }
        }
        Provider::ClaudeConsole | Provider::Bedrock => {
            if let Ok(value) = HeaderValue::from_str(access_token) {
                headers.insert(HeaderName::from_static("x-api-key"), value);
            }
        }
        Provider::Gemini => {
            if let Ok(value) = HeaderValue::from_str(access_token) {
                headers.insert(HeaderName::from_static("x-goog-api-key"), value);
            }
        }
    }
}

/// Inject provider beta/version headers. Anthropic's OAuth surface requires
/// `anthropic-version` and an opt-in `anthropic-beta` feature list; the other
/// providers don't need anything extra today.
pub fn inject_beta_headers(headers: &mut HeaderMap, provider: Provider, beta_features: &[String]) {
    if provider.is_oauth() || provider == Provider::ClaudeConsole {
        headers.insert(HeaderName::from_static("anthropic-version"), HeaderValue::from_static("2023-06-01"));
        if !beta_features.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&beta_features.join(",")) {
                headers.insert(HeaderName::from_static("anthropic-beta"), value);
            }
        }
    }
}

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod ingress_tests;
