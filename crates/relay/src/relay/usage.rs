// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Usage extraction from a buffered (non-streamed) response body.

use crate::accounting::UsageRecord;

/// Extract a [`UsageRecord`] from a full Anthropic-shaped JSON response body.
/// Returns `None` if the body isn't valid JSON or carries no `usage` object
/// — callers still forward the body verbatim regardless.
pub fn extract_from_body(body: &[u8], fallback_model: &str) -> Option<UsageRecord> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let usage = value.get("usage")?;
    let model = value.get("model").and_then(|v| v.as_str()).unwrap_or(fallback_model).to_owned();

    Some(UsageRecord {
        input_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        cache_creation_input_tokens: usage.get("cache_creation_input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        cache_read_input_tokens: usage.get("cache_read_input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        model,
        client_disconnect: false,
    })
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod usage_tests;
