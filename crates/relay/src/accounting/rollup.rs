// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-request usage capture and daily aggregate rollup.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::apikey::ApiKeyRecord;
use crate::keystore::{keys, KvError, KvStore};

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Token usage extracted from an upstream response (streamed or buffered).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub model: String,
    /// Set when the request was aborted by a client disconnect mid-stream;
    /// the usage captured is whatever arrived before the abort.
    pub client_disconnect: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyRollup {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cost: f64,
}

const ROLLUP_TTL_SECS: u64 = 86400 * 2;

/// Reassemble a [`DailyRollup`] from the per-field counters `record` writes.
/// Used both by `record`'s return value and by admin usage reads.
pub fn from_fields(fields: &std::collections::HashMap<String, String>) -> DailyRollup {
    let u64_field = |name: &str| fields.get(name).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    DailyRollup {
        requests: u64_field("requests"),
        input_tokens: u64_field("input_tokens"),
        output_tokens: u64_field("output_tokens"),
        cache_creation_input_tokens: u64_field("cache_creation_input_tokens"),
        cache_read_input_tokens: u64_field("cache_read_input_tokens"),
        cost: fields.get("cost").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0),
    }
}

/// Roll usage into the day's aggregate. Every field is bumped via its own
/// atomic hash-field increment rather than a read-modify-write of a single
/// JSON blob, so two concurrent commits to the same key never lose one
/// another's update.
pub async fn record(
    kv: &std::sync::Arc<dyn KvStore>,
    key: &ApiKeyRecord,
    model: &str,
    usage: &UsageRecord,
    cost: f64,
) -> Result<DailyRollup, KvError> {
    let date = today();
    let rollup_key = keys::usage_daily(&date, &key.id, model);

    kv.hash_incr_by(&rollup_key, "requests", 1, Some(ROLLUP_TTL_SECS)).await?;
    kv.hash_incr_by(&rollup_key, "input_tokens", usage.input_tokens as i64, None).await?;
    kv.hash_incr_by(&rollup_key, "output_tokens", usage.output_tokens as i64, None).await?;
    kv.hash_incr_by(
        &rollup_key,
        "cache_creation_input_tokens",
        usage.cache_creation_input_tokens as i64,
        None,
    )
    .await?;
    kv.hash_incr_by(
        &rollup_key,
        "cache_read_input_tokens",
        usage.cache_read_input_tokens as i64,
        None,
    )
    .await?;
    kv.hash_incr_by_float(&rollup_key, "cost", cost, None).await?;

    Ok(from_fields(&kv.hash_get_all(&rollup_key).await?))
}

#[cfg(test)]
#[path = "rollup_tests.rs"]
mod rollup_tests;
