// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate-limit and credit accounting: sliding-window admission, usage
//! rollups, and credit-balance decrement.

pub mod rollup;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::apikey::{ApiKeyRecord, ApiKeyService, ApiKeyState, OverdrawPolicy};
use crate::keystore::{keys, KvError, KvStore};

pub use rollup::{DailyRollup, UsageRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Requests,
    Tokens,
}

impl Dimension {
    fn key(&self, api_key_id: &str) -> String {
        match self {
            Self::Requests => keys::rate_limit_requests(api_key_id),
            Self::Tokens => keys::rate_limit_tokens(api_key_id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Admission {
    Admitted,
    Exceeded { retry_after_secs: u64 },
}

/// Outcome of [`Accounting::check_quota`]: the aggregate admission decision
/// across requests, tokens, concurrency, and the daily cost limit.
#[derive(Debug, Clone, Copy)]
pub enum QuotaOutcome {
    Allow,
    ThrottleFor { retry_after_secs: u64 },
}

/// Per-1K-token cost for one (provider, model) pair.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct PricingEntry {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub input_cost_per_1k: f64,
    #[serde(default)]
    pub output_cost_per_1k: f64,
    #[serde(default)]
    pub cache_write_cost_per_1k: f64,
    #[serde(default)]
    pub cache_read_cost_per_1k: f64,
}

/// Keyed by `(provider, model)`, returning cost-per-1K-tokens for input,
/// output, and cache-write/cache-read tokens. Config-driven; the zero-value
/// default never rejects a request for lack of pricing data.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    entries: std::collections::HashMap<(String, String), PricingEntry>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a pricing table from a JSON array of [`PricingEntry`] records.
    pub fn load_json(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<PricingEntry> = serde_json::from_str(raw)?;
        let mut table = Self::new();
        for entry in entries {
            table.entries.insert((entry.provider.clone(), entry.model.clone()), entry);
        }
        Ok(table)
    }

    pub fn insert(&mut self, provider: &str, model: &str, input_per_1k: f64, output_per_1k: f64) {
        self.entries.insert(
            (provider.to_owned(), model.to_owned()),
            PricingEntry {
                provider: provider.to_owned(),
                model: model.to_owned(),
                input_cost_per_1k: input_per_1k,
                output_cost_per_1k: output_per_1k,
                cache_write_cost_per_1k: 0.0,
                cache_read_cost_per_1k: 0.0,
            },
        );
    }

    pub fn cost(&self, provider: &str, model: &str, usage: &UsageRecord) -> f64 {
        let entry = self.entries.get(&(provider.to_owned(), model.to_owned())).copied().unwrap_or_default();
        (usage.input_tokens as f64 / 1000.0) * entry.input_cost_per_1k
            + (usage.output_tokens as f64 / 1000.0) * entry.output_cost_per_1k
            + (usage.cache_creation_input_tokens as f64 / 1000.0) * entry.cache_write_cost_per_1k
            + (usage.cache_read_input_tokens as f64 / 1000.0) * entry.cache_read_cost_per_1k
    }
}

pub struct Accounting {
    kv: Arc<dyn KvStore>,
    api_keys: Arc<ApiKeyService>,
    pricing: PricingTable,
}

impl Accounting {
    pub fn new(kv: Arc<dyn KvStore>, api_keys: Arc<ApiKeyService>, pricing: PricingTable) -> Self {
        Self { kv, api_keys, pricing }
    }

    /// Admission check for one dimension of a sliding window: trims entries
    /// older than `key.quotas.window_seconds`, then sums the remaining
    /// weights and compares against `limit`.
    pub async fn check_admission(
        &self,
        key: &ApiKeyRecord,
        dimension: Dimension,
        weight: f64,
        limit: u64,
    ) -> Result<Admission, KvError> {
        let window_key = dimension.key(&key.id);
        let now = epoch_secs() as f64;
        let window_secs = key.quotas.window_seconds as f64;
        self.kv.zremrangebyscore(&window_key, 0.0, now - window_secs).await?;

        let current = self.kv.zsum_weight(&window_key).await?;
        if current + weight > limit as f64 {
            return Ok(Admission::Exceeded { retry_after_secs: (window_secs as u64).clamp(1, 60) });
        }

        let member = Uuid::new_v4().to_string();
        self.kv.zadd(&window_key, &member, now, weight).await?;
        Ok(Admission::Admitted)
    }

    /// Commit usage for a completed (or cancelled) request: rolls up daily
    /// counters, decrements the key's prepaid credit balance atomically
    /// (clamped at zero — never goes negative), and applies the key's
    /// overdraw policy when either the balance or the daily cost limit runs
    /// dry. Called exactly once per request, after completion or
    /// cancellation, even for zero-usage (e.g. cancelled-before-response)
    /// records.
    pub async fn commit(
        &self,
        key: &mut ApiKeyRecord,
        provider: &str,
        model: &str,
        usage: &UsageRecord,
    ) -> Result<(), KvError> {
        let cost = self.pricing.cost(provider, model, usage);
        let rollup = rollup::record(&self.kv, key, model, usage, cost).await?;

        let daily_limit_exhausted =
            key.daily_cost_limit.map(|limit| rollup.cost >= limit).unwrap_or(false);

        let balance_exhausted = if key.balance_tracked && cost > 0.0 {
            let (_, ran_dry) =
                self.kv.decr_credit_clamped(&keys::credit_balance(&key.id), cost).await?;
            ran_dry
        } else {
            false
        };

        if (daily_limit_exhausted || balance_exhausted) && key.state != ApiKeyState::Disabled {
            match key.overdraw_policy {
                OverdrawPolicy::Soft if !key.overdrawn => {
                    key.overdrawn = true;
                    self.api_keys.put(key).await.ok();
                }
                OverdrawPolicy::Hard => {
                    key.state = ApiKeyState::Disabled;
                    self.api_keys.put(key).await.ok();
                }
                OverdrawPolicy::Soft => {}
            }
        }
        Ok(())
    }

    /// `CheckQuota`: the aggregate pre-admission decision for a request,
    /// combining the sliding-window request/token counters, the per-key
    /// concurrency cap, and the daily cost limit. `estimated_tokens` is the
    /// caller's best guess at this request's token cost (e.g. the request's
    /// `max_tokens` field) — the real count, once known, is reconciled by
    /// [`Accounting::commit`] against the daily rollup, not this window.
    pub async fn check_quota(
        &self,
        key: &ApiKeyRecord,
        estimated_tokens: u64,
    ) -> Result<QuotaOutcome, KvError> {
        if key.overdrawn {
            return Ok(QuotaOutcome::ThrottleFor { retry_after_secs: 60 });
        }
        if let Some(limit) = key.daily_cost_limit {
            if limit <= 0.0 {
                return Ok(QuotaOutcome::ThrottleFor { retry_after_secs: 60 });
            }
        }

        if let Admission::Exceeded { retry_after_secs } = self
            .check_admission(key, Dimension::Requests, 1.0, key.quotas.requests_per_window)
            .await?
        {
            return Ok(QuotaOutcome::ThrottleFor { retry_after_secs });
        }

        if let Admission::Exceeded { retry_after_secs } = self
            .check_admission(key, Dimension::Tokens, estimated_tokens as f64, key.quotas.tokens_per_window)
            .await?
        {
            return Ok(QuotaOutcome::ThrottleFor { retry_after_secs });
        }

        if !self.admit_concurrency(key).await? {
            return Ok(QuotaOutcome::ThrottleFor { retry_after_secs: 1 });
        }

        Ok(QuotaOutcome::Allow)
    }

    /// Claim one slot against `key.quotas.max_concurrent`. Paired with
    /// [`Accounting::release_concurrency`], which callers must invoke exactly
    /// once the request completes, errors, or is cancelled.
    async fn admit_concurrency(&self, key: &ApiKeyRecord) -> Result<bool, KvError> {
        let counter_key = keys::inflight_key(&key.id);
        let n = self.kv.incr_by(&counter_key, 1).await?;
        if n as u32 > key.quotas.max_concurrent {
            self.kv.incr_by(&counter_key, -1).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Release a slot claimed by a successful [`Accounting::check_quota`].
    pub async fn release_concurrency(&self, key_id: &str) -> Result<(), KvError> {
        self.kv.incr_by(&keys::inflight_key(key_id), -1).await?;
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
