// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Self-issued API key types. See [`service`] for issue/validate/quota logic.

pub mod service;

pub use service::{ApiKeyService, ApiKeyServiceError, IssueSpec};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyState {
    Active,
    Disabled,
    Expired,
}

/// What happens when a key's credit balance clamps to zero under a
/// `daily_cost_limit`: `Soft` keeps serving and just flags `overdrawn`
/// (existing callers may choose to warn); `Hard` disables the key outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdrawPolicy {
    Soft,
    Hard,
}

impl Default for OverdrawPolicy {
    fn default() -> Self {
        Self::Soft
    }
}

/// Rate/concurrency quotas attached to an API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quotas {
    pub tokens_per_window: u64,
    pub requests_per_window: u64,
    pub window_seconds: u64,
    pub max_concurrent: u32,
}

impl Quotas {
    pub fn is_valid(&self) -> bool {
        // "negative" doesn't type-check on unsigned fields; the guard that
        // matters post-parse is that a window without any admission is
        // meaningless, matching the `InvalidQuota` contract for non-sensical
        // zero-width windows.
        self.window_seconds > 0
    }
}

/// A self-issued API key record, as stored (never the plaintext).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub hash: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_ref: Option<String>,
    pub quotas: Quotas,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_cost_limit: Option<f64>,
    #[serde(default)]
    pub allowed_model_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedicated_binding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_binding: Option<String>,
    pub state: ApiKeyState,
    pub created_at: u64,
    pub last_used_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Soft overdraw flag, set by Accounting when the credit balance clamps
    /// to zero under `Soft` policy.
    #[serde(default)]
    pub overdrawn: bool,
    /// What `Accounting::commit` does when this key's balance runs dry.
    #[serde(default)]
    pub overdraw_policy: OverdrawPolicy,
    /// Whether this key was issued with a `credits:{id}` prepaid balance
    /// ledger. Gates `Accounting::commit`'s atomic decrement so a key issued
    /// without one doesn't read a phantom zero balance and flag overdrawn
    /// on its very first request.
    #[serde(default)]
    pub balance_tracked: bool,
}

impl ApiKeyRecord {
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at.map(|exp| exp <= now_secs).unwrap_or(false)
    }
}

/// Specification for [`ApiKeyService::issue`].
#[derive(Debug, Clone)]
pub struct IssueSpec {
    pub display_name: String,
    pub owner_ref: Option<String>,
    pub quotas: Quotas,
    pub daily_cost_limit: Option<f64>,
    pub allowed_model_patterns: Vec<String>,
    pub dedicated_binding: Option<String>,
    pub group_binding: Option<String>,
    pub expires_at: Option<u64>,
    /// Starting credit balance, seeded into the `credits:{id}` ledger at
    /// issue time. `None` means uncapped (accounting never decrements a
    /// balance that was never seeded).
    pub initial_balance: Option<f64>,
    pub overdraw_policy: OverdrawPolicy,
}

/// Result of [`ApiKeyService::issue`]: the plaintext is returned exactly
/// once and never persisted.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub id: String,
    pub plaintext: String,
    pub hash: String,
}
