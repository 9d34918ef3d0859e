// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth token lifecycle: expiry detection, refresh, cross-process
//! refresh-lock coalescing, and the account state machine this drives.
//!
//! [`manager::CredentialManager`] is the only component permitted to see a
//! decrypted access token; everything else calls [`manager::CredentialManager::ensure_fresh`]
//! and gets back a token or a tagged outcome — expiry is a data condition
//! here, never an exception.

pub mod manager;
pub mod oauth;
pub mod refresh;

use serde::{Deserialize, Serialize};

/// Margin, in seconds, inside which a token is treated as stale and
/// refreshed proactively. Spec requires skew >= 10s; default matches the
/// teacher's `COOP_MUX_REFRESH_MARGIN_SECS` convention but renamed to this
/// crate's env prefix.
pub fn refresh_skew_secs() -> u64 {
    std::env::var("RELAY_REFRESH_SKEW_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(10)
}

/// How long a background refresh loop waits before the configured margin
/// when proactively refreshing ahead of expiry (distinct from the mandatory
/// `ensure_fresh` skew above, which is the floor every caller must respect).
pub fn refresh_margin_secs() -> u64 {
    std::env::var("RELAY_REFRESH_MARGIN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(900)
}

/// State-change events emitted by the credential manager. The scheduler and
/// health exporter subscribe to these instead of polling account state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AccountEvent {
    Refreshed { account_id: String, expires_at: u64 },
    RefreshFailed { account_id: String, error: String },
    Unauthorized { account_id: String },
}
