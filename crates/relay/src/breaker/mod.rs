// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-(provider, account) circuit breaker: closed/open/half-open, driven by
//! a 30s error-ratio window persisted in the KV store.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::keystore::{keys, KvError, KvStore};

const WINDOW_SECS: u64 = 30;
const MIN_SAMPLES: u32 = 5;
const ERROR_RATIO_THRESHOLD: f64 = 0.5;
const BASE_OPEN_SECS: u64 = 30;
const MAX_OPEN_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BreakerRecord {
    state: BreakerState,
    window_start: u64,
    successes: u32,
    failures: u32,
    /// Seconds to stay open for, doubled on each re-open, capped at
    /// `MAX_OPEN_SECS`.
    open_duration_secs: u64,
    reopen_at: u64,
    /// Whether a half-open probe is currently in flight; guards admission of
    /// more than one concurrent probe.
    probe_in_flight: bool,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            window_start: 0,
            successes: 0,
            failures: 0,
            open_duration_secs: BASE_OPEN_SECS,
            reopen_at: 0,
            probe_in_flight: false,
        }
    }
}

/// Outcome of [`CircuitBreaker::admit`]: whether the caller may proceed, and
/// if so, whether this admission is a half-open probe (must report its
/// outcome via [`CircuitBreaker::record_success`]/`record_failure` promptly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { is_probe: bool },
    Denied { retry_after_secs: u64 },
}

pub struct CircuitBreaker {
    kv: Arc<dyn KvStore>,
}

impl CircuitBreaker {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Admit a caller, guarded by compare-and-swap so that two concurrent
    /// callers observing the same `Open` record past `reopen_at` can't both
    /// transition to `HalfOpen` and both receive a probe slot.
    pub async fn admit(&self, account_id: &str) -> Result<Admission, KvError> {
        let key = keys::breaker(account_id);
        loop {
            let (mut record, raw) = self.load_raw(&key).await?;
            let now = epoch_secs();
            self.roll_window_if_stale(&mut record, now);

            match record.state {
                BreakerState::Closed => return Ok(Admission::Allowed { is_probe: false }),
                BreakerState::Open => {
                    if now >= record.reopen_at {
                        record.state = BreakerState::HalfOpen;
                        record.probe_in_flight = true;
                        if self.save_cas(&key, raw.as_deref(), &record).await? {
                            return Ok(Admission::Allowed { is_probe: true });
                        }
                        continue;
                    }
                    return Ok(Admission::Denied {
                        retry_after_secs: (record.reopen_at - now).clamp(1, 60),
                    });
                }
                BreakerState::HalfOpen => {
                    if record.probe_in_flight {
                        return Ok(Admission::Denied { retry_after_secs: 1 });
                    }
                    record.probe_in_flight = true;
                    if self.save_cas(&key, raw.as_deref(), &record).await? {
                        return Ok(Admission::Allowed { is_probe: true });
                    }
                    continue;
                }
            }
        }
    }

    pub async fn record_success(&self, account_id: &str) -> Result<(), KvError> {
        let key = keys::breaker(account_id);
        loop {
            let (mut record, raw) = self.load_raw(&key).await?;
            match record.state {
                BreakerState::HalfOpen => {
                    record.state = BreakerState::Closed;
                    record.successes = 0;
                    record.failures = 0;
                    record.open_duration_secs = BASE_OPEN_SECS;
                    record.probe_in_flight = false;
                }
                _ => {
                    record.successes += 1;
                }
            }
            if self.save_cas(&key, raw.as_deref(), &record).await? {
                return Ok(());
            }
        }
    }

    pub async fn record_failure(&self, account_id: &str) -> Result<(), KvError> {
        let key = keys::breaker(account_id);
        loop {
            let (mut record, raw) = self.load_raw(&key).await?;
            let now = epoch_secs();

            match record.state {
                BreakerState::HalfOpen => {
                    record.open_duration_secs = (record.open_duration_secs * 2).min(MAX_OPEN_SECS);
                    record.state = BreakerState::Open;
                    record.reopen_at = now + record.open_duration_secs;
                    record.probe_in_flight = false;
                }
                BreakerState::Closed => {
                    record.failures += 1;
                    let total = record.successes + record.failures;
                    if total >= MIN_SAMPLES {
                        let ratio = record.failures as f64 / total as f64;
                        if ratio > ERROR_RATIO_THRESHOLD {
                            record.state = BreakerState::Open;
                            record.reopen_at = now + record.open_duration_secs;
                        }
                    }
                }
                BreakerState::Open => {}
            }
            if self.save_cas(&key, raw.as_deref(), &record).await? {
                return Ok(());
            }
        }
    }

    fn roll_window_if_stale(&self, record: &mut BreakerRecord, now: u64) {
        if record.state == BreakerState::Closed && now.saturating_sub(record.window_start) >= WINDOW_SECS {
            record.window_start = now;
            record.successes = 0;
            record.failures = 0;
        }
    }

    /// Load the current record along with its raw serialized form, so the
    /// caller can hand the raw form back to `save_cas` as the CAS "expected"
    /// value without a second read.
    async fn load_raw(&self, key: &str) -> Result<(BreakerRecord, Option<String>), KvError> {
        match self.kv.get(key).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw).unwrap_or_default();
                Ok((record, Some(raw)))
            }
            None => Ok((BreakerRecord::default(), None)),
        }
    }

    /// Write `record` only if the stored value still matches `expected_raw`.
    /// Returns `false` on a lost race; the caller should reload and retry.
    async fn save_cas(
        &self,
        key: &str,
        expected_raw: Option<&str>,
        record: &BreakerRecord,
    ) -> Result<bool, KvError> {
        let raw = serde_json::to_string(record).unwrap_or_default();
        self.kv.compare_and_swap(key, expected_raw, &raw, None).await
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
