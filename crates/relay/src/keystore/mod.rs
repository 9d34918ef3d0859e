// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-value store adapter: get/set with TTL, hashes, atomic incr, pipelines,
//! keyspace scans, and pub/sub, backed by Redis with an in-process fallback.

pub mod memory_store;
pub mod redis_store;

pub use memory_store::InMemoryKv;
pub use redis_store::RedisKv;

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv backend unreachable: {0}")]
    Unavailable(String),
    #[error("kv operation failed: {0}")]
    Operation(String),
}

pub type KvResult<T> = Result<T, KvError>;

/// A single entry in a sliding-window sorted set: `score` is the event
/// timestamp (seconds, used for trimming), `weight` is the admission cost
/// (e.g. token count) summed at check time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
    pub weight: f64,
}

/// A single write applied as part of a `pipeline` batch.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    Set { key: String, value: String, ttl_secs: Option<u64> },
    IncrBy { key: String, delta: i64 },
    HashSet { key: String, fields: Vec<(String, String)>, ttl_secs: Option<u64> },
    Zadd { key: String, member: String, score: f64, weight: f64 },
    Delete { key: String },
}

/// A stream of messages delivered to a `subscribe` caller.
pub type KvStream = std::pin::Pin<Box<dyn futures_util::Stream<Item = String> + Send>>;

/// Abstraction over the remote in-memory store. Every method must be safe to
/// call from multiple tasks/processes concurrently; atomicity guarantees are
/// documented per-method.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Set a string value, optionally with a TTL in seconds.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<()>;

    /// Set a string value only if the key does not already exist, with a TTL.
    /// Returns `true` if the key was set (lock acquired), `false` if it
    /// already existed. This is the primitive the OAuth manager uses for
    /// cross-process refresh-lock coalescing.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<bool>;

    /// Delete a key. No error if absent.
    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Atomically increment an integer counter, creating it at 0 if absent.
    /// Returns the value after increment.
    async fn incr_by(&self, key: &str, delta: i64) -> KvResult<i64>;

    /// Get an entire hash map stored at `key`.
    async fn hash_get_all(&self, key: &str) -> KvResult<HashMap<String, String>>;

    /// Set multiple fields in a hash map at `key`, optionally refreshing TTL.
    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl_secs: Option<u64>,
    ) -> KvResult<()>;

    /// Atomically increment one integer field of a hash, creating the hash
    /// and field at 0 if absent. Returns the value after increment. The
    /// primitive daily rollups use so concurrent commits to the same
    /// `usage:daily:*` key never lose an update to a read-modify-write race.
    async fn hash_incr_by(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_secs: Option<u64>,
    ) -> KvResult<i64>;

    /// Float-valued counterpart of [`KvStore::hash_incr_by`], used for cost
    /// accumulation.
    async fn hash_incr_by_float(
        &self,
        key: &str,
        field: &str,
        delta: f64,
        ttl_secs: Option<u64>,
    ) -> KvResult<f64>;

    /// Add a scored, weighted member to a sliding-window set (`member` must
    /// be unique per event, e.g. a request id, so repeated calls don't
    /// collide on the same score).
    async fn zadd(&self, key: &str, member: &str, score: f64, weight: f64) -> KvResult<()>;

    /// Remove members with score in `[min, max]` from a sorted set. Used to
    /// trim sliding-window entries older than the window.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> KvResult<()>;

    /// Sum of `weight` for all members currently in the sorted set (after the
    /// caller has trimmed stale entries) — used as the admission-check total.
    async fn zsum_weight(&self, key: &str) -> KvResult<f64>;

    /// Scan for keys matching a prefix. Best-effort; not guaranteed atomic
    /// against concurrent writers, used only for admin/diagnostic reads.
    /// Implementations must not block the backend on large keyspaces (e.g.
    /// Redis must use `SCAN`, never `KEYS`).
    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<String>>;

    /// Set expiry on an existing key.
    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()>;

    /// Get-check-set: write `new_value` (with optional TTL) only if the
    /// current value at `key` equals `expected` (`None` meaning "absent").
    /// Returns whether the swap applied. The whole-record CAS primitive
    /// used to guard single-probe admission in the circuit breaker.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new_value: &str,
        ttl_secs: Option<u64>,
    ) -> KvResult<bool>;

    /// Atomically apply `balance <- max(0, balance - amount)` to the
    /// numeric string stored at `key` (treated as `0` if absent). Returns
    /// the balance after the decrement and whether `amount` exceeded the
    /// balance before it was clamped (i.e. the account ran dry).
    async fn decr_credit_clamped(&self, key: &str, amount: f64) -> KvResult<(f64, bool)>;

    /// Apply a batch of writes as a single atomic unit.
    async fn pipeline(&self, ops: &[PipelineOp]) -> KvResult<()>;

    /// Publish a message on a channel. Fire-and-forget: no-op if nobody is
    /// currently subscribed.
    async fn publish(&self, channel: &str, message: &str) -> KvResult<()>;

    /// Subscribe to a channel, yielding a stream of published messages.
    async fn subscribe(&self, channel: &str) -> KvResult<KvStream>;
}

/// Render an `account:{id}` style key. Centralized so the layout in spec
/// stays consistent across callers.
pub mod keys {
    pub fn api_key(id: &str) -> String {
        format!("apikey:{id}")
    }

    pub fn api_key_hash_index(hash: &str) -> String {
        format!("apikey_hash:{hash}")
    }

    pub fn account(id: &str) -> String {
        format!("account:{id}")
    }

    pub fn account_group(id: &str) -> String {
        format!("account_group:{id}")
    }

    pub fn session_sticky(fingerprint: &str) -> String {
        format!("session:{fingerprint}")
    }

    pub fn inflight(account_id: &str) -> String {
        format!("inflight:{account_id}")
    }

    pub fn inflight_key(api_key_id: &str) -> String {
        format!("inflight_key:{api_key_id}")
    }

    pub fn rate_limit_requests(api_key_id: &str) -> String {
        format!("rl:{api_key_id}:req")
    }

    pub fn rate_limit_tokens(api_key_id: &str) -> String {
        format!("rl:{api_key_id}:tok")
    }

    pub fn usage_daily(date: &str, api_key_id: &str, model: &str) -> String {
        format!("usage:daily:{date}:{api_key_id}:{model}")
    }

    pub fn breaker(account_id: &str) -> String {
        format!("breaker:{account_id}")
    }

    pub fn credit_balance(api_key_id: &str) -> String {
        format!("credits:{api_key_id}")
    }

    pub fn refresh_lock(account_id: &str) -> String {
        format!("refresh_lock:{account_id}")
    }
}
