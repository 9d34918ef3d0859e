// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process `KvStore` fallback used when Redis is unreachable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{KvError, KvResult, KvStore, KvStream, PipelineOp};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t > now).unwrap_or(true)
    }
}

#[derive(Default)]
struct SortedSet {
    members: HashMap<String, (f64, f64)>, // member -> (score, weight)
}

/// In-process fallback store. Degraded mode: single-process semantics only,
/// so cross-process refresh-lock coalescing and scheduler in-flight caps
/// collapse to process-local guarantees while Redis is down.
pub struct InMemoryKv {
    strings: RwLock<HashMap<String, Entry>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    counters: RwLock<HashMap<String, i64>>,
    sorted_sets: RwLock<HashMap<String, SortedSet>>,
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            strings: RwLock::new(HashMap::new()),
            hashes: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            sorted_sets: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        })
    }

    /// Spawn a background sweep that evicts expired string entries. Hashes,
    /// counters, and sorted sets don't carry TTLs in this fallback — callers
    /// (scheduler in-flight reaper, rate limiter trim) are responsible for
    /// bounding their own growth via `zremrangebyscore`.
    pub fn spawn_ttl_sweep(self: &Arc<Self>, shutdown: CancellationToken) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let now = Instant::now();
                        let mut strings = store.strings.write().await;
                        strings.retain(|_, entry| entry.is_live(now));
                    }
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let strings = self.strings.read().await;
        let now = Instant::now();
        Ok(strings.get(key).filter(|e| e.is_live(now)).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<()> {
        let expires_at = ttl_secs.map(|s| Instant::now() + Duration::from_secs(s));
        self.strings
            .write()
            .await
            .insert(key.to_owned(), Entry { value: value.to_owned(), expires_at });
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<bool> {
        let mut strings = self.strings.write().await;
        let now = Instant::now();
        if let Some(existing) = strings.get(key) {
            if existing.is_live(now) {
                return Ok(false);
            }
        }
        strings.insert(
            key.to_owned(),
            Entry { value: value.to_owned(), expires_at: Some(now + Duration::from_secs(ttl_secs)) },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.strings.write().await.remove(key);
        self.hashes.write().await.remove(key);
        self.counters.write().await.remove(key);
        self.sorted_sets.write().await.remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> KvResult<i64> {
        let mut counters = self.counters.write().await;
        let value = counters.entry(key.to_owned()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn hash_get_all(&self, key: &str) -> KvResult<HashMap<String, String>> {
        Ok(self.hashes.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl_secs: Option<u64>,
    ) -> KvResult<()> {
        let mut hashes = self.hashes.write().await;
        let entry = hashes.entry(key.to_owned()).or_default();
        for (field, value) in fields {
            entry.insert((*field).to_owned(), (*value).to_owned());
        }
        let _ = ttl_secs; // hashes don't expire in this fallback, see spawn_ttl_sweep doc
        Ok(())
    }

    async fn hash_incr_by(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        _ttl_secs: Option<u64>,
    ) -> KvResult<i64> {
        let mut hashes = self.hashes.write().await;
        let entry = hashes.entry(key.to_owned()).or_default();
        let current = entry.get(field).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
        let updated = current + delta;
        entry.insert(field.to_owned(), updated.to_string());
        Ok(updated)
    }

    async fn hash_incr_by_float(
        &self,
        key: &str,
        field: &str,
        delta: f64,
        _ttl_secs: Option<u64>,
    ) -> KvResult<f64> {
        let mut hashes = self.hashes.write().await;
        let entry = hashes.entry(key.to_owned()).or_default();
        let current = entry.get(field).and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
        let updated = current + delta;
        entry.insert(field.to_owned(), updated.to_string());
        Ok(updated)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64, weight: f64) -> KvResult<()> {
        let mut sets = self.sorted_sets.write().await;
        sets.entry(key.to_owned()).or_default().members.insert(member.to_owned(), (score, weight));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> KvResult<()> {
        let mut sets = self.sorted_sets.write().await;
        if let Some(set) = sets.get_mut(key) {
            set.members.retain(|_, (score, _)| *score < min || *score > max);
        }
        Ok(())
    }

    async fn zsum_weight(&self, key: &str) -> KvResult<f64> {
        let sets = self.sorted_sets.read().await;
        Ok(sets.get(key).map(|s| s.members.values().map(|(_, w)| w).sum()).unwrap_or(0.0))
    }

    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<String>> {
        let now = Instant::now();
        let mut out: Vec<String> = {
            let strings = self.strings.read().await;
            strings
                .iter()
                .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
                .map(|(k, _)| k.clone())
                .collect()
        };
        let hashes = self.hashes.read().await;
        out.extend(hashes.keys().filter(|k| k.starts_with(prefix)).cloned());
        Ok(out)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()> {
        let mut strings = self.strings.write().await;
        if let Some(entry) = strings.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
            Ok(())
        } else {
            Err(KvError::Operation(format!("key not found: {key}")))
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new_value: &str,
        ttl_secs: Option<u64>,
    ) -> KvResult<bool> {
        let mut strings = self.strings.write().await;
        let now = Instant::now();
        let current = strings.get(key).filter(|e| e.is_live(now)).map(|e| e.value.as_str());
        if current != expected {
            return Ok(false);
        }
        let expires_at = ttl_secs.map(|s| now + Duration::from_secs(s));
        strings.insert(key.to_owned(), Entry { value: new_value.to_owned(), expires_at });
        Ok(true)
    }

    async fn decr_credit_clamped(&self, key: &str, amount: f64) -> KvResult<(f64, bool)> {
        let mut strings = self.strings.write().await;
        let now = Instant::now();
        let current = strings
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.value.parse::<f64>().ok())
            .unwrap_or(0.0);
        let insufficient = amount > current;
        let new_balance = (current - amount).max(0.0);
        strings.insert(key.to_owned(), Entry { value: new_balance.to_string(), expires_at: None });
        Ok((new_balance, insufficient))
    }

    async fn pipeline(&self, ops: &[PipelineOp]) -> KvResult<()> {
        for op in ops {
            match op {
                PipelineOp::Set { key, value, ttl_secs } => self.set(key, value, *ttl_secs).await?,
                PipelineOp::IncrBy { key, delta } => {
                    self.incr_by(key, *delta).await?;
                }
                PipelineOp::HashSet { key, fields, ttl_secs } => {
                    let refs: Vec<(&str, &str)> =
                        fields.iter().map(|(f, v)| (f.as_str(), v.as_str())).collect();
                    self.hash_set(key, &refs, *ttl_secs).await?;
                }
                PipelineOp::Zadd { key, member, score, weight } => {
                    self.zadd(key, member, *score, *weight).await?
                }
                PipelineOp::Delete { key } => self.delete(key).await?,
            }
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> KvResult<()> {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(channel) {
            let _ = tx.send(message.to_owned());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> KvResult<KvStream> {
        let tx = {
            let mut channels = self.channels.write().await;
            channels.entry(channel.to_owned()).or_insert_with(|| broadcast::channel(64).0).clone()
        };
        let rx = tx.subscribe();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, rx)),
                    Err(broadcast::error::RecvError::Closed) => return None,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod memory_store_tests;
