// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed `KvStore`, the primary adapter. Uses a `ConnectionManager`
//! so transient connection loss reconnects automatically instead of
//! propagating every blip to callers.

use std::collections::HashMap;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{KvError, KvResult, KvStore, KvStream, PipelineOp};

#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    // Kept alongside the pooled `ConnectionManager` because pub/sub needs a
    // dedicated connection (`get_async_pubsub`) rather than the shared
    // multiplexed one.
    client: redis::Client,
}

impl RedisKv {
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url).map_err(|e| KvError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        Ok(Self { conn, client })
    }
}

#[async_trait::async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<()> {
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl)
                .await
                .map_err(|e| KvError::Operation(e.to_string())),
            None => {
                conn.set::<_, _, ()>(key, value).await.map_err(|e| KvError::Operation(e.to_string()))
            }
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        let ok: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map(|r| r.is_some())
            .map_err(|e| KvError::Operation(e.to_string()))?;
        Ok(ok)
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> KvResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, delta).await.map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn hash_get_all(&self, key: &str) -> KvResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl_secs: Option<u64>,
    ) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let owned: Vec<(&str, &str)> = fields.to_vec();
        conn.hset_multiple::<_, _, _, ()>(key, &owned)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))?;
        if let Some(ttl) = ttl_secs {
            conn.expire::<_, ()>(key, ttl as i64)
                .await
                .map_err(|e| KvError::Operation(e.to_string()))?;
        }
        Ok(())
    }

    async fn hash_incr_by(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_secs: Option<u64>,
    ) -> KvResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.hincr(key, field, delta).await.map_err(|e| KvError::Operation(e.to_string()))?;
        if let Some(ttl) = ttl_secs {
            conn.expire::<_, ()>(key, ttl as i64)
                .await
                .map_err(|e| KvError::Operation(e.to_string()))?;
        }
        Ok(value)
    }

    async fn hash_incr_by_float(
        &self,
        key: &str,
        field: &str,
        delta: f64,
        ttl_secs: Option<u64>,
    ) -> KvResult<f64> {
        let mut conn = self.conn.clone();
        let value: f64 =
            conn.hincr(key, field, delta).await.map_err(|e| KvError::Operation(e.to_string()))?;
        if let Some(ttl) = ttl_secs {
            conn.expire::<_, ()>(key, ttl as i64)
                .await
                .map_err(|e| KvError::Operation(e.to_string()))?;
        }
        Ok(value)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64, weight: f64) -> KvResult<()> {
        let mut conn = self.conn.clone();
        // Encode weight alongside the caller-supplied member id since a ZSET
        // member carries no payload beyond itself; score stays the timestamp
        // so zremrangebyscore can still trim on time alone.
        let encoded = format!("{member}:{weight}");
        conn.zadd::<_, _, _, ()>(key, encoded, score)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> KvResult<()> {
        let mut conn = self.conn.clone();
        conn.zrembyscore::<_, _, _, ()>(key, min, max)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn zsum_weight(&self, key: &str) -> KvResult<f64> {
        let mut conn = self.conn.clone();
        let members: Vec<String> =
            conn.zrange(key, 0, -1).await.map_err(|e| KvError::Operation(e.to_string()))?;
        let total = members
            .iter()
            .filter_map(|m| m.rsplit_once(':'))
            .filter_map(|(_, weight)| weight.parse::<f64>().ok())
            .sum();
        Ok(total)
    }

    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        // SCAN cursors instead of KEYS: this runs on hot admin-read paths
        // and KEYS blocks the single-threaded server for the full scan.
        let mut iter: redis::AsyncIter<String> = conn
            .scan_match(pattern)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl_secs as i64)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new_value: &str,
        ttl_secs: Option<u64>,
    ) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(
            r"
            local cur = redis.call('GET', KEYS[1])
            local matches
            if ARGV[3] == '1' then
                matches = (cur == ARGV[1])
            else
                matches = (cur == false)
            end
            if matches then
                if ARGV[4] ~= '' then
                    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[4])
                else
                    redis.call('SET', KEYS[1], ARGV[2])
                end
                return 1
            end
            return 0
            ",
        );
        let ttl_arg = ttl_secs.map(|t| t.to_string()).unwrap_or_default();
        let applied: i64 = script
            .key(key)
            .arg(expected.unwrap_or(""))
            .arg(new_value)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(ttl_arg)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))?;
        Ok(applied == 1)
    }

    async fn decr_credit_clamped(&self, key: &str, amount: f64) -> KvResult<(f64, bool)> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(
            r"
            local cur = tonumber(redis.call('GET', KEYS[1]))
            if cur == nil then cur = 0 end
            local amount = tonumber(ARGV[1])
            local insufficient = 0
            if amount > cur then insufficient = 1 end
            local newbal = cur - amount
            if newbal < 0 then newbal = 0 end
            redis.call('SET', KEYS[1], tostring(newbal))
            return {tostring(newbal), insufficient}
            ",
        );
        let (balance, insufficient): (String, i64) = script
            .key(key)
            .arg(amount)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))?;
        let balance: f64 = balance.parse().map_err(|_| {
            KvError::Operation(format!("non-numeric balance returned for {key}"))
        })?;
        Ok((balance, insufficient == 1))
    }

    async fn pipeline(&self, ops: &[PipelineOp]) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                PipelineOp::Set { key, value, ttl_secs } => match ttl_secs {
                    Some(ttl) => {
                        pipe.set_ex(key, value, *ttl);
                    }
                    None => {
                        pipe.set(key, value);
                    }
                },
                PipelineOp::IncrBy { key, delta } => {
                    pipe.incr(key, *delta);
                }
                PipelineOp::HashSet { key, fields, ttl_secs } => {
                    let owned: Vec<(&str, &str)> =
                        fields.iter().map(|(f, v)| (f.as_str(), v.as_str())).collect();
                    pipe.hset_multiple(key, &owned);
                    if let Some(ttl) = ttl_secs {
                        pipe.expire(key, *ttl as i64);
                    }
                }
                PipelineOp::Zadd { key, member, score, weight } => {
                    let encoded = format!("{member}:{weight}");
                    pipe.zadd(key, encoded, *score);
                }
                PipelineOp::Delete { key } => {
                    pipe.del(key);
                }
            }
        }
        pipe.query_async::<()>(&mut conn).await.map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn publish(&self, channel: &str, message: &str) -> KvResult<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, message)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> KvResult<KvStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        pubsub.subscribe(channel).await.map_err(|e| KvError::Operation(e.to_string()))?;
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(Box::pin(stream))
    }
}
