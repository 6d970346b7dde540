//! # KV Store Adapter
//!
//! A thin, explicitly constructed adapter over a managed Redis connection.
//! One `KvStore` is created by the hosting application and cloned into every
//! component; cloning shares the underlying connection manager, preserving
//! the "single shared client" model without hidden global state.
//!
//! The adapter owns the crate's entire retry and timeout policy: every
//! command runs under the configured command timeout and a bounded retry
//! loop. Components above this layer never retry; a returned error is final
//! and is mapped to each component's documented fallback.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared KV store client.
///
/// Cheap to clone; all clones share one connection manager.
#[derive(Clone)]
pub struct KvStore {
    manager: ConnectionManager,
    config: StoreConfig,
}

impl KvStore {
    /// Connect to the store using the given configuration.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.effective_url().as_str())?;

        let manager = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout { op: "CONNECT" })??;

        info!(url = %config.url, database = config.database, "Connected to KV store");

        Ok(Self { manager, config })
    }

    /// The uniform key prefix this client applies beneath component
    /// namespaces.
    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Execute a command with the configured timeout and bounded retry.
    ///
    /// The closure receives its own clone of the connection manager; the
    /// manager reconnects internally, so a retry only needs to re-issue the
    /// command.
    async fn run<T, F>(&self, op: &'static str, operation: F) -> StoreResult<T>
    where
        F: Fn(ConnectionManager) -> Pin<Box<dyn Future<Output = RedisResult<T>> + Send>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let fut = operation(self.manager.clone());

            let outcome = match tokio::time::timeout(self.config.command_timeout, fut).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => StoreError::Redis(e),
                Err(_) => StoreError::Timeout { op },
            };

            if attempt >= self.config.max_retries {
                warn!(op, attempt, error = %outcome, "Store command failed, retries exhausted");
                return Err(outcome);
            }

            attempt += 1;
            debug!(op, attempt, error = %outcome, "Store command failed, retrying");
            tokio::time::sleep(self.config.retry_delay * attempt).await;
        }
    }

    // ---- string operations ----

    /// Get the raw string value at a key, if present.
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let full = self.full_key(key);
        self.run("GET", move |mut conn| {
            let full = full.clone();
            Box::pin(async move { conn.get::<_, Option<String>>(&full).await })
        })
        .await
    }

    /// Set a key to a string value with a TTL.
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let full = self.full_key(key);
        let value = value.to_string();
        let secs = ttl.as_secs().max(1);

        self.run("SET", move |mut conn| {
            let full = full.clone();
            let value = value.clone();
            Box::pin(async move {
                redis::cmd("SET")
                    .arg(&full)
                    .arg(&value)
                    .arg("EX")
                    .arg(secs)
                    .query_async::<_, ()>(&mut conn)
                    .await
            })
        })
        .await
    }

    /// Delete a key. Returns whether a key was actually removed.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let full = self.full_key(key);
        let removed: i64 = self
            .run("DEL", move |mut conn| {
                let full = full.clone();
                Box::pin(async move { conn.del::<_, i64>(&full).await })
            })
            .await?;
        Ok(removed > 0)
    }

    /// Delete a batch of keys in one command. Returns the number removed.
    pub async fn delete_many(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let full: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let removed: i64 = self
            .run("DEL", move |mut conn| {
                let full = full.clone();
                Box::pin(async move { conn.del::<_, i64>(&full).await })
            })
            .await?;
        Ok(removed.max(0) as u64)
    }

    /// Whether a key exists.
    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let full = self.full_key(key);
        self.run("EXISTS", move |mut conn| {
            let full = full.clone();
            Box::pin(async move { conn.exists::<_, bool>(&full).await })
        })
        .await
    }

    /// Atomically increment a key by `amount`, creating it at 0 if absent.
    /// Returns the value after the increment.
    pub async fn increment(&self, key: &str, amount: i64) -> StoreResult<i64> {
        let full = self.full_key(key);
        self.run("INCRBY", move |mut conn| {
            let full = full.clone();
            Box::pin(async move { conn.incr::<_, _, i64>(&full, amount).await })
        })
        .await
    }

    /// Set a key's TTL. Returns false if the key does not exist.
    pub async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let full = self.full_key(key);
        let secs = ttl.as_secs().max(1);

        let applied: i64 = self
            .run("EXPIRE", move |mut conn| {
                let full = full.clone();
                Box::pin(async move {
                    redis::cmd("EXPIRE")
                        .arg(&full)
                        .arg(secs)
                        .query_async::<_, i64>(&mut conn)
                        .await
                })
            })
            .await?;
        Ok(applied > 0)
    }

    /// Remaining TTL in seconds: -2 if the key does not exist, -1 if it has
    /// no expiry.
    pub async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let full = self.full_key(key);
        self.run("TTL", move |mut conn| {
            let full = full.clone();
            Box::pin(async move {
                redis::cmd("TTL")
                    .arg(&full)
                    .query_async::<_, i64>(&mut conn)
                    .await
            })
        })
        .await
    }

    /// All keys matching a glob pattern, found via a cursor scan. The
    /// uniform key prefix is applied to the pattern and stripped from the
    /// results, so callers only ever see their own key space.
    pub async fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let full_pattern = self.full_key(pattern);
        let keys: Vec<String> = self
            .run("SCAN", move |mut conn| {
                let pattern = full_pattern.clone();
                Box::pin(async move {
                    let mut cursor: u64 = 0;
                    let mut all_keys = Vec::new();

                    loop {
                        let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(1000)
                            .query_async(&mut conn)
                            .await?;

                        all_keys.extend(keys);

                        if new_cursor == 0 {
                            break;
                        }
                        cursor = new_cursor;
                    }

                    Ok::<Vec<String>, redis::RedisError>(all_keys)
                })
            })
            .await?;

        let prefix = &self.config.key_prefix;
        Ok(keys
            .into_iter()
            .map(|k| k.strip_prefix(prefix).map(str::to_string).unwrap_or(k))
            .collect())
    }

    // ---- hash operations ----

    /// Set a field in a hash. Returns whether the field was newly created.
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let full = self.full_key(key);
        let field = field.to_string();
        let value = value.to_string();

        let created: i64 = self
            .run("HSET", move |mut conn| {
                let full = full.clone();
                let field = field.clone();
                let value = value.clone();
                Box::pin(async move { conn.hset::<_, _, _, i64>(&full, &field, &value).await })
            })
            .await?;
        Ok(created > 0)
    }

    /// Get a field from a hash.
    pub async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let full = self.full_key(key);
        let field = field.to_string();

        self.run("HGET", move |mut conn| {
            let full = full.clone();
            let field = field.clone();
            Box::pin(async move { conn.hget::<_, _, Option<String>>(&full, &field).await })
        })
        .await
    }

    /// Get all fields of a hash.
    pub async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let full = self.full_key(key);
        self.run("HGETALL", move |mut conn| {
            let full = full.clone();
            Box::pin(async move { conn.hgetall::<_, HashMap<String, String>>(&full).await })
        })
        .await
    }

    // ---- list operations ----

    /// Push a value onto the head of a list. Returns the new list length.
    pub async fn lpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let full = self.full_key(key);
        let value = value.to_string();

        let len: i64 = self
            .run("LPUSH", move |mut conn| {
                let full = full.clone();
                let value = value.clone();
                Box::pin(async move { conn.lpush::<_, _, i64>(&full, &value).await })
            })
            .await?;
        Ok(len.max(0) as u64)
    }

    /// Read an inclusive range of list elements.
    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let full = self.full_key(key);
        self.run("LRANGE", move |mut conn| {
            let full = full.clone();
            Box::pin(async move { conn.lrange::<_, Vec<String>>(&full, start, stop).await })
        })
        .await
    }

    /// Length of a list (0 if absent).
    pub async fn llen(&self, key: &str) -> StoreResult<u64> {
        let full = self.full_key(key);
        let len: i64 = self
            .run("LLEN", move |mut conn| {
                let full = full.clone();
                Box::pin(async move { conn.llen::<_, i64>(&full).await })
            })
            .await?;
        Ok(len.max(0) as u64)
    }

    // ---- sorted-set operations ----

    /// Add a member with a score. Returns whether the member was new.
    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let full = self.full_key(key);
        let member = member.to_string();

        let added: i64 = self
            .run("ZADD", move |mut conn| {
                let full = full.clone();
                let member = member.clone();
                Box::pin(async move { conn.zadd::<_, _, _, i64>(&full, &member, score).await })
            })
            .await?;
        Ok(added > 0)
    }

    /// Number of members in a sorted set (0 if absent).
    pub async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let full = self.full_key(key);
        let count: i64 = self
            .run("ZCARD", move |mut conn| {
                let full = full.clone();
                Box::pin(async move { conn.zcard::<_, i64>(&full).await })
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Score of a member, if present.
    pub async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let full = self.full_key(key);
        let member = member.to_string();

        self.run("ZSCORE", move |mut conn| {
            let full = full.clone();
            let member = member.clone();
            Box::pin(async move { conn.zscore::<_, _, Option<f64>>(&full, &member).await })
        })
        .await
    }

    /// Members with scores within `[min, max]`.
    pub async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        let full = self.full_key(key);
        self.run("ZRANGEBYSCORE", move |mut conn| {
            let full = full.clone();
            Box::pin(async move { conn.zrangebyscore::<_, _, _, Vec<String>>(&full, min, max).await })
        })
        .await
    }

    /// Remove members with scores within `[min, max]`. Returns the number
    /// removed.
    pub async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let full = self.full_key(key);
        let removed: i64 = self
            .run("ZREMRANGEBYSCORE", move |mut conn| {
                let full = full.clone();
                Box::pin(async move { conn.zrembyscore::<_, _, _, i64>(&full, min, max).await })
            })
            .await?;
        Ok(removed.max(0) as u64)
    }

    // ---- atomic pipelines ----

    /// The rate limiter's four-step probe, executed as one atomic batch:
    /// drop markers scored at or before `cutoff`, count the survivors, add
    /// the caller's marker scored at `now`, and refresh the key's TTL.
    ///
    /// Returns the member count observed *before* the new marker was added.
    /// Atomicity matters here: two concurrent probes for the same key must
    /// each observe the other's marker or not, never a torn intermediate
    /// state, so the store cannot admit more than the batch ordering allows.
    pub async fn sliding_window_probe(
        &self,
        key: &str,
        cutoff: f64,
        now: f64,
        member: &str,
        ttl: Duration,
    ) -> StoreResult<u64> {
        let full = self.full_key(key);
        let member = member.to_string();
        let secs = ttl.as_secs().max(1);

        let (count,): (i64,) = self
            .run("RATE_PROBE", move |mut conn| {
                let full = full.clone();
                let member = member.clone();
                Box::pin(async move {
                    redis::pipe()
                        .atomic()
                        .cmd("ZREMRANGEBYSCORE")
                        .arg(&full)
                        .arg("-inf")
                        .arg(cutoff)
                        .ignore()
                        .cmd("ZCARD")
                        .arg(&full)
                        .cmd("ZADD")
                        .arg(&full)
                        .arg(now)
                        .arg(&member)
                        .ignore()
                        .cmd("EXPIRE")
                        .arg(&full)
                        .arg(secs)
                        .ignore()
                        .query_async(&mut conn)
                        .await
                })
            })
            .await?;

        Ok(count.max(0) as u64)
    }

    /// The analytics write batch: push the serialized event onto its
    /// per-day list and bump each dimension counter, re-applying the
    /// retention TTL to every touched key in the same atomic batch.
    pub async fn analytics_record(
        &self,
        list_key: &str,
        payload: &str,
        counter_keys: &[String],
        ttl: Duration,
    ) -> StoreResult<()> {
        let list = self.full_key(list_key);
        let payload = payload.to_string();
        let counters: Vec<String> = counter_keys.iter().map(|k| self.full_key(k)).collect();
        let secs = ttl.as_secs().max(1);

        self.run("ANALYTICS_RECORD", move |mut conn| {
            let list = list.clone();
            let payload = payload.clone();
            let counters = counters.clone();
            Box::pin(async move {
                let mut pipe = redis::pipe();
                pipe.atomic();
                pipe.cmd("LPUSH").arg(&list).arg(&payload).ignore();
                pipe.cmd("EXPIRE").arg(&list).arg(secs).ignore();
                for counter in &counters {
                    pipe.cmd("INCRBY").arg(counter).arg(1).ignore();
                    pipe.cmd("EXPIRE").arg(counter).arg(secs).ignore();
                }
                pipe.query_async::<_, ()>(&mut conn).await
            })
        })
        .await
    }

    // ---- diagnostics ----

    /// Ping the store and report the round-trip latency.
    pub async fn ping(&self) -> StoreResult<Duration> {
        let start = Instant::now();
        let response: String = self
            .run("PING", move |mut conn| {
                Box::pin(async move { redis::cmd("PING").query_async::<_, String>(&mut conn).await })
            })
            .await?;

        if response == "PONG" {
            Ok(start.elapsed())
        } else {
            Err(StoreError::Configuration {
                message: format!("Unexpected PING response: {response}"),
            })
        }
    }

    /// Gracefully release the client. The managed connection closes when the
    /// last clone is dropped.
    pub fn close(self) {
        info!("KV store client released");
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("url", &self.config.url)
            .field("key_prefix", &self.config.key_prefix)
            .finish()
    }
}
