//! Redis-backed store
//!
//! Reuses one multiplexed connection across operations; every call is
//! bounded by a five second timeout so a wedged engine surfaces as an
//! error instead of a hung request handler.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::time::{timeout, Duration};

use super::Store;
use crate::error::{Error, Result};

/// Timeout for Redis operations in seconds
const REDIS_TIMEOUT_SECS: u64 = 5;

/// Redis-backed implementation of [`Store`].
pub struct RedisStore {
    client: redis::Client,
    /// Cached multiplexed connection, reused across operations
    cached_conn: tokio::sync::Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl RedisStore {
    /// Create a store from a connection URL. The connection itself is
    /// established lazily on first use.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid Redis URL: {e}")))?;
        Ok(Self {
            client,
            cached_conn: tokio::sync::Mutex::new(None),
        })
    }

    /// Get or create the cached multiplexed Redis connection.
    ///
    /// `MultiplexedConnection` handles concurrent requests internally and
    /// reconnects automatically, so we reuse a single instance.
    async fn get_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        let mut guard = self.cached_conn.lock().await;
        if let Some(ref conn) = *guard {
            return Ok(conn.clone());
        }
        let conn = timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::Timeout("Redis connection timed out".to_string()))?
        .map_err(|e| Error::Store(format!("Redis connection failed: {e}")))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd, what: &str) -> Result<T> {
        let mut conn = self.get_conn().await?;
        timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            cmd.query_async(&mut conn),
        )
        .await
        .map_err(|_| Error::Timeout(format!("Redis {what} timed out")))?
        .map_err(|e| Error::Store(format!("Redis {what} failed: {e}")))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        self.run::<()>(&cmd, "HSET").await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(key).arg(field);
        self.run(&cmd, "HGET").await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(key);
        self.run(&cmd, "HGETALL").await
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.run::<()>(&cmd, "DEL").await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut cmd = redis::cmd("SADD");
        cmd.arg(key).arg(member);
        self.run::<()>(&cmd, "SADD").await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut cmd = redis::cmd("SREM");
        cmd.arg(key).arg(member);
        self.run::<()>(&cmd, "SREM").await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(key);
        self.run(&cmd, "SMEMBERS").await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        self.run::<()>(&cmd, "EXPIRE").await
    }

    async fn ping(&self) -> Result<()> {
        let cmd = redis::cmd("PING");
        self.run::<String>(&cmd, "PING").await.map(|_| ())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // SCAN instead of KEYS: non-blocking, returns results incrementally.
        let mut conn = self.get_conn().await?;
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let scan_result: (u64, Vec<String>) = timeout(
                Duration::from_secs(REDIS_TIMEOUT_SECS),
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn),
            )
            .await
            .map_err(|_| Error::Timeout("Redis SCAN timed out".to_string()))?
            .map_err(|e| Error::Store(format!("Redis SCAN failed: {e}")))?;

            cursor = scan_result.0;
            keys.extend(scan_result.1);

            // cursor 0 means iteration complete
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<u64> {
        let keys = self.keys_with_prefix(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in &keys {
            cmd.arg(key);
        }
        self.run::<u64>(&cmd, "DEL").await
    }
}
