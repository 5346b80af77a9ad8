//! Persistence layer abstraction
//!
//! The registry's soft state lives in a keyed hash-and-set store with
//! per-key TTLs. Every operation is single-key and individually atomic;
//! there are no multi-key transactions anywhere in the protocol, so any
//! engine with these primitives qualifies.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Hash-and-set store with TTL support.
#[async_trait]
pub trait Store: Send + Sync {
    /// Set fields on a hash, creating the key if absent.
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Read a single hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Read all fields of a hash. Missing keys yield an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Delete a key of any type.
    async fn del(&self, key: &str) -> Result<()>;

    /// Add a member to a set, creating the key if absent.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set.
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// List set members. Missing keys yield an empty list.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Set or refresh the TTL on a key.
    async fn expire(&self, key: &str, seconds: u64) -> Result<()>;

    /// Liveness probe against the engine.
    async fn ping(&self) -> Result<()>;

    /// Enumerate keys under a prefix.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete every key under a prefix, returning how many were removed.
    async fn flush_prefix(&self, prefix: &str) -> Result<u64>;
}
