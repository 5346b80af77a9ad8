//! In-memory store double
//!
//! Implements the same hash/set/TTL semantics as the Redis engine so the
//! registry can be exercised without external services. Expired keys are
//! purged lazily on access. TTLs run on the tokio clock, which lets tests
//! drive expiry with `tokio::time::advance`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

use super::Store;
use crate::error::{Error, Result};

enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a key immediately, regardless of its TTL. Test hook for
    /// simulating engine-side expiry without waiting.
    pub fn expire_key_now(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.expired(now))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge(entries: &mut HashMap<String, Entry>, key: &str) {
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(map) => {
                for (field, value) in fields {
                    map.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            Value::Set(_) => Err(Error::Store(format!("WRONGTYPE: {key} is a set"))),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        match entries.get(key).map(|entry| &entry.value) {
            Some(Value::Hash(map)) => Ok(map.get(field).cloned()),
            Some(Value::Set(_)) => Err(Error::Store(format!("WRONGTYPE: {key} is a set"))),
            None => Ok(None),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        match entries.get(key).map(|entry| &entry.value) {
            Some(Value::Hash(map)) => Ok(map.clone()),
            Some(Value::Set(_)) => Err(Error::Store(format!("WRONGTYPE: {key} is a set"))),
            None => Ok(HashMap::new()),
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            Value::Hash(_) => Err(Error::Store(format!("WRONGTYPE: {key} is a hash"))),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        if let Some(entry) = entries.get_mut(key) {
            match &mut entry.value {
                Value::Set(set) => {
                    set.remove(member);
                }
                Value::Hash(_) => {
                    return Err(Error::Store(format!("WRONGTYPE: {key} is a hash")))
                }
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        match entries.get(key).map(|entry| &entry.value) {
            Some(Value::Set(set)) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(Value::Hash(_)) => Err(Error::Store(format!("WRONGTYPE: {key} is a hash"))),
            None => Ok(Vec::new()),
        }
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<u64> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}
