//! Membership operations against the store
//!
//! Soft-state lifecycle: a member record is a hash under `member:<id>` with
//! a TTL refreshed by heartbeats, and set membership in `active_members`.
//! Graceful exits move the record to `deregistered:<id>` for an hour so
//! dashboards can distinguish a clean departure from a crash. Every read
//! path reconciles: a set entry whose hash has expired is dropped on sight.

use std::collections::HashMap;
use std::sync::Arc;

use netring_core::error::{Error, Result};
use netring_core::protocol::{
    now_epoch, MemberEntry, MetricReport, RegisterRequest, STATUS_ACTIVE, STATUS_DEREGISTERED,
};
use netring_core::Store;
use uuid::Uuid;

use crate::keys;

/// Store-level membership operations shared by the HTTP handlers and the
/// cleanup loop.
pub struct MembershipStore {
    store: Arc<dyn Store>,
    member_ttl: u64,
}

impl MembershipStore {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, member_ttl: u64) -> Self {
        Self { store, member_ttl }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn member_ttl(&self) -> u64 {
        self.member_ttl
    }

    /// Register a member, assigning an instance id when the caller did not
    /// bring one. Re-registration under an existing id is an overwrite.
    pub async fn register(&self, request: &RegisterRequest) -> Result<String> {
        if request.location.is_empty() {
            return Err(Error::Invalid("location must not be empty".to_string()));
        }
        if request.ip.is_empty() {
            return Err(Error::Invalid("ip must not be empty".to_string()));
        }

        let instance_id = request
            .instance_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = now_epoch();

        let key = keys::member_key(&instance_id);
        self.store
            .hset(
                &key,
                &[
                    ("instance_id".to_string(), instance_id.clone()),
                    ("location".to_string(), request.location.clone()),
                    ("ip".to_string(), request.ip.clone()),
                    ("port".to_string(), request.port.to_string()),
                    ("last_seen".to_string(), now.to_string()),
                    ("registered_at".to_string(), now.to_string()),
                ],
            )
            .await?;
        self.store.expire(&key, self.member_ttl).await?;
        self.store.sadd(keys::ACTIVE_SET, &instance_id).await?;

        tracing::info!(
            instance_id = %instance_id,
            location = %request.location,
            "registered member"
        );
        Ok(instance_id)
    }

    /// Refresh a member's TTL. Returns false when the record is gone.
    pub async fn heartbeat(&self, instance_id: &str) -> Result<bool> {
        let key = keys::member_key(instance_id);
        let record = self.store.hgetall(&key).await?;
        if record.is_empty() {
            return Ok(false);
        }
        self.store
            .hset(&key, &[("last_seen".to_string(), now_epoch().to_string())])
            .await?;
        self.store.expire(&key, self.member_ttl).await?;
        Ok(true)
    }

    /// Graceful departure. Returns false when the member is unknown.
    pub async fn deregister(&self, instance_id: &str) -> Result<bool> {
        let key = keys::member_key(instance_id);
        let record = self.store.hgetall(&key).await?;
        if record.is_empty() {
            return Ok(false);
        }

        let dereg_key = keys::deregistered_key(instance_id);
        let mut fields: Vec<(String, String)> = record.into_iter().collect();
        fields.push(("deregistered_at".to_string(), now_epoch().to_string()));
        self.store.hset(&dereg_key, &fields).await?;
        self.store.expire(&dereg_key, keys::DEREGISTERED_TTL).await?;
        self.store.sadd(keys::DEREGISTERED_SET, instance_id).await?;
        self.store
            .expire(keys::DEREGISTERED_SET, keys::DEREGISTERED_TTL)
            .await?;

        self.store.del(&key).await?;
        self.store.srem(keys::ACTIVE_SET, instance_id).await?;

        tracing::info!(instance_id = %instance_id, "deregistered member");
        Ok(true)
    }

    /// Merged view of active and recently departed members. Dangling set
    /// entries are removed as they are discovered.
    pub async fn members(&self) -> Result<Vec<MemberEntry>> {
        let mut members = Vec::new();

        for instance_id in self.store.smembers(keys::ACTIVE_SET).await? {
            let record = self.store.hgetall(&keys::member_key(&instance_id)).await?;
            if record.is_empty() {
                // Hash expired under the set entry; reconcile.
                self.store.srem(keys::ACTIVE_SET, &instance_id).await?;
                continue;
            }
            match parse_member(&instance_id, &record, STATUS_ACTIVE) {
                Some(entry) => members.push(entry),
                None => {
                    tracing::warn!(instance_id = %instance_id, "malformed member record, dropping");
                    self.store.srem(keys::ACTIVE_SET, &instance_id).await?;
                }
            }
        }

        for instance_id in self.store.smembers(keys::DEREGISTERED_SET).await? {
            let record = self
                .store
                .hgetall(&keys::deregistered_key(&instance_id))
                .await?;
            if record.is_empty() {
                self.store.srem(keys::DEREGISTERED_SET, &instance_id).await?;
                continue;
            }
            if let Some(entry) = parse_member(&instance_id, &record, STATUS_DEREGISTERED) {
                members.push(entry);
            }
        }

        Ok(members)
    }

    /// Does an active record exist for this id?
    pub async fn is_known(&self, instance_id: &str) -> Result<bool> {
        let record = self.store.hgetall(&keys::member_key(instance_id)).await?;
        Ok(!record.is_empty())
    }

    /// Location of an active member, when known.
    pub async fn location_of(&self, instance_id: &str) -> Result<Option<String>> {
        self.store
            .hget(&keys::member_key(instance_id), "location")
            .await
    }

    /// Persist a metric report snapshot for five minutes.
    pub async fn store_report(&self, report: &MetricReport) -> Result<()> {
        let metrics_json = serde_json::to_string(&report.metrics)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let key = keys::metrics_key(&report.instance_id);
        self.store
            .hset(
                &key,
                &[
                    ("instance_id".to_string(), report.instance_id.clone()),
                    ("metrics".to_string(), metrics_json),
                    ("timestamp".to_string(), now_epoch().to_string()),
                ],
            )
            .await?;
        self.store.expire(&key, keys::METRICS_TTL).await?;
        self.store
            .sadd(keys::REPORTING_SET, &report.instance_id)
            .await?;
        self.store
            .expire(keys::REPORTING_SET, keys::METRICS_TTL)
            .await?;
        Ok(())
    }

    /// All stored per-member metric snapshots, as raw JSON values.
    pub async fn metric_snapshots(&self) -> Result<HashMap<String, serde_json::Value>> {
        let mut snapshots = HashMap::new();
        let prefix = format!("{}metrics:", keys::PREFIX);
        for key in self.store.keys_with_prefix(&prefix).await? {
            let Some(instance_id) = keys::instance_from_metrics_key(&key) else {
                continue;
            };
            let record = self.store.hgetall(&key).await?;
            let Some(raw) = record.get("metrics") else {
                continue;
            };
            match serde_json::from_str(raw) {
                Ok(value) => {
                    snapshots.insert(instance_id.to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(instance_id = %instance_id, error = %e, "unreadable metric snapshot");
                }
            }
        }
        Ok(snapshots)
    }
}

fn parse_member(
    instance_id: &str,
    record: &HashMap<String, String>,
    status: &str,
) -> Option<MemberEntry> {
    Some(MemberEntry {
        instance_id: instance_id.to_string(),
        location: record.get("location")?.clone(),
        ip: record.get("ip")?.clone(),
        port: record.get("port")?.parse().ok()?,
        last_seen: record.get("last_seen")?.parse().ok()?,
        registered_at: record.get("registered_at")?.parse().ok()?,
        status: status.to_string(),
        deregistered_at: record
            .get("deregistered_at")
            .and_then(|raw| raw.parse().ok()),
    })
}
