//! Background reconciliation of soft state
//!
//! The engine's key TTLs do most of the work; this loop removes the
//! stragglers they leave behind: set entries whose hash expired, dead
//! members whose last heartbeat predates the TTL, departed records past
//! their hour, stale reporter entries. A failure on one id is logged and
//! the scan moves on.

use std::sync::Arc;

use netring_core::protocol::now_epoch;
use netring_core::Store;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::keys;
use crate::membership::MembershipStore;

/// Spawn the periodic cleanup loop.
pub fn spawn_cleanup_loop(
    membership: Arc<MembershipStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("cleanup loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    run_cleanup_once(&membership).await;
                }
            }
        }
    })
}

/// One full reconciliation pass.
pub async fn run_cleanup_once(membership: &MembershipStore) {
    let store = membership.store();
    let now = now_epoch();

    match store.smembers(keys::ACTIVE_SET).await {
        Ok(instance_ids) => {
            for instance_id in instance_ids {
                let key = keys::member_key(&instance_id);
                let record = match store.hgetall(&key).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(instance_id = %instance_id, error = %e, "cleanup read failed");
                        continue;
                    }
                };
                if record.is_empty() {
                    if let Err(e) = store.srem(keys::ACTIVE_SET, &instance_id).await {
                        warn!(instance_id = %instance_id, error = %e, "cleanup srem failed");
                    } else {
                        info!(instance_id = %instance_id, "removed stale member");
                    }
                    continue;
                }
                let last_seen: i64 = record
                    .get("last_seen")
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(0);
                if now - last_seen > membership.member_ttl() as i64 {
                    if let Err(e) = store.del(&key).await {
                        warn!(instance_id = %instance_id, error = %e, "cleanup del failed");
                        continue;
                    }
                    if let Err(e) = store.srem(keys::ACTIVE_SET, &instance_id).await {
                        warn!(instance_id = %instance_id, error = %e, "cleanup srem failed");
                        continue;
                    }
                    info!(instance_id = %instance_id, "cleaned up dead member");
                }
            }
        }
        Err(e) => warn!(error = %e, "cleanup could not list active members"),
    }

    match store.smembers(keys::DEREGISTERED_SET).await {
        Ok(instance_ids) => {
            for instance_id in instance_ids {
                let key = keys::deregistered_key(&instance_id);
                let record = match store.hgetall(&key).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(instance_id = %instance_id, error = %e, "cleanup read failed");
                        continue;
                    }
                };
                let expired = if record.is_empty() {
                    true
                } else {
                    let deregistered_at: i64 = record
                        .get("deregistered_at")
                        .and_then(|raw| raw.parse().ok())
                        .unwrap_or(0);
                    now - deregistered_at > keys::DEREGISTERED_TTL as i64
                };
                if expired {
                    if let Err(e) = store.del(&key).await {
                        warn!(instance_id = %instance_id, error = %e, "cleanup del failed");
                        continue;
                    }
                    if let Err(e) = store.srem(keys::DEREGISTERED_SET, &instance_id).await {
                        warn!(instance_id = %instance_id, error = %e, "cleanup srem failed");
                    }
                }
            }
        }
        Err(e) => warn!(error = %e, "cleanup could not list deregistered members"),
    }

    match store.smembers(keys::REPORTING_SET).await {
        Ok(instance_ids) => {
            for instance_id in instance_ids {
                let key = keys::metrics_key(&instance_id);
                let record = match store.hgetall(&key).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(instance_id = %instance_id, error = %e, "cleanup read failed");
                        continue;
                    }
                };
                let expired = if record.is_empty() {
                    true
                } else {
                    let reported_at: i64 = record
                        .get("timestamp")
                        .and_then(|raw| raw.parse().ok())
                        .unwrap_or(0);
                    now - reported_at > keys::METRICS_TTL as i64
                };
                if expired {
                    if let Err(e) = store.del(&key).await {
                        warn!(instance_id = %instance_id, error = %e, "cleanup del failed");
                        continue;
                    }
                    if let Err(e) = store.srem(keys::REPORTING_SET, &instance_id).await {
                        warn!(instance_id = %instance_id, error = %e, "cleanup srem failed");
                    }
                }
            }
        }
        Err(e) => warn!(error = %e, "cleanup could not list reporting members"),
    }
}
