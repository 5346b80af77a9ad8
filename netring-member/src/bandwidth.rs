//! Bandwidth measurement against peer echo endpoints
//!
//! Each peer serves an uncompressible payload of exactly known length from
//! `/bandwidth_test`; wall time from request start to full body read gives
//! the throughput without framing ambiguity.

use std::time::Instant;

use tracing::{debug, warn};

use crate::agent::MemberAgent;
use crate::metrics;

/// Mbps from a byte count and a wall-clock duration. Zero or negative
/// durations yield zero instead of dividing by it.
#[must_use]
pub fn compute_mbps(bytes: u64, duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
}

impl MemberAgent {
    /// Bandwidth loop body: pull the test payload from every peer.
    pub async fn run_bandwidth_tests(&self) -> anyhow::Result<()> {
        let peers = self.peers().await;
        if peers.is_empty() {
            debug!("no peers known yet, skipping bandwidth tests");
            return Ok(());
        }

        let size_mb = self.config().tests.bandwidth_test_size_mb;

        for peer in &peers {
            let url = format!(
                "http://{}:{}/bandwidth_test?size={size_mb}",
                peer.ip, peer.port
            );
            let start = Instant::now();
            let body = match self.client().get(&url).send().await {
                Ok(response) if response.status().is_success() => response.bytes().await,
                Ok(response) => {
                    warn!(
                        peer = %peer.instance_id,
                        status = %response.status(),
                        "bandwidth test rejected"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(peer = %peer.instance_id, error = %e, "bandwidth test failed");
                    continue;
                }
            };
            let bytes = match body {
                Ok(bytes) => bytes.len() as u64,
                Err(e) => {
                    warn!(peer = %peer.instance_id, error = %e, "bandwidth body read failed");
                    continue;
                }
            };
            let duration = start.elapsed().as_secs_f64();
            let mbps = compute_mbps(bytes, duration);

            metrics::BANDWIDTH_MBPS
                .with_label_values(&[
                    self.location(),
                    self.instance_id(),
                    &peer.location,
                    &peer.instance_id,
                    &peer.ip,
                ])
                .set(mbps);
            self.probe_state()
                .lock()
                .bandwidth_tests
                .insert(Self::target_key(peer), mbps);

            debug!(
                peer = %peer.instance_id,
                bytes,
                duration_secs = duration,
                mbps,
                "bandwidth test complete"
            );
        }

        Ok(())
    }
}
