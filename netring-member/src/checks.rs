//! Pairwise connectivity probes
//!
//! One TCP open-and-close plus one HTTP GET per configured endpoint against
//! every known peer. Outcomes land in the Prometheus gauges and in the
//! probe state that feeds the next metric report.

use std::time::Instant;

use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::agent::MemberAgent;
use crate::metrics;

impl MemberAgent {
    /// Connectivity loop body. Skips entirely while the peer map is empty.
    pub async fn run_connectivity_checks(&self) -> anyhow::Result<()> {
        let peers = self.peers().await;
        if peers.is_empty() {
            debug!("no peers known yet, skipping connectivity checks");
            return Ok(());
        }

        let tcp_timeout = Duration::from_secs(self.config().checks.tcp_timeout);
        let endpoints = self.config().checks.http_endpoints.clone();

        for peer in &peers {
            let key = Self::target_key(peer);

            let start = Instant::now();
            let tcp_up = tcp_probe(&peer.ip, peer.port, tcp_timeout).await;
            let tcp_duration = start.elapsed().as_secs_f64();

            metrics::CONNECTIVITY_TCP
                .with_label_values(&[
                    self.location(),
                    self.instance_id(),
                    &peer.location,
                    &peer.instance_id,
                    &peer.ip,
                ])
                .set(if tcp_up { 1.0 } else { 0.0 });
            metrics::CHECK_DURATION_SECONDS
                .with_label_values(&["tcp", &peer.location, &peer.instance_id])
                .observe(tcp_duration);

            {
                let mut state = self.probe_state().lock();
                state
                    .connectivity_tcp
                    .insert(key.clone(), if tcp_up { 1.0 } else { 0.0 });
                state
                    .check_durations
                    .insert(format!("{key}:tcp"), tcp_duration);
            }

            for endpoint in &endpoints {
                let url = format!("http://{}:{}{}", peer.ip, peer.port, endpoint);
                let start = Instant::now();
                let http_up = match self.client().get(&url).send().await {
                    Ok(response) => response.status().as_u16() < 500,
                    Err(_) => false,
                };
                let http_duration = start.elapsed().as_secs_f64();

                metrics::CONNECTIVITY_HTTP
                    .with_label_values(&[
                        self.location(),
                        self.instance_id(),
                        &peer.location,
                        &peer.instance_id,
                        &peer.ip,
                        endpoint,
                    ])
                    .set(if http_up { 1.0 } else { 0.0 });
                metrics::CHECK_DURATION_SECONDS
                    .with_label_values(&["http", &peer.location, &peer.instance_id])
                    .observe(http_duration);

                let mut state = self.probe_state().lock();
                state
                    .connectivity_http
                    .insert(format!("{key}:{endpoint}"), if http_up { 1.0 } else { 0.0 });
                state
                    .check_durations
                    .insert(format!("{key}:http"), http_duration);
            }
        }

        debug!(peers = peers.len(), "completed connectivity checks");
        Ok(())
    }
}

/// One TCP connect-and-close against a peer.
async fn tcp_probe(ip: &str, port: u16, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect((ip, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(_)) | Err(_) => false,
    }
}
