//! Traceroute invocation and output parsing
//!
//! Shells out to the host `traceroute` binary (numeric output, 3s per-hop
//! wait, one probe per hop) and parses the standard
//! `<hop> <ip> <latency> ms` line shape. Timed-out hops appear as `*` and
//! are kept in the hop list with no latency; they count toward the hop
//! total but never contribute to the latency maximum.

use netring_core::protocol::{TracerouteHop, TracerouteSummary};
use tokio::process::Command;

/// A parsed traceroute run.
#[derive(Debug, Clone, Default)]
pub struct TracerouteResult {
    pub hops: Vec<TracerouteHop>,
}

impl TracerouteResult {
    #[must_use]
    pub fn summary(&self) -> TracerouteSummary {
        let max_hop_latency_ms = self
            .hops
            .iter()
            .filter_map(|hop| hop.latency_ms)
            .fold(0.0_f64, f64::max);
        TracerouteSummary {
            total_hops: self.hops.len() as u32,
            max_hop_latency_ms,
        }
    }
}

/// Run the host traceroute binary against a target IP.
///
/// A missing binary or a non-zero exit is reported as an error; the route
/// simply contributes nothing this cycle.
pub async fn run_traceroute(target_ip: &str) -> anyhow::Result<TracerouteResult> {
    let output = Command::new("traceroute")
        .args(["-n", "-w", "3", "-q", "1", target_ip])
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("traceroute invocation failed: {e}"))?;

    if !output.status.success() {
        anyhow::bail!(
            "traceroute exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(parse_traceroute_output(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

/// Parse raw traceroute output into hops.
///
/// Lines that do not start with a hop number (the banner line, noise) are
/// ignored. A numbered line whose address column is `*` is a timeout hop.
#[must_use]
pub fn parse_traceroute_output(output: &str) -> TracerouteResult {
    let mut hops = Vec::new();

    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        let Ok(hop_number) = first.parse::<u32>() else {
            continue;
        };
        let Some(address) = tokens.next() else {
            continue;
        };

        if address == "*" {
            hops.push(TracerouteHop {
                hop_number,
                ip: "*".to_string(),
                latency_ms: None,
            });
            continue;
        }

        // Latency is the first numeric token followed by "ms".
        let mut latency_ms = None;
        let mut previous: Option<f64> = None;
        for token in tokens {
            if token == "ms" {
                if let Some(value) = previous {
                    latency_ms = Some(value);
                    break;
                }
            }
            previous = token.parse::<f64>().ok();
        }

        hops.push(TracerouteHop {
            hop_number,
            ip: address.to_string(),
            latency_ms,
        });
    }

    TracerouteResult { hops }
}

impl crate::agent::MemberAgent {
    /// Traceroute loop body: map the route to every peer's advertised IP.
    pub async fn run_traceroutes(&self) -> anyhow::Result<()> {
        let peers = self.peers().await;
        if peers.is_empty() {
            tracing::debug!("no peers known yet, skipping traceroutes");
            return Ok(());
        }

        for peer in &peers {
            let result = match run_traceroute(&peer.ip).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(
                        peer = %peer.instance_id,
                        target_ip = %peer.ip,
                        error = %e,
                        "traceroute failed"
                    );
                    continue;
                }
            };
            let summary = result.summary();

            crate::metrics::TRACEROUTE_HOPS_TOTAL
                .with_label_values(&[
                    self.location(),
                    self.instance_id(),
                    &peer.location,
                    &peer.instance_id,
                    &peer.ip,
                ])
                .set(i64::from(summary.total_hops));
            crate::metrics::TRACEROUTE_MAX_HOP_LATENCY_MS
                .with_label_values(&[
                    self.location(),
                    self.instance_id(),
                    &peer.location,
                    &peer.instance_id,
                    &peer.ip,
                ])
                .set(summary.max_hop_latency_ms);

            let key = Self::target_key(peer);
            let mut state = self.probe_state().lock();
            state.traceroute_tests.insert(key.clone(), summary);
            state.detailed_traceroute_data.insert(
                key,
                netring_core::protocol::TracerouteDetail {
                    target_location: peer.location.clone(),
                    target_instance: peer.instance_id.clone(),
                    target_ip: peer.ip.clone(),
                    hops: result.hops,
                },
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_output() {
        let output = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets\n 1  192.168.1.1  1.234 ms\n 2  10.0.0.1  5.678 ms\n 3  8.8.8.8  12.345 ms\n";
        let result = parse_traceroute_output(output);
        let summary = result.summary();
        assert_eq!(summary.total_hops, 3);
        assert!((summary.max_hop_latency_ms - 12.345).abs() < 0.001);
        assert_eq!(result.hops[0].ip, "192.168.1.1");
        assert_eq!(result.hops[0].latency_ms, Some(1.234));
    }

    #[test]
    fn parses_single_hop() {
        let output = "traceroute to 127.0.0.1 (127.0.0.1), 30 hops max, 60 byte packets\n 1  127.0.0.1  0.123 ms\n";
        let summary = parse_traceroute_output(output).summary();
        assert_eq!(summary.total_hops, 1);
        assert!((summary.max_hop_latency_ms - 0.123).abs() < 0.001);
    }

    #[test]
    fn timeout_hops_count_but_carry_no_latency() {
        let output = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets\n 1  192.168.1.1  1.234 ms\n 2  * * *\n 3  8.8.8.8  12.345 ms\n";
        let result = parse_traceroute_output(output);
        let summary = result.summary();
        assert_eq!(summary.total_hops, 3);
        assert!((summary.max_hop_latency_ms - 12.345).abs() < 0.001);
        assert_eq!(result.hops[1].ip, "*");
        assert_eq!(result.hops[1].latency_ms, None);
    }

    #[test]
    fn banner_only_yields_empty() {
        let output = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets";
        let summary = parse_traceroute_output(output).summary();
        assert_eq!(summary.total_hops, 0);
        assert_eq!(summary.max_hop_latency_ms, 0.0);
    }

    #[test]
    fn malformed_input_yields_empty() {
        let summary = parse_traceroute_output("completely invalid output").summary();
        assert_eq!(summary.total_hops, 0);
        assert_eq!(summary.max_hop_latency_ms, 0.0);
    }

    #[test]
    fn empty_input_yields_empty() {
        let summary = parse_traceroute_output("").summary();
        assert_eq!(summary.total_hops, 0);
        assert_eq!(summary.max_hop_latency_ms, 0.0);
    }
}
