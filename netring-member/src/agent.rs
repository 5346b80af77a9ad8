//! Member agent state and registry-facing operations
//!
//! Registration happens once at startup; a failure there is fatal so the
//! host process exits non-zero. Every later registry interaction is a
//! periodic loop body that survives transient failures by logging and
//! waiting for its next interval. One probe per interval, never more.

use std::collections::HashMap;
use std::sync::Arc;

use netring_core::config::MemberConfig;
use netring_core::net::resolve_advertise_ip;
use netring_core::protocol::{
    now_epoch, InstanceRequest, MemberEntry, MembersResponse, MetricReport, MetricSnapshot,
    RegisterRequest, RegisterResponse, TracerouteDetail, TracerouteSummary,
};
use tokio::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics;

/// Client timeout for metric report posts.
const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Latest probe outcomes, accumulated by the check loops and drained into
/// metric reports. Keys encode target identity as
/// `<target_location>:<target_instance>` plus per-map suffixes.
#[derive(Debug, Default)]
pub struct ProbeState {
    pub connectivity_tcp: HashMap<String, f64>,
    pub connectivity_http: HashMap<String, f64>,
    pub check_durations: HashMap<String, f64>,
    pub bandwidth_tests: HashMap<String, f64>,
    pub traceroute_tests: HashMap<String, TracerouteSummary>,
    pub detailed_traceroute_data: HashMap<String, TracerouteDetail>,
}

/// One ring member process.
pub struct MemberAgent {
    config: MemberConfig,
    instance_id: String,
    advertise_ip: String,
    client: reqwest::Client,
    peers: tokio::sync::RwLock<HashMap<String, MemberEntry>>,
    probe_state: parking_lot::Mutex<ProbeState>,
}

impl MemberAgent {
    /// Build the agent and register with the registry. The registry may
    /// assign a fresh instance id; whatever it returns is authoritative.
    pub async fn init(config: MemberConfig) -> anyhow::Result<Arc<Self>> {
        let advertise_ip = resolve_advertise_ip(&config.server.advertise_ip);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.checks.http_timeout))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

        let requested_id = config
            .instance_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let request = RegisterRequest {
            instance_id: Some(requested_id),
            location: config.location.clone(),
            ip: advertise_ip.clone(),
            port: config.server.port,
        };
        let response = client
            .post(endpoint(&config.registry.url, "/register"))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("registration request failed: {e}"))?;
        if !response.status().is_success() {
            anyhow::bail!("registration rejected: HTTP {}", response.status());
        }
        let registered: RegisterResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("malformed registration response: {e}"))?;

        info!(
            instance_id = %registered.instance_id,
            location = %config.location,
            ip = %advertise_ip,
            "registered with registry"
        );

        Ok(Arc::new(Self {
            config,
            instance_id: registered.instance_id,
            advertise_ip,
            client,
            peers: tokio::sync::RwLock::new(HashMap::new()),
            probe_state: parking_lot::Mutex::new(ProbeState::default()),
        }))
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.config.location
    }

    #[must_use]
    pub fn advertise_ip(&self) -> &str {
        &self.advertise_ip
    }

    #[must_use]
    pub fn config(&self) -> &MemberConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn probe_state(&self) -> &parking_lot::Mutex<ProbeState> {
        &self.probe_state
    }

    /// Current peer map snapshot.
    pub async fn peers(&self) -> Vec<MemberEntry> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn members_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Heartbeat loop body: refresh our registration TTL.
    pub async fn run_heartbeat(&self) -> anyhow::Result<()> {
        let request = InstanceRequest {
            instance_id: self.instance_id.clone(),
        };
        match self
            .client
            .post(endpoint(&self.config.registry.url, "/heartbeat"))
            .json(&request)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("heartbeat acknowledged");
            }
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                warn!("registry no longer knows this member; record will return on next registry restart or re-register");
            }
            Ok(response) => {
                warn!(status = %response.status(), "heartbeat rejected");
            }
            Err(e) => {
                warn!(error = %e, "heartbeat to registry failed");
            }
        }
        Ok(())
    }

    /// Discovery loop body: rebuild the peer map from the registry view.
    pub async fn run_discovery(&self) -> anyhow::Result<()> {
        let response = match self
            .client
            .get(endpoint(&self.config.registry.url, "/members"))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "member poll rejected");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "member poll failed");
                return Ok(());
            }
        };

        let listing: MembersResponse = match response.json().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "malformed members response");
                return Ok(());
            }
        };

        let mut discovered = HashMap::new();
        for member in listing.members {
            if member.instance_id == self.instance_id || !member.is_active() {
                continue;
            }
            metrics::MEMBER_LAST_SEEN
                .with_label_values(&[&member.location, &member.instance_id])
                .set(member.last_seen as f64);
            discovered.insert(member.instance_id.clone(), member);
        }

        metrics::MEMBERS_TOTAL.set(discovered.len() as i64);
        debug!(peers = discovered.len(), "discovered ring members");
        *self.peers.write().await = discovered;
        Ok(())
    }

    /// Metric-report loop body: ship the current probe state upstream.
    pub async fn run_report(&self) -> anyhow::Result<()> {
        let report = self.build_report().await;
        match self
            .client
            .post(endpoint(&self.config.registry.url, "/report_metrics"))
            .timeout(REPORT_TIMEOUT)
            .json(&report)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("metric report accepted");
            }
            Ok(response) => {
                warn!(status = %response.status(), "metric report rejected");
            }
            Err(e) => {
                warn!(error = %e, "metric report failed");
            }
        }
        Ok(())
    }

    /// Assemble the structured report from the latest probe outcomes.
    pub async fn build_report(&self) -> MetricReport {
        let members_count = self.members_count().await;
        let mut snapshot = {
            let state = self.probe_state.lock();
            MetricSnapshot {
                connectivity_tcp: state.connectivity_tcp.clone(),
                connectivity_http: state.connectivity_http.clone(),
                check_durations: state.check_durations.clone(),
                bandwidth_tests: state.bandwidth_tests.clone(),
                traceroute_tests: state.traceroute_tests.clone(),
                detailed_traceroute_data: state.detailed_traceroute_data.clone(),
                general: HashMap::new(),
            }
        };
        snapshot
            .general
            .insert("location".to_string(), self.config.location.clone().into());
        snapshot
            .general
            .insert("instance_id".to_string(), self.instance_id.clone().into());
        snapshot
            .general
            .insert("members_count".to_string(), members_count.into());
        snapshot
            .general
            .insert("timestamp".to_string(), now_epoch().into());

        MetricReport {
            instance_id: self.instance_id.clone(),
            metrics: snapshot,
        }
    }

    /// Graceful exit: tell the registry we are leaving before loops stop,
    /// so the final POST goes out over the live session.
    pub async fn deregister(&self) -> anyhow::Result<()> {
        let request = InstanceRequest {
            instance_id: self.instance_id.clone(),
        };
        let response = self
            .client
            .post(endpoint(&self.config.registry.url, "/deregister"))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("deregister request failed: {e}"))?;
        if !response.status().is_success() {
            anyhow::bail!("deregister rejected: HTTP {}", response.status());
        }
        info!(instance_id = %self.instance_id, "deregistered from registry");
        Ok(())
    }

    /// Target identity key used in report sub-maps.
    pub(crate) fn target_key(member: &MemberEntry) -> String {
        format!("{}:{}", member.location, member.instance_id)
    }
}

pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_handles_trailing_slash() {
        assert_eq!(
            endpoint("http://registry:8756", "/register"),
            "http://registry:8756/register"
        );
        assert_eq!(
            endpoint("http://registry:8756/", "/register"),
            "http://registry:8756/register"
        );
    }
}
