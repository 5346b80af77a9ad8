//! Wire protocol types
//!
//! JSON bodies exchanged between members, the registry, and dashboard
//! clients. Field names here are a fixed external contract.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time as whole epoch seconds.
#[must_use]
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// `POST /register` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub location: String,
    pub ip: String,
    pub port: u16,
}

/// `POST /register` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub instance_id: String,
    pub status: String,
}

/// `POST /heartbeat` and `POST /deregister` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub instance_id: String,
}

/// Generic `{status}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Generic `{error}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Membership status of a listed member.
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_DEREGISTERED: &str = "deregistered";

/// One entry of the `GET /members` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberEntry {
    pub instance_id: String,
    pub location: String,
    pub ip: String,
    pub port: u16,
    pub last_seen: i64,
    pub registered_at: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregistered_at: Option<i64>,
}

impl MemberEntry {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// `GET /members` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersResponse {
    pub members: Vec<MemberEntry>,
}

/// One hop of a parsed traceroute. `latency_ms` is `None` for timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteHop {
    pub hop_number: u32,
    pub ip: String,
    pub latency_ms: Option<f64>,
}

/// Aggregate view of one traceroute run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteSummary {
    pub total_hops: u32,
    pub max_hop_latency_ms: f64,
}

/// Full hop data for one target, keyed in reports by
/// `<target_location>:<target_instance>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerouteDetail {
    pub target_location: String,
    pub target_instance: String,
    pub target_ip: String,
    pub hops: Vec<TracerouteHop>,
}

/// The structured metric snapshot a member posts to `/report_metrics`.
///
/// Keys inside each sub-map encode the target identity:
/// `<target_location>:<target_instance>`, with an `:<endpoint>` suffix for
/// HTTP checks and a `:<check_type>` suffix for durations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSnapshot {
    pub connectivity_tcp: HashMap<String, f64>,
    pub connectivity_http: HashMap<String, f64>,
    pub check_durations: HashMap<String, f64>,
    pub bandwidth_tests: HashMap<String, f64>,
    pub traceroute_tests: HashMap<String, TracerouteSummary>,
    pub detailed_traceroute_data: HashMap<String, TracerouteDetail>,
    pub general: HashMap<String, serde_json::Value>,
}

/// `POST /report_metrics` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    pub instance_id: String,
    pub metrics: MetricSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_entry_omits_absent_deregistered_at() {
        let entry = MemberEntry {
            instance_id: "abc".to_string(),
            location: "dc1".to_string(),
            ip: "10.0.0.1".to_string(),
            port: 8757,
            last_seen: 100,
            registered_at: 90,
            status: STATUS_ACTIVE.to_string(),
            deregistered_at: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("deregistered_at"));
        assert!(entry.is_active());
    }

    #[test]
    fn metric_snapshot_roundtrip_keeps_timeout_hops() {
        let mut snapshot = MetricSnapshot::default();
        snapshot.detailed_traceroute_data.insert(
            "dc2:inst-2".to_string(),
            TracerouteDetail {
                target_location: "dc2".to_string(),
                target_instance: "inst-2".to_string(),
                target_ip: "10.0.0.2".to_string(),
                hops: vec![
                    TracerouteHop {
                        hop_number: 1,
                        ip: "192.168.1.1".to_string(),
                        latency_ms: Some(1.2),
                    },
                    TracerouteHop {
                        hop_number: 2,
                        ip: "*".to_string(),
                        latency_ms: None,
                    },
                ],
            },
        );

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: MetricSnapshot = serde_json::from_str(&json).unwrap();
        let detail = &back.detailed_traceroute_data["dc2:inst-2"];
        assert_eq!(detail.hops.len(), 2);
        assert_eq!(detail.hops[1].latency_ms, None);
    }

    #[test]
    fn register_request_omits_absent_instance_id() {
        let request = RegisterRequest {
            instance_id: None,
            location: "dc1".to_string(),
            ip: "10.0.0.1".to_string(),
            port: 8757,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("instance_id"));
    }
}
