//! Registry integration tests
//!
//! Exercise the HTTP surface end-to-end against the in-memory store.
//!
//! Run with: cargo test --test registry_tests

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use netring_core::protocol::now_epoch;
use netring_core::{MemoryStore, Store};
use netring_registry::expected::{
    AlertThresholds, Criticality, ExpectedLocation, ExpectedTopology,
};
use netring_registry::{cleanup, handlers, keys, AppState};

struct TestRegistry {
    state: AppState,
    store: Arc<MemoryStore>,
}

fn test_registry() -> TestRegistry {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_store(store.clone() as Arc<dyn Store>, 300);
    TestRegistry { state, store }
}

fn expected_dc1_high() -> ExpectedTopology {
    let mut locations = BTreeMap::new();
    locations.insert(
        "dc1".to_string(),
        ExpectedLocation {
            expected_count: 3,
            criticality: Criticality::High,
            grace_period_s: 0,
            description: "primary".to_string(),
        },
    );
    ExpectedTopology {
        locations,
        alert_thresholds: AlertThresholds::default(),
    }
}

async fn request(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let router = handlers::create_router(state.clone());
    let request = match body {
        Some(value) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&value).unwrap()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register_member(state: &AppState, location: &str, ip: &str) -> String {
    let (status, body) = request(
        state,
        "POST",
        "/register",
        Some(json!({"location": location, "ip": ip, "port": 8757})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "registered");
    body["instance_id"].as_str().unwrap().to_string()
}

fn sample_report(instance_id: &str) -> Value {
    json!({
        "instance_id": instance_id,
        "metrics": {
            "connectivity_tcp": {"dc2:peer-1": 1.0},
            "connectivity_http": {"dc2:peer-1:/health": 1.0},
            "check_durations": {"dc2:peer-1:tcp": 0.01},
            "bandwidth_tests": {"dc2:peer-1": 94.2},
            "traceroute_tests": {"dc2:peer-1": {"total_hops": 3, "max_hop_latency_ms": 10.0}},
            "detailed_traceroute_data": {
                "dc2:peer-1": {
                    "target_location": "dc2",
                    "target_instance": "peer-1",
                    "target_ip": "10.0.0.2",
                    "hops": [
                        {"hop_number": 1, "ip": "10.0.0.1", "latency_ms": 1.0},
                        {"hop_number": 2, "ip": "10.0.1.1", "latency_ms": 5.0},
                        {"hop_number": 3, "ip": "10.0.0.2", "latency_ms": 10.0}
                    ]
                }
            },
            "general": {}
        }
    })
}

#[tokio::test]
async fn register_assigns_uuid_when_absent() {
    let registry = test_registry();
    let (status, body) = request(
        &registry.state,
        "POST",
        "/register",
        Some(json!({"location": "dc1", "ip": "10.0.0.1", "port": 8757})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instance_id"].as_str().unwrap().len(), 36);
}

#[tokio::test]
async fn register_keeps_caller_supplied_id() {
    let registry = test_registry();
    let (status, body) = request(
        &registry.state,
        "POST",
        "/register",
        Some(json!({
            "instance_id": "test-member-1",
            "location": "us1-k8s",
            "ip": "10.1.1.1",
            "port": 8757
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instance_id"], "test-member-1");
}

#[tokio::test]
async fn register_rejects_missing_fields() {
    let registry = test_registry();
    let (status, body) = request(
        &registry.state,
        "POST",
        "/register",
        Some(json!({"location": "us1-k8s"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn registered_member_is_listed_active() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;

    let (status, body) = request(&registry.state, "GET", "/members", None).await;
    assert_eq!(status, StatusCode::OK);
    let members = body["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["instance_id"], instance_id.as_str());
    assert_eq!(members[0]["status"], "active");
    assert_eq!(members[0]["port"], 8757);
}

#[tokio::test]
async fn heartbeat_is_idempotent() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;

    for _ in 0..5 {
        let (status, body) = request(
            &registry.state,
            "POST",
            "/heartbeat",
            Some(json!({"instance_id": instance_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    let (_, body) = request(&registry.state, "GET", "/members", None).await;
    let members = body["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    let last_seen = members[0]["last_seen"].as_i64().unwrap();
    assert!((now_epoch() - last_seen).abs() <= 2);
}

#[tokio::test]
async fn heartbeat_unknown_member_is_404() {
    let registry = test_registry();
    let (status, body) = request(
        &registry.state,
        "POST",
        "/heartbeat",
        Some(json!({"instance_id": "unknown-member"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn deregister_moves_member_to_departed_view() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;

    let (status, body) = request(
        &registry.state,
        "POST",
        "/deregister",
        Some(json!({"instance_id": instance_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "deregistered");

    let (_, body) = request(&registry.state, "GET", "/members", None).await;
    let members = body["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["status"], "deregistered");
    assert!(members[0]["deregistered_at"].is_i64());

    // A departed member no longer accepts heartbeats.
    let (status, _) = request(
        &registry.state,
        "POST",
        "/heartbeat",
        Some(json!({"instance_id": members[0]["instance_id"]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deregistered_entry_disappears_after_expiry() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;
    request(
        &registry.state,
        "POST",
        "/deregister",
        Some(json!({"instance_id": instance_id})),
    )
    .await;

    // Simulate engine-side key expiry an hour later.
    registry
        .store
        .expire_key_now(&keys::deregistered_key(&instance_id));
    registry.store.expire_key_now(keys::DEREGISTERED_SET);

    let (_, body) = request(&registry.state, "GET", "/members", None).await;
    assert!(body["members"].as_array().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn member_expires_without_heartbeats() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;

    tokio::time::advance(std::time::Duration::from_secs(299)).await;
    let (_, body) = request(&registry.state, "GET", "/members", None).await;
    assert_eq!(body["members"].as_array().unwrap().len(), 1);

    // A heartbeat refreshes the TTL and keeps the member visible past the
    // original deadline.
    request(
        &registry.state,
        "POST",
        "/heartbeat",
        Some(json!({"instance_id": instance_id})),
    )
    .await;
    tokio::time::advance(std::time::Duration::from_secs(299)).await;
    let (_, body) = request(&registry.state, "GET", "/members", None).await;
    assert_eq!(body["members"].as_array().unwrap().len(), 1);

    // Silence past the TTL removes the record; the listing reconciles the
    // dangling set entry away.
    tokio::time::advance(std::time::Duration::from_secs(302)).await;
    let (_, body) = request(&registry.state, "GET", "/members", None).await;
    assert!(body["members"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn cleanup_removes_members_with_stale_last_seen() {
    let registry = test_registry();
    // Write a record whose last_seen predates the TTL window, bypassing
    // the register handler so no engine TTL interferes.
    let stale_epoch = (now_epoch() - 400).to_string();
    registry
        .store
        .hset(
            &keys::member_key("stale-member"),
            &[
                ("instance_id".to_string(), "stale-member".to_string()),
                ("location".to_string(), "dc1".to_string()),
                ("ip".to_string(), "10.0.0.1".to_string()),
                ("port".to_string(), "8757".to_string()),
                ("last_seen".to_string(), stale_epoch.clone()),
                ("registered_at".to_string(), stale_epoch),
            ],
        )
        .await
        .unwrap();
    registry
        .store
        .sadd(keys::ACTIVE_SET, "stale-member")
        .await
        .unwrap();

    cleanup::run_cleanup_once(&registry.state.membership).await;

    let (_, body) = request(&registry.state, "GET", "/members", None).await;
    assert!(body["members"].as_array().unwrap().is_empty());
    assert!(registry
        .store
        .smembers(keys::ACTIVE_SET)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn cleanup_drops_dangling_set_entries() {
    let registry = test_registry();
    registry
        .store
        .sadd(keys::ACTIVE_SET, "ghost")
        .await
        .unwrap();

    cleanup::run_cleanup_once(&registry.state.membership).await;

    assert!(registry
        .store
        .smembers(keys::ACTIVE_SET)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn report_metrics_unknown_member_is_404() {
    let registry = test_registry();
    let (status, _) = request(
        &registry.state,
        "POST",
        "/report_metrics",
        Some(sample_report("unknown")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn report_metrics_stores_snapshot_and_builds_topology() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;

    let (status, body) = request(
        &registry.state,
        "POST",
        "/report_metrics",
        Some(sample_report(&instance_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    // Snapshot is readable back as JSON.
    let (status, body) = request(&registry.state, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot = &body["metrics"][instance_id.as_str()];
    assert_eq!(snapshot["connectivity_tcp"]["dc2:peer-1"], 1.0);

    // The detailed hops became a dc1->dc2 chain: 2 locations, 3 routers.
    let (status, body) = request(&registry.state, "GET", "/topology", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total_locations"], 2);
    assert_eq!(body["summary"]["total_routers"], 3);
    assert_eq!(body["summary"]["routes_analyzed"], 1);

    let (status, body) = request(
        &registry.state,
        "GET",
        "/topology/path?source=dc1&target=dc2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_hops"], 3);
    assert_eq!(body["bandwidth_mbps"], 94.2);
    assert_eq!(body["path_nodes"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn reingested_report_replaces_route() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;
    request(
        &registry.state,
        "POST",
        "/report_metrics",
        Some(sample_report(&instance_id)),
    )
    .await;

    // Second report with a shorter path; the 10.0.1.1 router must vanish.
    let mut shorter = sample_report(&instance_id);
    shorter["metrics"]["detailed_traceroute_data"]["dc2:peer-1"]["hops"] = json!([
        {"hop_number": 1, "ip": "10.0.0.1", "latency_ms": 1.0},
        {"hop_number": 2, "ip": "10.0.0.2", "latency_ms": 8.0}
    ]);
    request(&registry.state, "POST", "/report_metrics", Some(shorter)).await;

    let (_, body) = request(&registry.state, "GET", "/topology", None).await;
    assert_eq!(body["summary"]["total_routers"], 2);
    let node_ids: Vec<&str> = body["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["id"].as_str().unwrap())
        .collect();
    assert!(!node_ids.contains(&"router:10.0.1.1"));
}

#[tokio::test]
async fn traceroute_summary_without_detail_creates_direct_edge() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;

    let report = json!({
        "instance_id": instance_id,
        "metrics": {
            "traceroute_tests": {"dc3:peer-9": {"total_hops": 0, "max_hop_latency_ms": 0.0}},
            "bandwidth_tests": {"dc3:peer-9": 10.0}
        }
    });
    request(&registry.state, "POST", "/report_metrics", Some(report)).await;

    let (_, body) = request(&registry.state, "GET", "/topology", None).await;
    assert_eq!(body["summary"]["total_locations"], 2);
    assert_eq!(body["summary"]["total_routers"], 0);
    assert_eq!(body["edges"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_path_pair_is_404_error_object() {
    let registry = test_registry();
    let (status, body) = request(
        &registry.state,
        "GET",
        "/topology/path?source=dc1&target=dc9",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("dc1->dc9"));
}

#[tokio::test]
async fn missing_member_analysis_alerts_on_critical_gap() {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_store(store as Arc<dyn Store>, 300)
        .with_expected(expected_dc1_high());
    register_member(&state, "dc1", "10.0.0.1").await;

    let (status, body) = request(&state, "GET", "/members_with_analysis", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["members"].as_array().unwrap().len(), 1);

    let analysis = &body["missing_analysis"];
    assert_eq!(analysis["enabled"], true);
    assert_eq!(analysis["locations"]["dc1"]["missing_count"], 2);
    assert_eq!(analysis["locations"]["dc1"]["status"], "missing_members");

    let alerts = analysis["alerts"].as_array().unwrap();
    assert!(alerts.iter().any(|alert| {
        alert["level"] == "error" && alert["message"].as_str().unwrap().contains("dc1")
    }));
    assert!(body["timestamp"].is_i64());
}

#[tokio::test]
async fn analysis_is_disabled_without_descriptor() {
    let registry = test_registry();
    let (_, body) = request(&registry.state, "GET", "/members_with_analysis", None).await;
    assert_eq!(body["missing_analysis"]["enabled"], false);
}

#[tokio::test]
async fn clear_store_wipes_members_and_topology() {
    let registry = test_registry();
    let instance_id = register_member(&registry.state, "dc1", "10.0.0.1").await;
    request(
        &registry.state,
        "POST",
        "/report_metrics",
        Some(sample_report(&instance_id)),
    )
    .await;

    let (status, body) = request(&registry.state, "POST", "/clear_redis", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cleared");
    assert!(body["keys_deleted"].as_u64().unwrap() >= 2);

    let (_, body) = request(&registry.state, "GET", "/members", None).await;
    assert!(body["members"].as_array().unwrap().is_empty());
    let (_, body) = request(&registry.state, "GET", "/topology", None).await;
    assert_eq!(body["summary"]["routes_analyzed"], 0);
}

#[tokio::test]
async fn health_reports_healthy_store() {
    let registry = test_registry();
    let (status, body) = request(&registry.state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["component"], "registry");
    assert!(body["timestamp"].is_i64());
}

#[tokio::test]
async fn topology_svg_is_served_as_svg() {
    let registry = test_registry();
    let router = handlers::create_router(registry.state.clone());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/topology/svg?width=800&height=400")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/svg+xml"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let document = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(document.contains("<svg"));
}
