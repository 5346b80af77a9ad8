//! Member agent integration tests
//!
//! A wiremock server stands in for the registry; the member HTTP surface
//! is exercised through the axum router directly.
//!
//! Run with: cargo test --test member_tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use netring_core::config::MemberConfig;
use netring_member::supervisor::Supervisor;
use netring_member::{http, MemberAgent};

fn member_config(registry_url: &str) -> MemberConfig {
    let mut config = MemberConfig::default();
    config.location = "dc1".to_string();
    config.registry.url = registry_url.to_string();
    config.server.advertise_ip = "10.0.0.1".to_string();
    config
}

async fn mock_registry_accepting_registration(instance_id: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instance_id": instance_id,
            "status": "registered"
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn init_adopts_server_assigned_instance_id() {
    let server = mock_registry_accepting_registration("assigned-id").await;
    let agent = MemberAgent::init(member_config(&server.uri())).await.unwrap();

    assert_eq!(agent.instance_id(), "assigned-id");
    assert_eq!(agent.location(), "dc1");
    assert_eq!(agent.advertise_ip(), "10.0.0.1");
}

#[tokio::test]
async fn init_fails_when_registry_rejects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(MemberAgent::init(member_config(&server.uri())).await.is_err());
}

#[tokio::test]
async fn init_fails_when_registry_is_unreachable() {
    // Nothing listens on this port.
    let config = member_config("http://127.0.0.1:1");
    assert!(MemberAgent::init(config).await.is_err());
}

#[tokio::test]
async fn discovery_excludes_self_and_inactive_members() {
    let server = mock_registry_accepting_registration("self-id").await;
    Mock::given(method("GET"))
        .and(path("/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "members": [
                {"instance_id": "self-id", "location": "dc1", "ip": "10.0.0.1",
                 "port": 8757, "last_seen": 100, "registered_at": 90, "status": "active"},
                {"instance_id": "peer-1", "location": "dc2", "ip": "10.0.0.2",
                 "port": 8757, "last_seen": 100, "registered_at": 90, "status": "active"},
                {"instance_id": "gone-1", "location": "dc3", "ip": "10.0.0.3",
                 "port": 8757, "last_seen": 50, "registered_at": 40,
                 "status": "deregistered", "deregistered_at": 60}
            ]
        })))
        .mount(&server)
        .await;

    let agent = MemberAgent::init(member_config(&server.uri())).await.unwrap();
    agent.run_discovery().await.unwrap();

    let peers = agent.peers().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].instance_id, "peer-1");
    assert_eq!(agent.members_count().await, 1);
}

#[tokio::test]
async fn heartbeat_posts_instance_id() {
    let server = mock_registry_accepting_registration("self-id").await;
    Mock::given(method("POST"))
        .and(path("/heartbeat"))
        .and(body_partial_json(json!({"instance_id": "self-id"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let agent = MemberAgent::init(member_config(&server.uri())).await.unwrap();
    agent.run_heartbeat().await.unwrap();
}

#[tokio::test]
async fn heartbeat_survives_registry_outage() {
    let server = mock_registry_accepting_registration("self-id").await;
    let agent = MemberAgent::init(member_config(&server.uri())).await.unwrap();
    drop(server);

    // Transient unreachability is logged, not escalated: the loop must
    // proceed to its next interval instead of entering the restart path.
    assert!(agent.run_heartbeat().await.is_ok());
    assert!(agent.run_discovery().await.is_ok());
}

#[tokio::test]
async fn report_ships_probe_state_and_general_block() {
    let server = mock_registry_accepting_registration("self-id").await;
    Mock::given(method("POST"))
        .and(path("/report_metrics"))
        .and(body_partial_json(json!({"instance_id": "self-id"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let agent = MemberAgent::init(member_config(&server.uri())).await.unwrap();
    let report = agent.build_report().await;
    assert_eq!(report.instance_id, "self-id");
    assert_eq!(report.metrics.general["location"], "dc1");
    assert_eq!(report.metrics.general["members_count"], 0);
    assert!(report.metrics.general["timestamp"].is_i64());

    agent.run_report().await.unwrap();
}

#[tokio::test]
async fn deregister_posts_to_registry() {
    let server = mock_registry_accepting_registration("self-id").await;
    Mock::given(method("POST"))
        .and(path("/deregister"))
        .and(body_partial_json(json!({"instance_id": "self-id"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "deregistered"})))
        .expect(1)
        .mount(&server)
        .await;

    let agent = MemberAgent::init(member_config(&server.uri())).await.unwrap();
    agent.deregister().await.unwrap();
}

#[tokio::test]
async fn connectivity_checks_record_peer_outcomes() {
    // A live TCP listener plays the peer; its port is rewired into the
    // discovery response so the probe has something real to hit.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let server = mock_registry_accepting_registration("self-id").await;
    Mock::given(method("GET"))
        .and(path("/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "members": [
                {"instance_id": "peer-1", "location": "dc2", "ip": "127.0.0.1",
                 "port": peer_port, "last_seen": 100, "registered_at": 90, "status": "active"}
            ]
        })))
        .mount(&server)
        .await;

    let mut config = member_config(&server.uri());
    config.checks.http_endpoints = vec![];
    config.checks.tcp_timeout = 1;
    let agent = MemberAgent::init(config).await.unwrap();
    agent.run_discovery().await.unwrap();
    agent.run_connectivity_checks().await.unwrap();

    let report = agent.build_report().await;
    assert_eq!(report.metrics.connectivity_tcp["dc2:peer-1"], 1.0);
    assert!(report.metrics.check_durations.contains_key("dc2:peer-1:tcp"));
}

async fn member_router() -> axum::Router {
    let server = mock_registry_accepting_registration("self-id").await;
    let agent = MemberAgent::init(member_config(&server.uri())).await.unwrap();
    let supervisor = Arc::new(Supervisor::new(
        Duration::from_secs(300),
        Duration::from_secs(60),
    ));
    http::create_router(agent, supervisor)
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn bandwidth_test_returns_exact_payload() {
    let router = member_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .uri("/bandwidth_test?size=3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/octet-stream"
    );
    let content_length: usize = response.headers()["content-length"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = body_bytes(response).await;
    assert_eq!(body.len(), 3 * 1_048_576);
    assert_eq!(content_length, body.len());
    assert!(body.iter().all(|&byte| byte == body[0]));
}

#[tokio::test]
async fn bandwidth_test_clamps_to_ten_megabytes() {
    let router = member_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .uri("/bandwidth_test?size=20")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_bytes(response).await;
    assert_eq!(body.len(), 10 * 1_048_576);
}

#[tokio::test]
async fn bandwidth_test_rejects_malformed_size() {
    let router = member_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .uri("/bandwidth_test?size=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn health_reports_task_and_fault_tolerance_detail() {
    let server = mock_registry_accepting_registration("self-id").await;
    let agent = MemberAgent::init(member_config(&server.uri())).await.unwrap();
    let supervisor = Arc::new(Supervisor::new(
        Duration::from_secs(300),
        Duration::from_secs(60),
    ));
    let heartbeat_agent = agent.clone();
    supervisor
        .register(
            "heartbeat",
            Duration::from_secs(45),
            Duration::ZERO,
            Arc::new(move || {
                let agent = heartbeat_agent.clone();
                Box::pin(async move { agent.run_heartbeat().await })
            }),
        )
        .await;

    let router = http::create_router(agent, supervisor.clone());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["component"], "member");
    assert_eq!(body["instance_id"], "self-id");
    assert_eq!(body["location"], "dc1");
    assert_eq!(body["members_count"], 0);
    assert_eq!(body["fault_tolerance"]["task_timeout_seconds"], 300);
    assert_eq!(body["fault_tolerance"]["health_monitor_interval_seconds"], 60);
    let heartbeat_task = &body["task_health"]["heartbeat"];
    assert_eq!(heartbeat_task["status"], "healthy");
    assert!(heartbeat_task["seconds_since_heartbeat"].is_number());
    assert!(heartbeat_task["last_heartbeat"].is_i64());
    assert!(body["unhealthy_tasks"].as_array().unwrap().is_empty());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn prometheus_endpoint_serves_text_format() {
    let router = member_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}
