//! Registry HTTP endpoints
//!
//! Contract violations answer 4xx with an `{error}` body and mutate
//! nothing; store failures surface as 5xx; reads degrade gracefully.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use netring_core::error::Error;
use netring_core::Store;
use netring_core::protocol::{
    now_epoch, ErrorResponse, InstanceRequest, MemberEntry, MembersResponse, MetricReport,
    MetricSnapshot, RegisterRequest, RegisterResponse, StatusResponse,
};

use crate::expected::MissingAnalysis;
use crate::keys;
use crate::state::AppState;
use crate::topology::{svg, TopologyGraph};

/// Registry HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/deregister", post(deregister))
        .route("/members", get(members))
        .route("/members_with_analysis", get(members_with_analysis))
        .route("/report_metrics", post(report_metrics))
        .route("/metrics", get(member_metrics))
        .route("/health", get(health_check))
        .route("/clear_redis", post(clear_store))
        .route("/topology", get(topology))
        .route("/topology/svg", get(topology_svg))
        .route("/topology/path", get(topology_path))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message }),
    )
        .into_response()
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse { error: message }),
    )
        .into_response()
}

fn store_failure(err: &Error) -> Response {
    error!(error = %err, "store operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

async fn register(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    let request: RegisterRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("invalid register request: {e}")),
    };
    match state.membership.register(&request).await {
        Ok(instance_id) => Json(RegisterResponse {
            instance_id,
            status: "registered".to_string(),
        })
        .into_response(),
        Err(Error::Invalid(message)) => bad_request(message),
        Err(e) => store_failure(&e),
    }
}

async fn heartbeat(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    let request: InstanceRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("invalid heartbeat request: {e}")),
    };
    match state.membership.heartbeat(&request.instance_id).await {
        Ok(true) => Json(StatusResponse {
            status: "ok".to_string(),
        })
        .into_response(),
        Ok(false) => not_found("member not found".to_string()),
        Err(e) => store_failure(&e),
    }
}

async fn deregister(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let request: InstanceRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("invalid deregister request: {e}")),
    };
    match state.membership.deregister(&request.instance_id).await {
        Ok(true) => Json(StatusResponse {
            status: "deregistered".to_string(),
        })
        .into_response(),
        Ok(false) => not_found("member not found".to_string()),
        Err(e) => store_failure(&e),
    }
}

async fn members(State(state): State<AppState>) -> Response {
    match state.membership.members().await {
        Ok(members) => Json(MembersResponse { members }).into_response(),
        Err(e) => store_failure(&e),
    }
}

#[derive(Debug, Serialize)]
struct MembersWithAnalysisResponse {
    members: Vec<MemberEntry>,
    missing_analysis: MissingAnalysis,
    timestamp: i64,
}

async fn members_with_analysis(State(state): State<AppState>) -> Response {
    let members = match state.membership.members().await {
        Ok(members) => members,
        Err(e) => return store_failure(&e),
    };
    let missing_analysis = match &state.expected {
        Some(expected) => expected.analyze(&members),
        None => MissingAnalysis::disabled(),
    };
    Json(MembersWithAnalysisResponse {
        members,
        missing_analysis,
        timestamp: now_epoch(),
    })
    .into_response()
}

async fn report_metrics(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let report: MetricReport = match serde_json::from_value(body) {
        Ok(report) => report,
        Err(e) => return bad_request(format!("invalid metric report: {e}")),
    };

    let source_location = match state.membership.location_of(&report.instance_id).await {
        Ok(Some(location)) => location,
        Ok(None) => return not_found("member not found".to_string()),
        Err(e) => return store_failure(&e),
    };

    if let Err(e) = state.membership.store_report(&report).await {
        return store_failure(&e);
    }

    // Topology ingestion is synchronous on the request path; each route is
    // a self-contained replacement so ordering across reports is free.
    {
        let mut topology = state.topology.write();
        ingest_report(&mut topology, &source_location, &report.metrics);
    }

    Json(StatusResponse {
        status: "ok".to_string(),
    })
    .into_response()
}

/// Feed the detailed hop data into the topology engine, with the summary
/// entries as a hop-less fallback for targets that reported no detail.
pub fn ingest_report(topology: &mut TopologyGraph, source_location: &str, metrics: &MetricSnapshot) {
    for (key, detail) in &metrics.detailed_traceroute_data {
        let bandwidth = metrics.bandwidth_tests.get(key).copied();
        topology.add_traceroute(
            source_location,
            &detail.target_location,
            &detail.hops,
            bandwidth,
        );
    }
    for key in metrics.traceroute_tests.keys() {
        if metrics.detailed_traceroute_data.contains_key(key) {
            continue;
        }
        let Some((target_location, _)) = key.split_once(':') else {
            warn!(key = %key, "unparseable traceroute target key");
            continue;
        };
        let bandwidth = metrics.bandwidth_tests.get(key).copied();
        topology.add_traceroute(source_location, target_location, &[], bandwidth);
    }
}

#[derive(Debug, Serialize)]
struct MemberMetricsResponse {
    metrics: std::collections::HashMap<String, serde_json::Value>,
}

async fn member_metrics(State(state): State<AppState>) -> Response {
    match state.membership.metric_snapshots().await {
        Ok(metrics) => Json(MemberMetricsResponse { metrics }).into_response(),
        Err(e) => store_failure(&e),
    }
}

#[derive(Debug, Serialize)]
struct RegistryHealth {
    status: String,
    component: String,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health_check(State(state): State<AppState>) -> Response {
    match state.membership.store().ping().await {
        Ok(()) => Json(RegistryHealth {
            status: "healthy".to_string(),
            component: "registry".to_string(),
            timestamp: now_epoch(),
            error: None,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "store ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(RegistryHealth {
                    status: "unhealthy".to_string(),
                    component: "registry".to_string(),
                    timestamp: now_epoch(),
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    status: String,
    keys_deleted: u64,
}

/// Development tool: wipe every registry key and reset the topology.
async fn clear_store(State(state): State<AppState>) -> Response {
    match state.membership.store().flush_prefix(keys::PREFIX).await {
        Ok(keys_deleted) => {
            state.topology.write().clear();
            Json(ClearResponse {
                status: "cleared".to_string(),
                keys_deleted,
            })
            .into_response()
        }
        Err(e) => store_failure(&e),
    }
}

async fn topology(State(state): State<AppState>) -> Response {
    let data = state.topology.read().interactive_data();
    Json(data).into_response()
}

#[derive(Debug, Deserialize)]
struct SvgParams {
    width: Option<u32>,
    height: Option<u32>,
}

async fn topology_svg(State(state): State<AppState>, Query(params): Query<SvgParams>) -> Response {
    let width = params.width.unwrap_or(960).clamp(200, 4000);
    let height = params.height.unwrap_or(480).clamp(200, 4000);
    let document = {
        let topology = state.topology.read();
        svg::render(&topology.interactive_data(), width, height)
    };
    ([(header::CONTENT_TYPE, "image/svg+xml")], document).into_response()
}

#[derive(Debug, Deserialize)]
struct PathParams {
    source: String,
    target: String,
}

async fn topology_path(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Response {
    let analysis = state
        .topology
        .read()
        .path_analysis(&params.source, &params.target);
    match analysis {
        Some(analysis) => Json(analysis).into_response(),
        None => not_found(format!(
            "No data for route {}->{}",
            params.source, params.target
        )),
    }
}
