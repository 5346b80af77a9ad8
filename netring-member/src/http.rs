//! Member HTTP surface
//!
//! Three endpoints: `/health` with full task-health detail, the Prometheus
//! scrape endpoint, and the bandwidth echo payload peers pull from.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use netring_core::metrics::{gather_metrics, TEXT_CONTENT_TYPE};
use netring_core::protocol::{now_epoch, ErrorResponse};

use crate::agent::MemberAgent;
use crate::supervisor::{Supervisor, TaskHealth};

/// Server-side cap on the bandwidth payload, in MB.
const BANDWIDTH_MAX_MB: u64 = 10;
const BYTES_PER_MB: u64 = 1_048_576;

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<MemberAgent>,
    pub supervisor: Arc<Supervisor>,
}

/// Member HTTP router.
pub fn create_router(agent: Arc<MemberAgent>, supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/bandwidth_test", get(bandwidth_test))
        .with_state(AppState { agent, supervisor })
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    component: String,
    instance_id: String,
    location: String,
    members_count: usize,
    timestamp: i64,
    task_health: HashMap<String, TaskHealth>,
    unhealthy_tasks: Vec<String>,
    fault_tolerance: FaultToleranceInfo,
}

#[derive(Debug, Serialize)]
struct FaultToleranceInfo {
    task_timeout_seconds: u64,
    health_monitor_interval_seconds: u64,
}

/// Health check with per-task watchdog detail. Overall status is
/// `unhealthy` iff any supervised task's heartbeat is overdue.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let task_health = state.supervisor.task_health();
    let unhealthy_tasks = state.supervisor.unhealthy_tasks();
    let status = if unhealthy_tasks.is_empty() {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        component: "member".to_string(),
        instance_id: state.agent.instance_id().to_string(),
        location: state.agent.location().to_string(),
        members_count: state.agent.members_count().await,
        timestamp: now_epoch(),
        task_health,
        unhealthy_tasks,
        fault_tolerance: FaultToleranceInfo {
            task_timeout_seconds: state.supervisor.task_timeout().as_secs(),
            health_monitor_interval_seconds: state.supervisor.monitor_interval().as_secs(),
        },
    })
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], gather_metrics())
}

#[derive(Debug, Deserialize)]
struct BandwidthParams {
    size: Option<String>,
}

/// Serve `min(size, 10)` MB of a constant byte. The payload is deliberately
/// uncompressible noise-free filler of exactly known length, so the
/// requester can compute bandwidth from wall time alone.
async fn bandwidth_test(Query(params): Query<BandwidthParams>) -> impl IntoResponse {
    let requested_mb = match params.size.as_deref() {
        None => 1,
        Some(raw) => match raw.parse::<u64>() {
            Ok(mb) => mb,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("invalid size parameter: {raw}"),
                    }),
                )
                    .into_response();
            }
        },
    };

    let size_mb = requested_mb.min(BANDWIDTH_MAX_MB);
    let payload = Bytes::from(vec![b'x'; (size_mb * BYTES_PER_MB) as usize]);

    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        payload,
    )
        .into_response()
}
