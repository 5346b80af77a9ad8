//! Member-side Prometheus metrics
//!
//! The exposition names and label sets below are an external contract;
//! operators alert on them across the whole ring.

use netring_core::metrics::REGISTRY;
use prometheus::{
    register_gauge_vec_with_registry, register_histogram_vec_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, GaugeVec,
    HistogramVec, IntGauge, IntGaugeVec, Opts,
};

/// TCP connectivity status between ring members (1 up, 0 down).
pub static CONNECTIVITY_TCP: std::sync::LazyLock<GaugeVec> = std::sync::LazyLock::new(|| {
    register_gauge_vec_with_registry!(
        Opts::new(
            "netring_connectivity_tcp",
            "TCP connectivity status between ring members"
        ),
        &[
            "source_location",
            "source_instance",
            "target_location",
            "target_instance",
            "target_ip"
        ],
        REGISTRY.clone()
    )
    .expect("Failed to register CONNECTIVITY_TCP")
});

/// HTTP connectivity status between ring members, per probed endpoint.
pub static CONNECTIVITY_HTTP: std::sync::LazyLock<GaugeVec> = std::sync::LazyLock::new(|| {
    register_gauge_vec_with_registry!(
        Opts::new(
            "netring_connectivity_http",
            "HTTP connectivity status between ring members"
        ),
        &[
            "source_location",
            "source_instance",
            "target_location",
            "target_instance",
            "target_ip",
            "endpoint"
        ],
        REGISTRY.clone()
    )
    .expect("Failed to register CONNECTIVITY_HTTP")
});

/// Duration of connectivity checks.
pub static CHECK_DURATION_SECONDS: std::sync::LazyLock<HistogramVec> =
    std::sync::LazyLock::new(|| {
        register_histogram_vec_with_registry!(
            "netring_check_duration_seconds",
            "Duration of connectivity checks",
            &["check_type", "target_location", "target_instance"],
            REGISTRY.clone()
        )
        .expect("Failed to register CHECK_DURATION_SECONDS")
    });

/// Total number of ring members discovered (excluding self).
pub static MEMBERS_TOTAL: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "netring_members_total",
        "Total number of ring members discovered",
        REGISTRY.clone()
    )
    .expect("Failed to register MEMBERS_TOTAL")
});

/// Registry-reported last-seen timestamp per discovered member.
pub static MEMBER_LAST_SEEN: std::sync::LazyLock<GaugeVec> = std::sync::LazyLock::new(|| {
    register_gauge_vec_with_registry!(
        Opts::new(
            "netring_member_last_seen_timestamp",
            "Timestamp when member was last seen"
        ),
        &["location", "instance_id"],
        REGISTRY.clone()
    )
    .expect("Failed to register MEMBER_LAST_SEEN")
});

/// Measured bandwidth to a peer in Mbps.
pub static BANDWIDTH_MBPS: std::sync::LazyLock<GaugeVec> = std::sync::LazyLock::new(|| {
    register_gauge_vec_with_registry!(
        Opts::new(
            "netring_bandwidth_mbps",
            "Measured bandwidth between ring members"
        ),
        &[
            "source_location",
            "source_instance",
            "target_location",
            "target_instance",
            "target_ip"
        ],
        REGISTRY.clone()
    )
    .expect("Failed to register BANDWIDTH_MBPS")
});

/// Hop count of the last traceroute to a peer.
pub static TRACEROUTE_HOPS_TOTAL: std::sync::LazyLock<IntGaugeVec> =
    std::sync::LazyLock::new(|| {
        register_int_gauge_vec_with_registry!(
            Opts::new(
                "netring_traceroute_hops_total",
                "Total hops of the last traceroute to a ring member"
            ),
            &[
                "source_location",
                "source_instance",
                "target_location",
                "target_instance",
                "target_ip"
            ],
            REGISTRY.clone()
        )
        .expect("Failed to register TRACEROUTE_HOPS_TOTAL")
    });

/// Worst per-hop latency of the last traceroute to a peer.
pub static TRACEROUTE_MAX_HOP_LATENCY_MS: std::sync::LazyLock<GaugeVec> =
    std::sync::LazyLock::new(|| {
        register_gauge_vec_with_registry!(
            Opts::new(
                "netring_traceroute_max_hop_latency_ms",
                "Maximum per-hop latency of the last traceroute to a ring member"
            ),
            &[
                "source_location",
                "source_instance",
                "target_location",
                "target_instance",
                "target_ip"
            ],
            REGISTRY.clone()
        )
        .expect("Failed to register TRACEROUTE_MAX_HOP_LATENCY_MS")
    });
