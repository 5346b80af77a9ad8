//! Topology synthesis from traceroute reports

mod graph;
mod layout;
pub mod svg;

pub use graph::{
    Bottleneck, EdgeType, InteractiveTopology, NodeType, PathAnalysis, RouteDetail,
    TopologyGraph, TopologySummary, BOTTLENECK_THRESHOLD_MS,
};
