//! Directed multigraph of locations and routers
//!
//! Every ingested route owns its edges through the `route_id` stamped on
//! them: re-ingesting a route first deletes all edges carrying that id,
//! then garbage-collects router nodes whose degree dropped to zero, so
//! stale hop routers never accumulate across probe cycles.

use std::collections::{BTreeSet, HashMap};

use netring_core::protocol::TracerouteHop;
use petgraph::algo::{astar, kosaraju_scc};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::Serialize;

use super::layout;

/// Latency above which an edge is surfaced as a bottleneck.
pub const BOTTLENECK_THRESHOLD_MS: f64 = 150.0;

/// Latency above which a surfaced bottleneck is graded `high`. Kept
/// distinct from the inclusion threshold on purpose.
const SEVERITY_HIGH_MS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Location,
    Router,
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub id: String,
    pub node_type: NodeType,
    pub ip: Option<String>,
    pub location: Option<String>,
    pub hop_number: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Hop,
    Direct,
    Final,
}

#[derive(Debug, Clone)]
pub struct EdgeData {
    pub latency_ms: f64,
    pub route_id: String,
    pub hop_number: Option<u32>,
    pub edge_type: EdgeType,
}

/// Stored per-route detail backing path analysis.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDetail {
    pub hops: Vec<TracerouteHop>,
    pub bandwidth_mbps: Option<f64>,
    pub total_hops: usize,
    pub max_hop_latency: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bottleneck {
    pub from_node: String,
    pub to_node: String,
    pub latency_ms: f64,
    pub route: String,
    pub hop_number: Option<u32>,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologySummary {
    pub total_locations: usize,
    pub total_routers: usize,
    pub total_edges: usize,
    pub routes_analyzed: usize,
    pub bottlenecks_found: usize,
    pub locations: Vec<String>,
    pub graph_density: f64,
    pub strongly_connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractiveNode {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    pub ip: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractiveEdge {
    pub source: String,
    pub target: String,
    pub latency: f64,
    pub route: String,
    pub hop_number: Option<u32>,
    pub color: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractiveTopology {
    pub nodes: Vec<InteractiveNode>,
    pub edges: Vec<InteractiveEdge>,
    pub summary: TopologySummary,
    pub bottlenecks: Vec<Bottleneck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathEdge {
    pub from: String,
    pub to: String,
    pub latency_ms: f64,
    pub hop_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathAnalysis {
    pub source: String,
    pub target: String,
    pub total_hops: usize,
    pub max_hop_latency: f64,
    pub bandwidth_mbps: Option<f64>,
    pub path_nodes: Vec<String>,
    pub path_edges: Vec<PathEdge>,
    pub bottlenecks: Vec<Bottleneck>,
}

/// The topology engine state.
#[derive(Default)]
pub struct TopologyGraph {
    graph: StableDiGraph<NodeData, EdgeData>,
    nodes: HashMap<String, NodeIndex>,
    routes: HashMap<String, RouteDetail>,
    locations: BTreeSet<String>,
}

impl TopologyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all topology state.
    pub fn clear(&mut self) {
        self.graph.clear();
        self.nodes.clear();
        self.routes.clear();
        self.locations.clear();
    }

    #[must_use]
    pub fn route_id(source: &str, target: &str) -> String {
        format!("{source}->{target}")
    }

    /// Ingest one traceroute, replacing whatever the route previously
    /// contributed to the graph.
    pub fn add_traceroute(
        &mut self,
        source_location: &str,
        target_location: &str,
        hops: &[TracerouteHop],
        bandwidth_mbps: Option<f64>,
    ) {
        let route_id = Self::route_id(source_location, target_location);

        self.remove_route_edges(&route_id);

        self.locations.insert(source_location.to_string());
        self.locations.insert(target_location.to_string());
        let source_idx = self.ensure_location(source_location);
        let target_idx = self.ensure_location(target_location);

        if hops.is_empty() {
            self.graph.add_edge(
                source_idx,
                target_idx,
                EdgeData {
                    latency_ms: 0.0,
                    route_id: route_id.clone(),
                    hop_number: None,
                    edge_type: EdgeType::Direct,
                },
            );
        } else {
            let mut prev_idx = source_idx;
            for (position, hop) in hops.iter().enumerate() {
                // Timed-out hops contribute nothing to the graph.
                if hop.ip == "*" || hop.latency_ms.is_none() {
                    continue;
                }
                let hop_number = position as u32 + 1;
                let router_idx = self.ensure_router(&hop.ip, hop_number);
                self.graph.add_edge(
                    prev_idx,
                    router_idx,
                    EdgeData {
                        latency_ms: hop.latency_ms.unwrap_or(0.0),
                        route_id: route_id.clone(),
                        hop_number: Some(hop_number),
                        edge_type: EdgeType::Hop,
                    },
                );
                prev_idx = router_idx;
            }
            // Connect the last usable hop to the target location.
            if prev_idx != source_idx {
                self.graph.add_edge(
                    prev_idx,
                    target_idx,
                    EdgeData {
                        latency_ms: 0.0,
                        route_id: route_id.clone(),
                        hop_number: None,
                        edge_type: EdgeType::Final,
                    },
                );
            }
        }

        let max_hop_latency = hops
            .iter()
            .filter_map(|hop| hop.latency_ms)
            .fold(0.0_f64, f64::max);
        self.routes.insert(
            route_id,
            RouteDetail {
                hops: hops.to_vec(),
                bandwidth_mbps,
                total_hops: hops.len(),
                max_hop_latency,
            },
        );
    }

    /// Remove every edge carrying this route id, then GC routers whose
    /// degree dropped to zero.
    fn remove_route_edges(&mut self, route_id: &str) {
        self.graph
            .retain_edges(|graph, edge| graph[edge].route_id != route_id);

        let orphaned: Vec<(String, NodeIndex)> = self
            .nodes
            .iter()
            .filter(|(_, &idx)| {
                self.graph[idx].node_type == NodeType::Router
                    && self.graph.neighbors_undirected(idx).next().is_none()
            })
            .map(|(id, &idx)| (id.clone(), idx))
            .collect();
        for (id, idx) in orphaned {
            self.graph.remove_node(idx);
            self.nodes.remove(&id);
        }
    }

    fn ensure_location(&mut self, location: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(location) {
            return idx;
        }
        let idx = self.graph.add_node(NodeData {
            id: location.to_string(),
            node_type: NodeType::Location,
            ip: None,
            location: Some(location.to_string()),
            hop_number: None,
        });
        self.nodes.insert(location.to_string(), idx);
        idx
    }

    fn ensure_router(&mut self, ip: &str, hop_number: u32) -> NodeIndex {
        let id = format!("router:{ip}");
        if let Some(&idx) = self.nodes.get(&id) {
            self.graph[idx].hop_number = Some(hop_number);
            return idx;
        }
        let idx = self.graph.add_node(NodeData {
            id: id.clone(),
            node_type: NodeType::Router,
            ip: Some(ip.to_string()),
            location: None,
            hop_number: Some(hop_number),
        });
        self.nodes.insert(id, idx);
        idx
    }

    /// Every edge above the inclusion threshold, worst first.
    #[must_use]
    pub fn find_bottlenecks(&self, threshold_ms: f64) -> Vec<Bottleneck> {
        let mut bottlenecks: Vec<Bottleneck> = self
            .graph
            .edge_references()
            .filter(|edge| edge.weight().latency_ms > threshold_ms)
            .map(|edge| {
                let weight = edge.weight();
                Bottleneck {
                    from_node: self.graph[edge.source()].id.clone(),
                    to_node: self.graph[edge.target()].id.clone(),
                    latency_ms: weight.latency_ms,
                    route: weight.route_id.clone(),
                    hop_number: weight.hop_number,
                    severity: if weight.latency_ms > SEVERITY_HIGH_MS {
                        "high".to_string()
                    } else {
                        "medium".to_string()
                    },
                }
            })
            .collect();
        bottlenecks.sort_by(|a, b| {
            b.latency_ms
                .partial_cmp(&a.latency_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        bottlenecks
    }

    /// Detailed analysis for one directed location pair, if a route for it
    /// has been ingested.
    #[must_use]
    pub fn path_analysis(&self, source: &str, target: &str) -> Option<PathAnalysis> {
        let route_id = Self::route_id(source, target);
        let detail = self.routes.get(&route_id)?;

        let mut path_nodes = Vec::new();
        let mut path_edges = Vec::new();
        if let (Some(&source_idx), Some(&target_idx)) =
            (self.nodes.get(source), self.nodes.get(target))
        {
            // Unit-weight shortest path; a route materializes exactly one
            // chain, so any shortest path is the route's own.
            if let Some((_, node_path)) = astar(
                &self.graph,
                source_idx,
                |node| node == target_idx,
                |_| 1_u32,
                |_| 0_u32,
            ) {
                path_nodes = node_path
                    .iter()
                    .map(|&idx| self.graph[idx].id.clone())
                    .collect();
                for pair in node_path.windows(2) {
                    if let Some(edge) = self.graph.edges_connecting(pair[0], pair[1]).next() {
                        path_edges.push(PathEdge {
                            from: self.graph[pair[0]].id.clone(),
                            to: self.graph[pair[1]].id.clone(),
                            latency_ms: edge.weight().latency_ms,
                            hop_number: edge.weight().hop_number,
                        });
                    }
                }
            }
        }

        let bottlenecks = self
            .find_bottlenecks(BOTTLENECK_THRESHOLD_MS)
            .into_iter()
            .filter(|bottleneck| bottleneck.route == route_id)
            .collect();

        Some(PathAnalysis {
            source: source.to_string(),
            target: target.to_string(),
            total_hops: detail.total_hops,
            max_hop_latency: detail.max_hop_latency,
            bandwidth_mbps: detail.bandwidth_mbps,
            path_nodes,
            path_edges,
            bottlenecks,
        })
    }

    /// Aggregate statistics about the current graph.
    #[must_use]
    pub fn summary(&self) -> TopologySummary {
        let node_count = self.graph.node_count();
        let edge_count = self.graph.edge_count();
        let router_count = self
            .graph
            .node_weights()
            .filter(|node| node.node_type == NodeType::Router)
            .count();
        let density = if node_count > 1 {
            edge_count as f64 / (node_count as f64 * (node_count as f64 - 1.0))
        } else {
            0.0
        };
        let strongly_connected =
            node_count > 0 && kosaraju_scc(&self.graph).len() == 1;

        TopologySummary {
            total_locations: self.locations.len(),
            total_routers: router_count,
            total_edges: edge_count,
            routes_analyzed: self.routes.len(),
            bottlenecks_found: self.find_bottlenecks(BOTTLENECK_THRESHOLD_MS).len(),
            locations: self.locations.iter().cloned().collect(),
            graph_density: density,
            strongly_connected,
        }
    }

    /// Node/edge data with layout coordinates for the dashboard and the
    /// SVG renderer.
    #[must_use]
    pub fn interactive_data(&self) -> InteractiveTopology {
        let positions = self.compute_layout();

        let mut nodes: Vec<InteractiveNode> = self
            .graph
            .node_weights()
            .map(|node| {
                let (x, y) = positions.get(&node.id).copied().unwrap_or((0.0, 0.0));
                let label = match node.node_type {
                    NodeType::Location => node.id.clone(),
                    NodeType::Router => node.ip.clone().unwrap_or_else(|| node.id.clone()),
                };
                InteractiveNode {
                    id: node.id.clone(),
                    x,
                    y,
                    node_type: node.node_type,
                    label,
                    ip: node.ip.clone(),
                    location: node.location.clone(),
                }
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<InteractiveEdge> = self
            .graph
            .edge_references()
            .map(|edge| {
                let weight = edge.weight();
                let color = if weight.latency_ms > 50.0 {
                    "red"
                } else if weight.latency_ms > 20.0 {
                    "orange"
                } else {
                    "green"
                };
                InteractiveEdge {
                    source: self.graph[edge.source()].id.clone(),
                    target: self.graph[edge.target()].id.clone(),
                    latency: weight.latency_ms,
                    route: weight.route_id.clone(),
                    hop_number: weight.hop_number,
                    color: color.to_string(),
                }
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        InteractiveTopology {
            nodes,
            edges,
            summary: self.summary(),
            bottlenecks: self.find_bottlenecks(BOTTLENECK_THRESHOLD_MS),
        }
    }

    fn compute_layout(&self) -> HashMap<String, (f64, f64)> {
        let location_ids: Vec<String> = self
            .graph
            .node_weights()
            .filter(|node| node.node_type == NodeType::Location)
            .map(|node| node.id.clone())
            .collect();
        let router_ids: Vec<String> = self
            .graph
            .node_weights()
            .filter(|node| node.node_type == NodeType::Router)
            .map(|node| node.id.clone())
            .collect();
        let edges: Vec<(String, String)> = self
            .graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].id.clone(),
                    self.graph[edge.target()].id.clone(),
                )
            })
            .collect();

        layout::compute(&location_ids, &router_ids, &edges)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn routes(&self) -> &HashMap<String, RouteDetail> {
        &self.routes
    }
}
