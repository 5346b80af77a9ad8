//! Node placement for rendering
//!
//! Locations sit on a circle of radius 3 at evenly spaced angles; routers
//! are relaxed with a small spring simulation while the location anchors
//! stay fixed. Seeding is deterministic so the same topology always
//! renders the same picture.

use std::collections::HashMap;

const CIRCLE_RADIUS: f64 = 3.0;
const SPRING_K: f64 = 1.0;
const ITERATIONS: usize = 30;

/// Compute coordinates for every node. `edges` carry node ids.
#[must_use]
pub fn compute(
    location_ids: &[String],
    router_ids: &[String],
    edges: &[(String, String)],
) -> HashMap<String, (f64, f64)> {
    let mut positions: HashMap<String, (f64, f64)> = HashMap::new();

    let mut locations: Vec<&String> = location_ids.iter().collect();
    locations.sort();
    let count = locations.len();
    for (index, id) in locations.iter().enumerate() {
        let angle = 2.0 * std::f64::consts::PI * index as f64 / count.max(1) as f64;
        positions.insert(
            (*id).clone(),
            (CIRCLE_RADIUS * angle.cos(), CIRCLE_RADIUS * angle.sin()),
        );
    }

    if router_ids.is_empty() {
        return positions;
    }

    let mut routers: Vec<&String> = router_ids.iter().collect();
    routers.sort();

    // Seed each router at the mean of its already-placed neighbors, nudged
    // by its index so coincident seeds can separate.
    for (index, id) in routers.iter().enumerate() {
        let neighbors: Vec<(f64, f64)> = edges
            .iter()
            .filter_map(|(from, to)| {
                if from == *id {
                    positions.get(to).copied()
                } else if to == *id {
                    positions.get(from).copied()
                } else {
                    None
                }
            })
            .collect();
        let seed = if neighbors.is_empty() {
            let angle = 2.0 * std::f64::consts::PI * index as f64 / routers.len() as f64;
            (1.5 * angle.cos(), 1.5 * angle.sin())
        } else {
            let sum = neighbors
                .iter()
                .fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            let n = neighbors.len() as f64;
            (
                sum.0 / n + 0.05 * (index as f64 + 1.0),
                sum.1 / n - 0.05 * (index as f64 + 1.0),
            )
        };
        positions.insert((*id).clone(), seed);
    }

    // Spring relaxation, moving routers only.
    let all_ids: Vec<&String> = positions.keys().collect();
    let all_ids: Vec<String> = all_ids.into_iter().cloned().collect();
    for iteration in 0..ITERATIONS {
        let temperature = 0.3 * (1.0 - iteration as f64 / ITERATIONS as f64);
        let mut displacement: HashMap<&String, (f64, f64)> =
            routers.iter().map(|id| (*id, (0.0, 0.0))).collect();

        // Repulsion between every pair involving a router.
        for router in &routers {
            let here = positions[*router];
            for other in &all_ids {
                if other == *router {
                    continue;
                }
                let there = positions[other];
                let (dx, dy) = (here.0 - there.0, here.1 - there.1);
                let distance = (dx * dx + dy * dy).sqrt().max(0.01);
                let force = SPRING_K * SPRING_K / distance;
                if let Some(entry) = displacement.get_mut(*router) {
                    entry.0 += dx / distance * force * 0.05;
                    entry.1 += dy / distance * force * 0.05;
                }
            }
        }

        // Attraction along edges.
        for (from, to) in edges {
            let (Some(&here), Some(&there)) = (positions.get(from), positions.get(to)) else {
                continue;
            };
            let (dx, dy) = (there.0 - here.0, there.1 - here.1);
            let distance = (dx * dx + dy * dy).sqrt().max(0.01);
            let force = distance * distance / SPRING_K;
            if let Some(entry) = displacement.get_mut(from) {
                entry.0 += dx / distance * force * 0.02;
                entry.1 += dy / distance * force * 0.02;
            }
            if let Some(entry) = displacement.get_mut(to) {
                entry.0 -= dx / distance * force * 0.02;
                entry.1 -= dy / distance * force * 0.02;
            }
        }

        for router in &routers {
            let (dx, dy) = displacement[*router];
            let magnitude = (dx * dx + dy * dy).sqrt();
            if magnitude < f64::EPSILON {
                continue;
            }
            let step = magnitude.min(temperature);
            if let Some(position) = positions.get_mut(*router) {
                position.0 += dx / magnitude * step;
                position.1 += dy / magnitude * step;
            }
        }
    }

    positions
}
