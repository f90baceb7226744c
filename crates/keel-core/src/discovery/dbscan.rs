//! Density-based clustering over states
//!
//! Plain DBSCAN with Euclidean distance. The neighbourhood of a point
//! includes the point itself, so `min_samples = 1` makes every point a core
//! point. Expansion visits points in input order, which makes the result a
//! pure function of the input sequence.

use crate::state::StateVector;
use std::collections::VecDeque;

/// Cluster membership as input indices, clusters in discovery order
///
/// Indices inside a cluster are ascending. Noise points appear in no cluster.
pub fn dbscan(points: &[StateVector], eps: f64, min_samples: usize) -> Vec<Vec<usize>> {
    let n = points.len();
    let mut visited = vec![false; n];
    let mut assigned: Vec<Option<usize>> = vec![None; n];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seeds = region(points, i, eps);
        if seeds.len() < min_samples {
            // Noise for now; a later cluster may still claim it as a border point
            continue;
        }

        let cluster = clusters.len();
        let mut members = vec![i];
        assigned[i] = Some(cluster);

        let mut queue: VecDeque<usize> = seeds.into();
        while let Some(j) = queue.pop_front() {
            if assigned[j].is_none() {
                assigned[j] = Some(cluster);
                members.push(j);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;

            let neighbours = region(points, j, eps);
            if neighbours.len() >= min_samples {
                queue.extend(neighbours);
            }
        }

        members.sort_unstable();
        clusters.push(members);
    }

    clusters
}

/// Indices within `eps` of `points[i]`, including `i`
fn region(points: &[StateVector], i: usize, eps: f64) -> Vec<usize> {
    let center = &points[i];
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| center.distance(p) <= eps)
        .map(|(j, _)| j)
        .collect()
}
