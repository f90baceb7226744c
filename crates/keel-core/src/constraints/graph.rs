//! Structural view of a constraint set
//!
//! Every (trigger, requirement) pair becomes an edge `requirement -> trigger`:
//! the trigger *depends on* the requirement. In that orientation the hub is
//! the dimension with the most incoming edges and the foundation the one with
//! the most outgoing edges.

use super::constraint::ConstraintCategory;
use super::ConstraintSet;
use crate::state::Dimension;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Edge payload: which constraint produced the dependency
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge {
    pub constraint_id: String,
    pub category: ConstraintCategory,
    pub threshold: f64,
}

/// Degree summary for one dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRole {
    pub dimension: Dimension,
    /// Distinct dimensions this one depends on
    pub requires: usize,
    /// Distinct dimensions depending on this one
    pub required_by: usize,
}

/// Dependency graph over dimensions
#[derive(Debug, Clone)]
pub struct ConstraintGraph {
    graph: DiGraph<Dimension, DependencyEdge>,
    nodes: [NodeIndex; crate::state::DIMENSION_COUNT],
}

impl ConstraintGraph {
    pub(crate) fn build(set: &ConstraintSet) -> Self {
        let mut graph = DiGraph::new();
        let nodes = Dimension::ALL.map(|d| graph.add_node(d));

        for c in set.constraints() {
            // A self-requirement holds whenever its constraint fires
            for req in c.requirements.iter().filter(|r| r.dimension != c.trigger) {
                graph.add_edge(
                    nodes[req.dimension.index()],
                    nodes[c.trigger.index()],
                    DependencyEdge {
                        constraint_id: c.id.clone(),
                        category: c.category,
                        threshold: req.threshold,
                    },
                );
            }
        }

        Self { graph, nodes }
    }

    fn distinct_neighbors(&self, dim: Dimension, direction: Direction) -> usize {
        self.graph
            .neighbors_directed(self.nodes[dim.index()], direction)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Degree summary of one dimension
    pub fn role(&self, dim: Dimension) -> DimensionRole {
        DimensionRole {
            dimension: dim,
            requires: self.distinct_neighbors(dim, Direction::Incoming),
            required_by: self.distinct_neighbors(dim, Direction::Outgoing),
        }
    }

    /// Degree summaries for all dimensions in canonical order
    pub fn roles(&self) -> Vec<DimensionRole> {
        Dimension::ALL.iter().map(|d| self.role(*d)).collect()
    }

    /// Dimension depending on the most others (ties: canonical order)
    pub fn hub_candidate(&self) -> Option<Dimension> {
        self.roles()
            .into_iter()
            .filter(|r| r.requires > 0)
            .max_by(|a, b| {
                a.requires
                    .cmp(&b.requires)
                    .then(b.dimension.cmp(&a.dimension))
            })
            .map(|r| r.dimension)
    }

    /// Dimension the most others depend on (ties: canonical order)
    pub fn foundation_candidate(&self) -> Option<Dimension> {
        self.roles()
            .into_iter()
            .filter(|r| r.required_by > 0)
            .max_by(|a, b| {
                a.required_by
                    .cmp(&b.required_by)
                    .then(b.dimension.cmp(&a.dimension))
            })
            .map(|r| r.dimension)
    }

    /// True when some dimension transitively depends on itself
    ///
    /// Cycles are legal: every threshold lies in `[0, 1]`, so the all-ones
    /// state always satisfies the set. They do lengthen repair chains.
    pub fn has_dependency_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Constraint ids that make `trigger` depend on `requirement`
    pub fn edges_between(&self, requirement: Dimension, trigger: Dimension) -> Vec<&DependencyEdge> {
        self.graph
            .edges_connecting(self.nodes[requirement.index()], self.nodes[trigger.index()])
            .map(|e| e.weight())
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
