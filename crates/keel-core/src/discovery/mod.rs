//! Attractor discovery over recorded trajectories
//!
//! A batch job: cluster a snapshot of recorded states with DBSCAN and
//! describe each dense region by its centroid and stability metrics.
//! Output is recomputed from scratch on every run and never written back
//! into the trajectory store.
//!
//! # Metrics
//!
//! - **coupling density**: fraction of constraint edges (one per requirement
//!   of each constraint) whose requirement the centroid meets with at least
//!   `margin` to spare; 1.0 for an empty constraint set
//! - **dispersion**: mean Euclidean distance of members from the centroid

pub mod dbscan;

pub use dbscan::dbscan;

use crate::constraints::ConstraintSet;
use crate::error::{KeelError, Result};
use crate::state::{Dimension, StateVector};
use crate::trajectory::TrajectoryStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Coupling density at or above which an attractor is coherent
pub const COHERENT_DENSITY: f64 = 0.8;

/// Clustering parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryParams {
    /// Neighbourhood radius
    pub eps: f64,
    /// Points (including itself) a core point needs within `eps`
    pub min_samples: usize,
    /// Slack a requirement must clear to count as coupled
    pub margin: f64,
}

impl DiscoveryParams {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self {
            eps,
            min_samples,
            ..Self::default()
        }
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(KeelError::InvalidParameter(format!(
                "eps must be positive and finite, got {}",
                self.eps
            )));
        }
        if self.min_samples == 0 {
            return Err(KeelError::InvalidParameter("min_samples must be at least 1".into()));
        }
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(KeelError::InvalidParameter(format!(
                "margin must be non-negative and finite, got {}",
                self.margin
            )));
        }
        Ok(())
    }
}

impl Default for DiscoveryParams {
    fn default() -> Self {
        Self {
            eps: 0.3,
            min_samples: 3,
            margin: 0.05,
        }
    }
}

/// Stability label of a discovered region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttractorLabel {
    /// Valid centroid with dense constraint coupling
    Coherent,
    /// Valid centroid, but many requirements only barely met or unmet
    Fragile,
    /// The centroid itself violates the constraint set
    Violating,
}

impl fmt::Display for AttractorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttractorLabel::Coherent => "coherent",
            AttractorLabel::Fragile => "fragile",
            AttractorLabel::Violating => "violating",
        })
    }
}

/// A dense cluster of recorded states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attractor {
    /// Position in discovery order
    pub id: usize,
    pub centroid: StateVector,
    /// Indices into the clustered input, ascending
    pub members: Vec<usize>,
    pub member_count: usize,
    pub coupling_density: f64,
    pub dispersion: f64,
    pub label: AttractorLabel,
}

impl Attractor {
    /// Density discounted by spread; higher is more stable
    pub fn quality(&self) -> f64 {
        self.coupling_density * (1.0 - self.dispersion).max(0.0)
    }
}

/// Attractors split by rank on one dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub dimension: Dimension,
    pub high: Vec<Attractor>,
    pub other: Vec<Attractor>,
}

/// Clusters recorded states and scores the resulting regions
#[derive(Debug, Clone)]
pub struct AttractorDiscoverer {
    constraints: Arc<ConstraintSet>,
    params: DiscoveryParams,
}

impl AttractorDiscoverer {
    pub fn new(constraints: Arc<ConstraintSet>, params: DiscoveryParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { constraints, params })
    }

    pub fn params(&self) -> &DiscoveryParams {
        &self.params
    }

    /// Cluster `points` with explicit `eps` and `min_samples`
    pub fn discover(&self, points: &[StateVector], eps: f64, min_samples: usize) -> Result<Vec<Attractor>> {
        let params = DiscoveryParams {
            eps,
            min_samples,
            margin: self.params.margin,
        };
        params.validate()?;
        Ok(self.run(points, &params))
    }

    /// Cluster `points` with the configured parameters
    pub fn discover_default(&self, points: &[StateVector]) -> Vec<Attractor> {
        self.run(points, &self.params)
    }

    /// Cluster a snapshot of one agent's trajectory
    pub fn discover_agent(&self, store: &TrajectoryStore, agent_id: &str) -> Result<Vec<Attractor>> {
        let states = store.snapshot_states(Some(agent_id))?;
        tracing::info!(
            "Discovering attractors for agent {} over {} states",
            agent_id,
            states.len()
        );
        Ok(self.discover_default(&states))
    }

    /// Cluster a snapshot of every agent's trajectory together
    pub fn discover_population(&self, store: &TrajectoryStore) -> Result<Vec<Attractor>> {
        let states = store.snapshot_states(None)?;
        tracing::info!("Discovering attractors over {} population states", states.len());
        Ok(self.discover_default(&states))
    }

    fn run(&self, points: &[StateVector], params: &DiscoveryParams) -> Vec<Attractor> {
        let attractors: Vec<Attractor> = dbscan(points, params.eps, params.min_samples)
            .into_iter()
            .enumerate()
            .filter_map(|(id, members)| self.describe(id, points, members, params.margin))
            .collect();

        tracing::debug!(
            "DBSCAN eps={} min_samples={} found {} attractors in {} points",
            params.eps,
            params.min_samples,
            attractors.len(),
            points.len()
        );
        attractors
    }

    fn describe(&self, id: usize, points: &[StateVector], members: Vec<usize>, margin: f64) -> Option<Attractor> {
        let states: Vec<StateVector> = members.iter().map(|&i| points[i]).collect();
        let centroid = StateVector::mean(&states)?;
        let dispersion = states.iter().map(|s| s.distance(&centroid)).sum::<f64>() / states.len() as f64;
        let coupling_density = self.coupling_density(&centroid, margin);

        let label = if !self.constraints.is_satisfied(&centroid) {
            AttractorLabel::Violating
        } else if coupling_density >= COHERENT_DENSITY {
            AttractorLabel::Coherent
        } else {
            AttractorLabel::Fragile
        };

        Some(Attractor {
            id,
            centroid,
            member_count: members.len(),
            members,
            coupling_density,
            dispersion,
            label,
        })
    }

    /// Fraction of requirement edges met with `margin` at `state`
    pub fn coupling_density(&self, state: &StateVector, margin: f64) -> f64 {
        let (total, coupled) = self
            .constraints
            .constraints()
            .iter()
            .flat_map(|c| c.requirements.iter())
            .fold((0usize, 0usize), |(total, coupled), req| {
                let met = state[req.dimension] >= req.threshold + margin;
                (total + 1, coupled + usize::from(met))
            });

        if total == 0 {
            1.0
        } else {
            coupled as f64 / total as f64
        }
    }
}

/// Split attractors into the top `top_fraction` by centroid value on `dimension` and the rest
///
/// Ranking is descending, ties broken by ascending id. `top_fraction` is
/// clamped to `[0, 1]` (NaN counts as 0) and `ceil(top_fraction * n)`
/// attractors land in `high`.
pub fn classify(attractors: &[Attractor], dimension: Dimension, top_fraction: f64) -> Classification {
    let fraction = if top_fraction.is_nan() {
        0.0
    } else {
        top_fraction.clamp(0.0, 1.0)
    };

    let mut ranked: Vec<Attractor> = attractors.to_vec();
    ranked.sort_by(|a, b| {
        b.centroid[dimension]
            .partial_cmp(&a.centroid[dimension])
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });

    let take = ((fraction * ranked.len() as f64).ceil() as usize).min(ranked.len());
    let other = ranked.split_off(take);
    Classification {
        dimension,
        high: ranked,
        other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Dimension;

    fn discoverer() -> AttractorDiscoverer {
        AttractorDiscoverer::new(Arc::new(ConstraintSet::default()), DiscoveryParams::default()).unwrap()
    }

    fn near(base: f64, jitter: f64) -> StateVector {
        StateVector::uniform(base).with(Dimension::Patience, base + jitter)
    }

    #[test]
    fn test_three_clustered_points_and_one_outlier() {
        let points = vec![near(0.9, 0.0), near(0.9, 0.1), near(0.9, -0.1), StateVector::uniform(0.1)];
        let found = discoverer().discover(&points, 0.3, 3).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].member_count, 3);
        assert_eq!(found[0].members, vec![0, 1, 2]);
        assert!(!found[0].members.contains(&3));
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let mut points = Vec::new();
        for i in 0..10 {
            points.push(near(0.85, i as f64 * 0.005));
            points.push(near(0.3, i as f64 * 0.005));
        }
        points.push(StateVector::uniform(0.0));

        let d = discoverer();
        let first = d.discover(&points, 0.2, 4).unwrap();
        let second = d.discover(&points, 0.2, 4).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_metrics_and_labels() {
        let d = discoverer();
        let coherent = d.discover(&[StateVector::uniform(0.875); 3], 0.1, 3).unwrap();
        assert_eq!(coherent[0].label, AttractorLabel::Coherent);
        assert_eq!(coherent[0].coupling_density, 1.0);
        assert_eq!(coherent[0].dispersion, 0.0);
        assert_eq!(coherent[0].quality(), 1.0);

        // Truthfulness high with gated dimensions at the loose floor: valid, weakly coupled
        let edge = StateVector::uniform(0.5).with(Dimension::Truthfulness, 0.65);
        let fragile = d.discover(&[edge; 3], 0.1, 3).unwrap();
        assert_eq!(fragile[0].label, AttractorLabel::Fragile);
        assert!(fragile[0].coupling_density < COHERENT_DENSITY);

        let bad = StateVector::uniform(0.5)
            .with(Dimension::Justice, 0.9)
            .with(Dimension::Truthfulness, 0.2);
        let violating = d.discover(&[bad; 3], 0.1, 3).unwrap();
        assert_eq!(violating[0].label, AttractorLabel::Violating);
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let d = discoverer();
        assert!(matches!(d.discover(&[], 0.0, 3), Err(KeelError::InvalidParameter(_))));
        assert!(matches!(d.discover(&[], f64::NAN, 3), Err(KeelError::InvalidParameter(_))));
        assert!(matches!(d.discover(&[], 0.3, 0), Err(KeelError::InvalidParameter(_))));
        assert!(AttractorDiscoverer::new(
            Arc::new(ConstraintSet::empty()),
            DiscoveryParams::default().with_margin(-1.0)
        )
        .is_err());
    }

    #[test]
    fn test_empty_constraint_set_is_fully_coupled() {
        let d = AttractorDiscoverer::new(Arc::new(ConstraintSet::empty()), DiscoveryParams::default()).unwrap();
        assert_eq!(d.coupling_density(&StateVector::uniform(0.0), 0.05), 1.0);
    }

    fn attractor(id: usize, courage: f64) -> Attractor {
        Attractor {
            id,
            centroid: StateVector::uniform(0.5).with(Dimension::Courage, courage),
            members: vec![id],
            member_count: 1,
            coupling_density: 1.0,
            dispersion: 0.0,
            label: AttractorLabel::Coherent,
        }
    }

    #[test]
    fn test_classify_takes_ceil_of_top_fraction() {
        let all = vec![attractor(0, 0.2), attractor(1, 0.9), attractor(2, 0.6), attractor(3, 0.4)];
        let split = classify(&all, Dimension::Courage, 0.3);
        let high: Vec<usize> = split.high.iter().map(|a| a.id).collect();
        let other: Vec<usize> = split.other.iter().map(|a| a.id).collect();
        assert_eq!(high, vec![1, 2]);
        assert_eq!(other, vec![3, 0]);
    }

    #[test]
    fn test_classify_ties_and_bounds() {
        let all = vec![attractor(2, 0.7), attractor(0, 0.7), attractor(1, 0.7)];
        let split = classify(&all, Dimension::Courage, 0.34);
        assert_eq!(split.high.len(), 2);
        assert_eq!(split.high[0].id, 0);
        assert_eq!(split.high[1].id, 1);

        assert_eq!(classify(&all, Dimension::Courage, 5.0).high.len(), 3);
        assert!(classify(&all, Dimension::Courage, -1.0).high.is_empty());
        assert!(classify(&all, Dimension::Courage, f64::NAN).high.is_empty());
        assert!(classify(&[], Dimension::Courage, 0.5).high.is_empty());
    }

    #[test]
    fn test_discover_over_store_snapshot() {
        let store = TrajectoryStore::in_memory();
        let t = crate::types::now();
        for i in 0..4 {
            store.append("a", t, &near(0.9, i as f64 * 0.01)).unwrap();
            store.append("b", t, &near(0.2, i as f64 * 0.01)).unwrap();
        }
        let d = discoverer();
        assert_eq!(d.discover_agent(&store, "a").unwrap().len(), 1);
        assert_eq!(d.discover_population(&store).unwrap().len(), 2);
        assert!(d.discover_agent(&store, "missing").unwrap().is_empty());
    }
}
