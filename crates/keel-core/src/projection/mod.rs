//! Projector - repair of invalid states
//!
//! Given a state that violates a [`ConstraintSet`], the projector moves it
//! toward a nearby satisfying state with one of three [`Strategy`] variants.
//!
//! # Algorithm
//!
//! ```text
//! loop:
//!     violations = validate(current)
//!     if none            -> converged
//!     if passes == max   -> stop, report remaining violations
//!     one corrective pass: one adjustment per violation, in check order
//! ```
//!
//! `RaiseDependencies` only ever raises values and `LowerDependents` only
//! ever lowers them, so both settle after finitely many passes.
//! `Balanced` mixes the two per violation and can reintroduce violations
//! that an earlier pass resolved; it is not guaranteed to converge. The
//! outcome therefore always carries a `converged` flag, and
//! [`Projector::project_with_fallback`] retries a non-converged repair with
//! `RaiseDependencies` from the original state.

pub mod strategy;

pub use strategy::{Strategy, LOWER_MARGIN};

use crate::constraints::{ConstraintSet, Violation};
use crate::state::StateVector;
use serde::{Deserialize, Serialize};

/// Default cap on corrective passes
pub const DEFAULT_MAX_ITERATIONS: usize = 32;

/// Result of a projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionOutcome {
    /// Corrected state; check `converged` before relying on its validity
    pub state: StateVector,
    pub original: StateVector,
    pub converged: bool,
    /// Corrective passes applied
    pub iterations: usize,
    /// Strategy that produced `state`
    pub strategy: Strategy,
    /// True when `state` came from the fallback strategy
    pub fallback_used: bool,
    /// Violations still present in `state`
    pub remaining: Vec<Violation>,
}

impl ProjectionOutcome {
    /// Euclidean distance moved from the original state
    pub fn displacement(&self) -> f64 {
        self.original.distance(&self.state)
    }
}

/// Iterative constraint repair with a bounded number of passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projector {
    max_iterations: usize,
}

impl Projector {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Repair `state` against `constraints` with `strategy`
    ///
    /// Valid input is returned unchanged with zero iterations.
    pub fn project(
        &self,
        state: &StateVector,
        constraints: &ConstraintSet,
        strategy: Strategy,
    ) -> ProjectionOutcome {
        let original = *state;
        let mut current = original;
        let mut iterations = 0;

        loop {
            let result = constraints.validate(&current);
            if result.is_valid() {
                tracing::debug!(
                    "Projection with {} converged after {} passes",
                    strategy,
                    iterations
                );
                return ProjectionOutcome {
                    state: current,
                    original,
                    converged: true,
                    iterations,
                    strategy,
                    fallback_used: false,
                    remaining: Vec::new(),
                };
            }

            if iterations >= self.max_iterations {
                tracing::debug!(
                    "Projection with {} stopped after {} passes with {} violations left",
                    strategy,
                    iterations,
                    result.violations.len()
                );
                return ProjectionOutcome {
                    state: current,
                    original,
                    converged: false,
                    iterations,
                    strategy,
                    fallback_used: false,
                    remaining: result.violations,
                };
            }

            current = result
                .violations
                .iter()
                .fold(current, |working, v| strategy.correct(&working, v, &original));
            iterations += 1;
        }
    }

    /// Like [`project`](Self::project), but a non-converged repair is redone
    /// from the original state with `RaiseDependencies`
    ///
    /// Raising is monotone and every threshold lies in `[0, 1]`, so on a
    /// well-formed constraint set it converges given enough passes.
    pub fn project_with_fallback(
        &self,
        state: &StateVector,
        constraints: &ConstraintSet,
        strategy: Strategy,
    ) -> ProjectionOutcome {
        let outcome = self.project(state, constraints, strategy);
        if outcome.converged || strategy == Strategy::RaiseDependencies {
            return outcome;
        }

        tracing::warn!(
            "Projection with {} did not converge in {} passes; falling back to {}",
            strategy,
            self.max_iterations,
            Strategy::RaiseDependencies
        );
        let mut fallback = self.project(state, constraints, Strategy::RaiseDependencies);
        fallback.fallback_used = true;
        fallback
    }
}

impl Default for Projector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

/// Free-standing form of [`Projector::project`]
pub fn project(
    state: &StateVector,
    constraints: &ConstraintSet,
    strategy: Strategy,
    max_iterations: usize,
) -> ProjectionOutcome {
    Projector::new(max_iterations).project(state, constraints, strategy)
}

#[cfg(test)]
mod tests {
    use super::{project, Projector, Strategy as Repair};
    use crate::constraints::{Constraint, ConstraintCategory, ConstraintSet, Requirement};
    use crate::state::{Dimension, StateVector};
    use proptest::prelude::*;

    fn scenario_set() -> ConstraintSet {
        ConstraintSet::new(vec![Constraint::new(
            "hub.justice",
            ConstraintCategory::Hub,
            Dimension::Justice,
            0.7,
            vec![
                Requirement::new(Dimension::Truthfulness, 0.7),
                Requirement::new(Dimension::Understanding, 0.6),
            ],
        )])
        .unwrap()
    }

    fn scenario_state() -> StateVector {
        StateVector::uniform(0.5)
            .with(Dimension::Justice, 0.9)
            .with(Dimension::Truthfulness, 0.2)
            .with(Dimension::Understanding, 0.9)
    }

    /// Balanced repair cycles here: raising patience for courage
    /// re-triggers patience, whose cheapest fix lowers patience again
    fn oscillating_set() -> ConstraintSet {
        ConstraintSet::new(vec![
            Constraint::new(
                "standard.courage",
                ConstraintCategory::Standard,
                Dimension::Courage,
                0.3,
                vec![Requirement::new(Dimension::Patience, 0.6)],
            ),
            Constraint::new(
                "standard.patience",
                ConstraintCategory::Standard,
                Dimension::Patience,
                0.5,
                vec![Requirement::new(Dimension::Wisdom, 0.9)],
            ),
        ])
        .unwrap()
    }

    fn oscillating_state() -> StateVector {
        StateVector::uniform(0.0)
            .with(Dimension::Courage, 0.9)
            .with(Dimension::Patience, 0.5)
            .with(Dimension::Wisdom, 0.1)
    }

    fn arb_state() -> impl Strategy<Value = StateVector> {
        prop::array::uniform14(0.0f64..=1.0).prop_map(StateVector::from_values)
    }

    fn arb_strategy() -> impl Strategy<Value = Repair> {
        prop::sample::select(Repair::ALL.to_vec())
    }

    #[test]
    fn test_lower_dependents_scenario() {
        let state = scenario_state();
        let out = project(&state, &scenario_set(), Repair::LowerDependents, 10);

        assert!(out.converged);
        assert!(out.state[Dimension::Justice] <= 0.7);
        for dim in Dimension::ALL.iter().filter(|d| **d != Dimension::Justice) {
            assert_eq!(out.state[*dim], state[*dim], "{dim} changed");
        }
    }

    #[test]
    fn test_raise_dependencies_scenario() {
        let out = project(&scenario_state(), &scenario_set(), Repair::RaiseDependencies, 10);
        assert!(out.converged);
        assert_eq!(out.iterations, 1);
        assert_eq!(out.state[Dimension::Truthfulness], 0.7);
        assert_eq!(out.state[Dimension::Justice], 0.9);
        assert!((out.displacement() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_raise_resolves_chained_constraints() {
        let projector = Projector::default();
        let set = ConstraintSet::default();
        let state = StateVector::uniform(0.3).with(Dimension::Unity, 0.95);

        let out = projector.project(&state, &set, Repair::RaiseDependencies);
        assert!(out.converged);
        assert!(set.is_satisfied(&out.state));
        assert!(out.state[Dimension::Justice] >= 0.6);
        assert!(out.state[Dimension::Truthfulness] >= 0.7);
    }

    #[test]
    fn test_balanced_cycle_stops_at_max_iterations() {
        let out = project(&oscillating_state(), &oscillating_set(), Repair::Balanced, 6);
        assert!(!out.converged);
        assert_eq!(out.iterations, 6);
        assert_eq!(out.remaining.len(), 1);
        assert_eq!(out.remaining[0].constraint_id, "standard.courage");
        // Back where the cycle started, one margin under the patience trigger
        assert!(out.state[Dimension::Patience] < 0.5);
        assert_eq!(out.state[Dimension::Wisdom], 0.1);
    }

    #[test]
    fn test_zero_iterations_reports_input() {
        let state = scenario_state();
        let out = project(&state, &scenario_set(), Repair::Balanced, 0);
        assert!(!out.converged);
        assert_eq!(out.state, state);
        assert_eq!(out.remaining.len(), 1);
    }

    #[test]
    fn test_fallback_recovers_from_non_convergence() {
        let state = scenario_state();
        let out = Projector::new(0).project_with_fallback(&state, &scenario_set(), Repair::Balanced);
        // Zero passes cannot converge either way; fallback is still recorded
        assert!(out.fallback_used);
        assert_eq!(out.strategy, Repair::RaiseDependencies);

        let out = Projector::new(8).project_with_fallback(&state, &scenario_set(), Repair::Balanced);
        assert!(out.converged);
        assert!(!out.fallback_used);
    }

    #[test]
    fn test_fallback_raises_out_of_a_balanced_cycle() {
        let state = oscillating_state();
        let set = oscillating_set();
        let out = Projector::new(6).project_with_fallback(&state, &set, Repair::Balanced);

        assert!(out.converged);
        assert!(out.fallback_used);
        assert_eq!(out.strategy, Repair::RaiseDependencies);
        assert_eq!(out.iterations, 2);
        assert_eq!(out.original, state);
        assert!(set.is_satisfied(&out.state));
        assert_eq!(out.state[Dimension::Patience], 0.6);
        assert_eq!(out.state[Dimension::Wisdom], 0.9);
        assert_eq!(out.state[Dimension::Courage], 0.9);
    }

    proptest! {
        #[test]
        fn prop_valid_states_are_fixed_points(s in arb_state(), st in arb_strategy()) {
            let set = ConstraintSet::default();
            let projector = Projector::default();
            let valid = projector.project(&s, &set, Repair::RaiseDependencies).state;
            prop_assume!(set.is_satisfied(&valid));
            let out = projector.project(&valid, &set, st);
            prop_assert!(out.converged);
            prop_assert_eq!(out.iterations, 0);
            prop_assert_eq!(out.state, valid);
        }

        #[test]
        fn prop_reprojection_is_stable(s in arb_state(), st in arb_strategy()) {
            let set = ConstraintSet::default();
            let projector = Projector::default();
            let first = projector.project(&s, &set, st);
            let second = projector.project(&first.state, &set, st);
            if first.converged {
                prop_assert_eq!(first.state.distance(&second.state), 0.0);
            } else {
                prop_assert!(second.iterations <= projector.max_iterations());
            }
        }

        #[test]
        fn prop_raise_never_lowers(s in arb_state()) {
            let set = ConstraintSet::default();
            let out = Projector::default().project(&s, &set, Repair::RaiseDependencies);
            for (dim, before) in s.iter() {
                prop_assert!(out.state[dim] >= before);
            }
            prop_assert!(out.converged);
        }

        #[test]
        fn prop_lower_never_raises(s in arb_state()) {
            let set = ConstraintSet::default();
            let out = Projector::default().project(&s, &set, Repair::LowerDependents);
            for (dim, before) in s.iter() {
                prop_assert!(out.state[dim] <= before);
            }
        }
    }
}
