//! Constraint Set - Layer 1 of Keel
//!
//! Declarative threshold-dependency rules over [`StateVector`]. A constraint
//! reads "if the trigger dimension exceeds its threshold, every requirement
//! dimension must meet its own threshold".
//!
//! # Categories
//!
//! Constraints carry one of four structural roles, checked in this order:
//!
//! 1. **Foundation**: the load-bearing dimension gates many others at a loose
//!    and a strict tier
//! 2. **Hub**: one dimension requires a conjunction of several others
//! 3. **Bridge**: connects a foundation-adjacent dimension with another region
//! 4. **Standard**: pairwise edges
//!
//! Validation never short-circuits: every violation is collected so callers
//! see the complete picture.
//!
//! # Example
//!
//! ```
//! use keel_core::constraints::{Constraint, ConstraintCategory, ConstraintSet, Requirement};
//! use keel_core::state::{Dimension, StateVector};
//!
//! let set = ConstraintSet::new(vec![Constraint::new(
//!     "hub.justice",
//!     ConstraintCategory::Hub,
//!     Dimension::Justice,
//!     0.7,
//!     vec![
//!         Requirement::new(Dimension::Truthfulness, 0.7),
//!         Requirement::new(Dimension::Understanding, 0.6),
//!     ],
//! )])
//! .unwrap();
//!
//! let state = StateVector::uniform(0.5)
//!     .with(Dimension::Justice, 0.9)
//!     .with(Dimension::Truthfulness, 0.2)
//!     .with(Dimension::Understanding, 0.9);
//!
//! let result = set.validate(&state);
//! assert!(!result.is_valid());
//! assert_eq!(result.violations.len(), 1);
//! assert_eq!(result.violations[0].requirement, Dimension::Truthfulness);
//! ```

pub mod config;
pub mod constraint;
pub mod graph;

pub use config::{ConstraintConfig, ConstraintDef, FoundationDef, RequirementDef, TierDef};
pub use constraint::{Constraint, ConstraintCategory, Requirement, Tier};
pub use graph::{ConstraintGraph, DimensionRole};

use crate::error::{ConfigError, Result};
use crate::state::{Dimension, StateVector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One unmet requirement of one triggered constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub constraint_id: String,
    pub category: ConstraintCategory,
    pub trigger: Dimension,
    /// Observed trigger value
    pub observed: f64,
    pub trigger_threshold: f64,
    pub requirement: Dimension,
    /// Threshold the requirement had to meet
    pub required: f64,
    /// Observed requirement value
    pub actual: f64,
}

impl Violation {
    /// How far the requirement falls short
    pub fn deficit(&self) -> f64 {
        self.required - self.actual
    }
}

/// Outcome of validating one state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Violations in check order
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Ids of violated constraints, deduplicated, in check order
    pub fn violated_constraints(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.violations
            .iter()
            .map(|v| v.constraint_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// Immutable, validated collection of constraints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    /// Build a set from explicit constraints
    ///
    /// Constraints are stably reordered by category so that validation and
    /// repair follow the fixed foundation, hub, bridge, standard order.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` errors for out-of-range thresholds, empty
    /// requirement lists, self references and duplicate ids.
    pub fn new(mut constraints: Vec<Constraint>) -> Result<Self> {
        let mut ids = HashSet::new();
        for c in &constraints {
            c.check()?;
            if !ids.insert(c.id.as_str()) {
                return Err(ConfigError::DuplicateId(c.id.clone()).into());
            }
        }
        constraints.sort_by_key(|c| c.category);
        Ok(Self { constraints })
    }

    /// Build a set from its declarative configuration
    pub fn from_config(config: &ConstraintConfig) -> Result<Self> {
        Self::new(config.expand()?)
    }

    /// A set with no constraints; every state is valid
    pub fn empty() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    /// Check every constraint against `state`, collecting all violations
    pub fn validate(&self, state: &StateVector) -> ValidationResult {
        let violations = self
            .constraints
            .iter()
            .flat_map(|c| {
                c.unmet(state).map(move |req| Violation {
                    constraint_id: c.id.clone(),
                    category: c.category,
                    trigger: c.trigger,
                    observed: state[c.trigger],
                    trigger_threshold: c.trigger_threshold,
                    requirement: req.dimension,
                    required: req.threshold,
                    actual: state[req.dimension],
                })
            })
            .collect();
        ValidationResult { violations }
    }

    /// Shorthand for `validate(state).is_valid()`
    pub fn is_satisfied(&self, state: &StateVector) -> bool {
        self.constraints.iter().all(|c| c.unmet(state).next().is_none())
    }

    /// Constraints in check order
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn get(&self, id: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id == id)
    }

    pub fn by_category(&self, category: ConstraintCategory) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(move |c| c.category == category)
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Dependency graph view for structural analysis
    pub fn graph(&self) -> ConstraintGraph {
        ConstraintGraph::build(self)
    }
}

impl Default for ConstraintSet {
    /// The built-in reference graph
    fn default() -> Self {
        Self::from_config(&ConstraintConfig::default())
            .expect("built-in constraint graph is well-formed")
    }
}
