//! Correction strategies
//!
//! Each strategy is one pure function from (working state, violation,
//! original state) to the adjusted working state.

use crate::constraints::Violation;
use crate::error::ConfigError;
use crate::state::StateVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How far below the trigger threshold `LowerDependents` moves a trigger
pub const LOWER_MARGIN: f64 = 1e-6;

/// Correction strategy selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Raise deficient requirements to exactly their threshold
    RaiseDependencies,
    /// Lower the trigger to just below its threshold
    LowerDependents,
    /// Per violation, whichever of the two moves less from the original state
    Balanced,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::RaiseDependencies,
        Strategy::LowerDependents,
        Strategy::Balanced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::RaiseDependencies => "raise_dependencies",
            Strategy::LowerDependents => "lower_dependents",
            Strategy::Balanced => "balanced",
        }
    }

    /// Apply one adjustment for one violation
    pub(crate) fn correct(
        self,
        working: &StateVector,
        violation: &Violation,
        original: &StateVector,
    ) -> StateVector {
        match self {
            Strategy::RaiseDependencies => raise(working, violation),
            Strategy::LowerDependents => lower(working, violation),
            Strategy::Balanced => {
                let raised = raise(working, violation);
                let lowered = lower(working, violation);
                // Ties keep the trigger where the agent put it
                if lowered.distance(original) < raised.distance(original) {
                    lowered
                } else {
                    raised
                }
            }
        }
    }
}

fn raise(working: &StateVector, v: &Violation) -> StateVector {
    let current = working[v.requirement];
    working.with(v.requirement, current.max(v.required))
}

fn lower(working: &StateVector, v: &Violation) -> StateVector {
    let current = working[v.trigger];
    let target = (v.trigger_threshold - LOWER_MARGIN).max(0.0);
    working.with(v.trigger, current.min(target))
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Balanced
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Strategy::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == needle)
            .ok_or_else(|| ConfigError::InvalidSetting {
                key: "projector.strategy".into(),
                reason: format!("unknown strategy '{s}'"),
            })
    }
}
