//! Threshold-dependency rules over the state space

use crate::error::ConfigError;
use crate::state::{Dimension, StateVector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural role of a constraint within the dependency graph
///
/// The declaration order is the fixed order in which categories are
/// checked and repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintCategory {
    /// The load-bearing dimension gates many others at two tiers
    Foundation,
    /// One dimension requires a conjunction of several others
    Hub,
    /// Connects a foundation-adjacent dimension with another part of the graph
    Bridge,
    /// Ordinary pairwise trigger -> requirement edge
    Standard,
}

impl ConstraintCategory {
    /// All categories in check order
    pub const ORDER: [ConstraintCategory; 4] = [
        ConstraintCategory::Foundation,
        ConstraintCategory::Hub,
        ConstraintCategory::Bridge,
        ConstraintCategory::Standard,
    ];
}

impl fmt::Display for ConstraintCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Foundation => "foundation",
            Self::Hub => "hub",
            Self::Bridge => "bridge",
            Self::Standard => "standard",
        };
        f.write_str(name)
    }
}

/// Severity tier of a foundation constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Applies to moderately high values
    Loose,
    /// Applies to very high values
    Strict,
}

/// One `dimension >= threshold` obligation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub dimension: Dimension,
    pub threshold: f64,
}

impl Requirement {
    pub fn new(dimension: Dimension, threshold: f64) -> Self {
        Self {
            dimension,
            threshold,
        }
    }

    /// True when the state meets this requirement
    pub fn is_met(&self, state: &StateVector) -> bool {
        state[self.dimension] >= self.threshold
    }
}

/// "If `trigger` exceeds `trigger_threshold`, every requirement must hold"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Stable identifier, unique within a constraint set
    pub id: String,
    pub category: ConstraintCategory,
    pub trigger: Dimension,
    pub trigger_threshold: f64,
    pub requirements: Vec<Requirement>,
    /// Only set for foundation constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl Constraint {
    /// Create a constraint; checked when added to a [`ConstraintSet`](super::ConstraintSet)
    pub fn new(
        id: impl Into<String>,
        category: ConstraintCategory,
        trigger: Dimension,
        trigger_threshold: f64,
        requirements: Vec<Requirement>,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            trigger,
            trigger_threshold,
            requirements,
            tier: None,
        }
    }

    /// Mark this constraint with a foundation tier
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// True when the trigger fires for this state
    pub fn is_triggered(&self, state: &StateVector) -> bool {
        state[self.trigger] > self.trigger_threshold
    }

    /// Requirements left unmet by `state` (empty when not triggered)
    pub fn unmet<'a>(&'a self, state: &'a StateVector) -> impl Iterator<Item = &'a Requirement> + 'a {
        let triggered = self.is_triggered(state);
        self.requirements
            .iter()
            .filter(move |r| triggered && !r.is_met(state))
    }

    /// Structural checks performed at load time
    pub(crate) fn check(&self) -> Result<(), ConfigError> {
        check_threshold(&format!("trigger of '{}'", self.id), self.trigger_threshold)?;

        if self.requirements.is_empty() {
            return Err(ConfigError::EmptyRequirements(self.id.clone()));
        }

        for req in &self.requirements {
            check_threshold(
                &format!("requirement '{}' of '{}'", req.dimension, self.id),
                req.threshold,
            )?;
            // At or below the trigger threshold it holds whenever the constraint fires
            if req.dimension == self.trigger && req.threshold > self.trigger_threshold {
                return Err(ConfigError::SelfReference {
                    id: self.id.clone(),
                    dimension: self.trigger.to_string(),
                });
            }
        }

        Ok(())
    }
}

pub(crate) fn check_threshold(context: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange {
            context: context.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn justice_hub() -> Constraint {
        Constraint::new(
            "hub.justice",
            ConstraintCategory::Hub,
            Dimension::Justice,
            0.7,
            vec![
                Requirement::new(Dimension::Truthfulness, 0.7),
                Requirement::new(Dimension::Understanding, 0.6),
            ],
        )
    }

    #[test]
    fn test_trigger_is_strict() {
        let c = justice_hub();
        let at = StateVector::uniform(0.5).with(Dimension::Justice, 0.7);
        let above = at.with(Dimension::Justice, 0.71);
        assert!(!c.is_triggered(&at));
        assert!(c.is_triggered(&above));
    }

    #[test]
    fn test_unmet_only_when_triggered() {
        let c = justice_hub();
        let idle = StateVector::uniform(0.2);
        assert_eq!(c.unmet(&idle).count(), 0);

        let active = idle.with(Dimension::Justice, 0.9);
        let unmet: Vec<_> = c.unmet(&active).map(|r| r.dimension).collect();
        assert_eq!(unmet, vec![Dimension::Truthfulness, Dimension::Understanding]);
    }

    #[test]
    fn test_check_rejects_bad_thresholds() {
        let mut c = justice_hub();
        c.trigger_threshold = 1.2;
        assert!(matches!(c.check(), Err(ConfigError::ThresholdOutOfRange { .. })));

        let mut c = justice_hub();
        c.requirements[0].threshold = f64::NAN;
        assert!(matches!(c.check(), Err(ConfigError::ThresholdOutOfRange { .. })));
    }

    #[test]
    fn test_check_rejects_empty_and_self_reference() {
        let mut c = justice_hub();
        c.requirements.clear();
        assert_eq!(c.check(), Err(ConfigError::EmptyRequirements("hub.justice".into())));

        let mut c = justice_hub();
        c.requirements.push(Requirement::new(Dimension::Justice, 0.8));
        assert!(matches!(c.check(), Err(ConfigError::SelfReference { .. })));
    }

    #[test]
    fn test_self_requirement_up_to_trigger_threshold_is_accepted() {
        for threshold in [0.7, 0.5] {
            let mut c = justice_hub();
            c.requirements.push(Requirement::new(Dimension::Justice, threshold));
            assert_eq!(c.check(), Ok(()), "threshold {threshold}");
        }

        let mut c = justice_hub();
        c.requirements.push(Requirement::new(Dimension::Justice, 0.70001));
        assert!(c.check().is_err());
    }

    #[test]
    fn test_category_order() {
        let mut cats = vec![
            ConstraintCategory::Standard,
            ConstraintCategory::Foundation,
            ConstraintCategory::Bridge,
            ConstraintCategory::Hub,
        ];
        cats.sort();
        assert_eq!(cats, ConstraintCategory::ORDER.to_vec());
    }
}
