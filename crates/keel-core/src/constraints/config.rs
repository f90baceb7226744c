//! Declarative constraint configuration
//!
//! Constraints are loaded once at process start, usually from the
//! `[constraints]` section of the engine's TOML file:
//!
//! ```toml
//! [constraints.foundation]
//! dimension = "truthfulness"
//! loose = { trigger = 0.6, required = 0.5 }
//! strict = { trigger = 0.8, required = 0.7 }
//!
//! [[constraints.hub]]
//! trigger = "justice"
//! threshold = 0.7
//! requires = [
//!     { dimension = "truthfulness", threshold = 0.7 },
//!     { dimension = "understanding", threshold = 0.6 },
//! ]
//! ```
//!
//! Dimension names stay strings here so that a typo surfaces as a
//! [`ConfigError::UnknownDimension`] instead of an opaque parse error.

use super::constraint::{Constraint, ConstraintCategory, Requirement, Tier};
use crate::error::{ConfigError, Result};
use crate::state::Dimension;
use serde::{Deserialize, Serialize};

/// `{ trigger, required }` pair of one foundation tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierDef {
    /// Gated dimensions above this value engage the tier
    pub trigger: f64,
    /// Minimum foundation value while the tier is engaged
    pub required: f64,
}

/// The load-bearing dimension and the dimensions it gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundationDef {
    pub dimension: String,
    /// Gated dimensions; empty means every other dimension
    #[serde(default)]
    pub gated: Vec<String>,
    pub loose: TierDef,
    pub strict: TierDef,
}

/// `{ dimension, threshold }` entry of a `requires` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementDef {
    pub dimension: String,
    pub threshold: f64,
}

/// Explicit trigger -> requirements rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Defaults to `<category>.<trigger>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub trigger: String,
    pub threshold: f64,
    pub requires: Vec<RequirementDef>,
}

impl ConstraintDef {
    fn new(trigger: Dimension, threshold: f64, requires: &[(Dimension, f64)]) -> Self {
        Self {
            id: None,
            trigger: trigger.to_string(),
            threshold,
            requires: requires
                .iter()
                .map(|(d, t)| RequirementDef {
                    dimension: d.to_string(),
                    threshold: *t,
                })
                .collect(),
        }
    }

    fn resolve(&self, category: ConstraintCategory) -> Result<Constraint> {
        let trigger: Dimension = self.trigger.parse()?;
        let requirements = self
            .requires
            .iter()
            .map(|r| Ok(Requirement::new(r.dimension.parse()?, r.threshold)))
            .collect::<Result<Vec<_>>>()?;
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| format!("{category}.{trigger}"));
        Ok(Constraint::new(id, category, trigger, self.threshold, requirements))
    }
}

/// Complete constraint graph definition, grouped by category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foundation: Option<FoundationDef>,
    #[serde(default)]
    pub hub: Vec<ConstraintDef>,
    #[serde(default)]
    pub bridge: Vec<ConstraintDef>,
    #[serde(default)]
    pub standard: Vec<ConstraintDef>,
}

impl ConstraintConfig {
    /// A configuration with no constraints at all
    pub fn empty() -> Self {
        Self {
            foundation: None,
            hub: Vec::new(),
            bridge: Vec::new(),
            standard: Vec::new(),
        }
    }

    /// Expand into concrete constraints, resolving dimension names
    ///
    /// The foundation expands to one loose and one strict constraint per
    /// gated dimension, ids `foundation.loose.<dim>` / `foundation.strict.<dim>`.
    pub fn expand(&self) -> Result<Vec<Constraint>> {
        let mut out = Vec::new();

        if let Some(foundation) = &self.foundation {
            let base: Dimension = foundation.dimension.parse()?;
            let gated: Vec<Dimension> = if foundation.gated.is_empty() {
                Dimension::ALL.iter().copied().filter(|d| *d != base).collect()
            } else {
                foundation
                    .gated
                    .iter()
                    .map(|name| name.parse::<Dimension>())
                    .collect::<std::result::Result<Vec<_>, ConfigError>>()?
            };

            for (tier, def) in [(Tier::Loose, foundation.loose), (Tier::Strict, foundation.strict)] {
                let label = match tier {
                    Tier::Loose => "loose",
                    Tier::Strict => "strict",
                };
                for dim in &gated {
                    out.push(
                        Constraint::new(
                            format!("foundation.{label}.{dim}"),
                            ConstraintCategory::Foundation,
                            *dim,
                            def.trigger,
                            vec![Requirement::new(base, def.required)],
                        )
                        .with_tier(tier),
                    );
                }
            }
        }

        for (category, defs) in [
            (ConstraintCategory::Hub, &self.hub),
            (ConstraintCategory::Bridge, &self.bridge),
            (ConstraintCategory::Standard, &self.standard),
        ] {
            for def in defs {
                out.push(def.resolve(category)?);
            }
        }

        Ok(out)
    }
}

impl Default for ConstraintConfig {
    /// Reference graph: truthfulness is the foundation, justice the hub,
    /// unity and service are bridges.
    fn default() -> Self {
        use Dimension::*;

        Self {
            foundation: Some(FoundationDef {
                dimension: Truthfulness.to_string(),
                gated: Vec::new(),
                loose: TierDef {
                    trigger: 0.6,
                    required: 0.5,
                },
                strict: TierDef {
                    trigger: 0.8,
                    required: 0.7,
                },
            }),
            hub: vec![ConstraintDef::new(
                Justice,
                0.7,
                &[
                    (Truthfulness, 0.7),
                    (Understanding, 0.6),
                    (Trustworthiness, 0.6),
                    (Respect, 0.5),
                ],
            )],
            bridge: vec![
                ConstraintDef::new(Unity, 0.7, &[(Justice, 0.6), (Compassion, 0.6)]),
                ConstraintDef::new(Service, 0.7, &[(Trustworthiness, 0.6), (Humility, 0.5)]),
            ],
            standard: vec![
                ConstraintDef::new(Courage, 0.7, &[(Wisdom, 0.5)]),
                ConstraintDef::new(Detachment, 0.7, &[(Humility, 0.5)]),
                ConstraintDef::new(Compassion, 0.7, &[(Understanding, 0.5)]),
                ConstraintDef::new(Wisdom, 0.7, &[(Understanding, 0.6)]),
                ConstraintDef::new(Respect, 0.7, &[(Humility, 0.5)]),
                ConstraintDef::new(Patience, 0.7, &[(Detachment, 0.4)]),
                ConstraintDef::new(Integrity, 0.7, &[(Trustworthiness, 0.6)]),
            ],
        }
    }
}
