//! The fixed set of named dimensions spanning the state space

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of dimensions in the state space
pub const DIMENSION_COUNT: usize = 14;

/// One named scalar axis of the state space
///
/// The declaration order is the canonical order used for indexing,
/// serialization and distance computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Truthfulness,
    Justice,
    Trustworthiness,
    Unity,
    Service,
    Detachment,
    Understanding,
    Respect,
    Humility,
    Courage,
    Patience,
    Compassion,
    Integrity,
    Wisdom,
}

impl Dimension {
    /// All dimensions in canonical order
    pub const ALL: [Dimension; DIMENSION_COUNT] = [
        Dimension::Truthfulness,
        Dimension::Justice,
        Dimension::Trustworthiness,
        Dimension::Unity,
        Dimension::Service,
        Dimension::Detachment,
        Dimension::Understanding,
        Dimension::Respect,
        Dimension::Humility,
        Dimension::Courage,
        Dimension::Patience,
        Dimension::Compassion,
        Dimension::Integrity,
        Dimension::Wisdom,
    ];

    /// Position in canonical order
    pub fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name used in configuration and state files
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Truthfulness => "truthfulness",
            Dimension::Justice => "justice",
            Dimension::Trustworthiness => "trustworthiness",
            Dimension::Unity => "unity",
            Dimension::Service => "service",
            Dimension::Detachment => "detachment",
            Dimension::Understanding => "understanding",
            Dimension::Respect => "respect",
            Dimension::Humility => "humility",
            Dimension::Courage => "courage",
            Dimension::Patience => "patience",
            Dimension::Compassion => "compassion",
            Dimension::Integrity => "integrity",
            Dimension::Wisdom => "wisdom",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Dimension::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == needle)
            .ok_or_else(|| ConfigError::UnknownDimension(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_matches_index() {
        for (i, dim) in Dimension::ALL.iter().enumerate() {
            assert_eq!(dim.index(), i);
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("justice".parse::<Dimension>().unwrap(), Dimension::Justice);
        assert_eq!(" Wisdom ".parse::<Dimension>().unwrap(), Dimension::Wisdom);
        assert_eq!(
            "kindness".parse::<Dimension>(),
            Err(ConfigError::UnknownDimension("kindness".into()))
        );
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for dim in Dimension::ALL {
            assert_eq!(dim.to_string().parse::<Dimension>().unwrap(), dim);
        }
    }
}
