//! StateVector - a bounded point in the 14-dimensional state space
//!
//! A `StateVector` is an immutable value: every "mutation" returns a new
//! vector. All values are kept finite and clamped to `[0.0, 1.0]`.

use super::dimension::{Dimension, DIMENSION_COUNT};
use crate::error::{ConfigError, KeelError, Result};
use itertools::Itertools;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Index;

/// A point in the state space describing an agent's current conduct
///
/// # Examples
///
/// ```
/// use keel_core::state::{Dimension, StateVector};
///
/// let state = StateVector::uniform(0.5).with(Dimension::Justice, 0.9);
/// assert_eq!(state[Dimension::Justice], 0.9);
///
/// // Values are clamped on construction
/// let clamped = state.with(Dimension::Courage, 1.7);
/// assert_eq!(clamped[Dimension::Courage], 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>")]
pub struct StateVector {
    values: [f64; DIMENSION_COUNT],
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl StateVector {
    /// Every dimension set to the same value
    pub fn uniform(value: f64) -> Self {
        Self {
            values: [clamp_unit(value); DIMENSION_COUNT],
        }
    }

    /// Build from raw values in canonical order (clamped, NaN becomes 0)
    pub fn from_values(values: [f64; DIMENSION_COUNT]) -> Self {
        Self {
            values: values.map(clamp_unit),
        }
    }

    /// Build from a complete dimension map
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if any dimension is missing.
    pub fn from_map(map: &HashMap<Dimension, f64>) -> Result<Self> {
        let mut values = [0.0; DIMENSION_COUNT];
        for dim in Dimension::ALL {
            let value = map
                .get(&dim)
                .ok_or_else(|| KeelError::InvalidState(format!("missing dimension '{dim}'")))?;
            values[dim.index()] = *value;
        }
        Ok(Self::from_values(values))
    }

    /// Build from dimension names, as found in JSON state files
    ///
    /// # Errors
    ///
    /// Returns an error on unknown names and on missing dimensions.
    pub fn try_from_named<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut map = HashMap::with_capacity(DIMENSION_COUNT);
        for (name, value) in entries {
            let dim: Dimension = name.parse()?;
            map.insert(dim, value);
        }
        Self::from_map(&map)
    }

    /// Value on one dimension
    pub fn get(&self, dim: Dimension) -> f64 {
        self.values[dim.index()]
    }

    /// Copy of this vector with one dimension replaced (clamped)
    #[must_use]
    pub fn with(&self, dim: Dimension, value: f64) -> Self {
        let mut next = *self;
        next.values[dim.index()] = clamp_unit(value);
        next
    }

    /// Raw values in canonical order
    pub fn values(&self) -> &[f64; DIMENSION_COUNT] {
        &self.values
    }

    /// (dimension, value) pairs in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, f64)> + '_ {
        Dimension::ALL.iter().map(move |d| (*d, self.get(*d)))
    }

    /// Euclidean distance to another vector
    pub fn distance(&self, other: &StateVector) -> f64 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// Dimensions whose values differ from `other`, with the signed change
    pub fn displacement(&self, other: &StateVector) -> Vec<(Dimension, f64)> {
        self.iter()
            .filter_map(|(dim, v)| {
                let delta = other.get(dim) - v;
                (delta != 0.0).then_some((dim, delta))
            })
            .collect()
    }

    /// Component-wise mean; `None` for an empty slice
    pub fn mean(points: &[StateVector]) -> Option<StateVector> {
        if points.is_empty() {
            return None;
        }
        let mut sums = [0.0; DIMENSION_COUNT];
        for point in points {
            for (sum, v) in sums.iter_mut().zip(&point.values) {
                *sum += v;
            }
        }
        let n = points.len() as f64;
        Some(Self::from_values(sums.map(|s| s / n)))
    }
}

/// Total length of a path: sum of consecutive Euclidean distances
pub fn path_length(points: &[StateVector]) -> f64 {
    points
        .iter()
        .tuple_windows()
        .map(|(a, b)| a.distance(b))
        .sum()
}

impl Default for StateVector {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

impl Index<Dimension> for StateVector {
    type Output = f64;

    fn index(&self, dim: Dimension) -> &f64 {
        &self.values[dim.index()]
    }
}

impl fmt::Display for StateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .iter()
            .map(|(d, v)| format!("{d}={v:.3}"))
            .join(", ");
        write!(f, "{{{body}}}")
    }
}

impl Serialize for StateVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(DIMENSION_COUNT))?;
        for (dim, value) in self.iter() {
            map.serialize_entry(dim.as_str(), &value)?;
        }
        map.end()
    }
}

impl TryFrom<BTreeMap<String, f64>> for StateVector {
    type Error = String;

    fn try_from(map: BTreeMap<String, f64>) -> std::result::Result<Self, Self::Error> {
        if let Some(bad) = map.values().find(|v| !v.is_finite()) {
            return Err(format!("non-finite dimension value {bad}"));
        }
        StateVector::try_from_named(map.iter().map(|(k, v)| (k.as_str(), *v))).map_err(|e| {
            match e {
                KeelError::Configuration(ConfigError::UnknownDimension(name)) => {
                    format!("unknown dimension '{name}'")
                }
                other => other.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{path_length, StateVector};
    use crate::state::{Dimension, DIMENSION_COUNT};
    use proptest::prelude::*;

    fn arb_state() -> impl Strategy<Value = StateVector> {
        prop::array::uniform14(0.0f64..=1.0).prop_map(StateVector::from_values)
    }

    #[test]
    fn test_clamping() {
        let v = StateVector::from_values([1.5; DIMENSION_COUNT]);
        assert!(v.values().iter().all(|x| *x == 1.0));

        let v = StateVector::uniform(f64::NAN);
        assert!(v.values().iter().all(|x| *x == 0.0));

        let v = StateVector::uniform(0.3).with(Dimension::Unity, -0.2);
        assert_eq!(v[Dimension::Unity], 0.0);
    }

    #[test]
    fn test_distance_single_axis() {
        let a = StateVector::uniform(0.5);
        let b = a.with(Dimension::Justice, 0.8);
        assert!((a.distance(&b) - 0.3).abs() < 1e-12);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_mean() {
        let a = StateVector::uniform(0.2);
        let b = StateVector::uniform(0.6);
        let m = StateVector::mean(&[a, b]).unwrap();
        assert!((m[Dimension::Wisdom] - 0.4).abs() < 1e-12);
        assert!(StateVector::mean(&[]).is_none());
    }

    #[test]
    fn test_path_length() {
        let a = StateVector::uniform(0.0);
        let b = a.with(Dimension::Truthfulness, 0.3);
        let c = b.with(Dimension::Justice, 0.4);
        assert!((path_length(&[a, b, c]) - 0.7).abs() < 1e-12);
        assert_eq!(path_length(&[a]), 0.0);
        assert_eq!(path_length(&[]), 0.0);
    }

    #[test]
    fn test_displacement_lists_changed_dimensions() {
        let a = StateVector::uniform(0.5);
        let b = a.with(Dimension::Courage, 0.9);
        let d = a.displacement(&b);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].0, Dimension::Courage);
        assert!((d[0].1 - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_json_state_file_shape() {
        let state = StateVector::uniform(0.5).with(Dimension::Justice, 0.9);
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["justice"], 0.9);
        assert_eq!(json.as_object().unwrap().len(), DIMENSION_COUNT);

        let back: StateVector = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_json_rejects_missing_and_unknown() {
        let mut obj = serde_json::to_value(StateVector::default()).unwrap();
        obj.as_object_mut().unwrap().remove("wisdom");
        let err = serde_json::from_value::<StateVector>(obj.clone()).unwrap_err();
        assert!(err.to_string().contains("wisdom"));

        obj.as_object_mut()
            .unwrap()
            .insert("kindness".into(), serde_json::json!(0.5));
        let err = serde_json::from_value::<StateVector>(obj).unwrap_err();
        assert!(err.to_string().contains("kindness"));
    }

    proptest! {
        #[test]
        fn prop_distance_is_symmetric(a in arb_state(), b in arb_state()) {
            prop_assert!((a.distance(&b) - b.distance(&a)).abs() < 1e-12);
        }

        #[test]
        fn prop_triangle_inequality(a in arb_state(), b in arb_state(), c in arb_state()) {
            prop_assert!(a.distance(&c) <= a.distance(&b) + b.distance(&c) + 1e-9);
        }

        #[test]
        fn prop_values_stay_in_unit_interval(raw in prop::array::uniform14(-2.0f64..3.0)) {
            let v = StateVector::from_values(raw);
            prop_assert!(v.values().iter().all(|x| (0.0..=1.0).contains(x)));
        }
    }
}
