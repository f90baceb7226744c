//! State space - Layer 0 of Keel
//!
//! Everything in Keel operates on points of a fixed 14-dimensional space.
//! Each [`Dimension`] is a named scalar axis bounded to `[0.0, 1.0]`, and a
//! [`StateVector`] assigns a value to every dimension.
//!
//! Distance is plain Euclidean distance over all dimensions, with no
//! per-dimension weighting.

pub mod dimension;
pub mod vector;

pub use dimension::{Dimension, DIMENSION_COUNT};
pub use vector::{path_length, StateVector};
