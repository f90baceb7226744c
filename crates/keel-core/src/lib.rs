//! Keel Core - threshold-dependency gating of agent state
//!
//! Keel checks the state an agent action is estimated to produce against a
//! web of "if X is high, Y must be high enough" constraints, and blocks or
//! repairs states that fail.
//!
//! # Architecture
//!
//! 1. **State** (`state`): the 14-dimensional [`StateVector`] and its metric
//! 2. **Constraints** (`constraints`): foundation, hub, bridge and standard rules
//! 3. **Projection** (`projection`): bounded iterative repair of invalid states
//! 4. **Trajectories** (`trajectory`): durable, append-only per-agent history
//! 5. **Discovery** (`discovery`): DBSCAN attractors over recorded history
//! 6. **Gate** (`gate`): latency-budgeted authorization with circuit breaking
//!
//! # Quick Start
//!
//! ```
//! use keel_core::{ConstraintSet, Dimension, Projector, StateVector, Strategy};
//!
//! let constraints = ConstraintSet::default();
//! let state = StateVector::uniform(0.5)
//!     .with(Dimension::Justice, 0.9)
//!     .with(Dimension::Truthfulness, 0.2);
//!
//! let result = constraints.validate(&state);
//! assert!(!result.is_valid());
//!
//! let outcome = Projector::default().project(&state, &constraints, Strategy::RaiseDependencies);
//! assert!(outcome.converged);
//! assert!(constraints.is_satisfied(&outcome.state));
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod config;
pub mod constraints;
pub mod discovery;
pub mod error;
pub mod gate;
pub mod projection;
pub mod state;
pub mod trajectory;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{GateSettings, KeelConfig, ProjectorSettings, StorageSettings};
pub use constraints::{Constraint, ConstraintCategory, ConstraintConfig, ConstraintSet, ValidationResult, Violation};
pub use discovery::{classify, Attractor, AttractorDiscoverer, AttractorLabel, Classification, DiscoveryParams};
pub use error::{ConfigError, KeelError, Result};
pub use gate::{ActionGate, GateState, GatingDecision, GatingRecord, ProposedAction, StateValidator, TimeoutPolicy};
pub use projection::{project, ProjectionOutcome, Projector, Strategy};
pub use state::{path_length, Dimension, StateVector};
pub use trajectory::{TrajectoryPoint, TrajectoryStore};
pub use types::Timestamp;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
