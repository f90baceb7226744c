//! Error types for Keel Core
//!
//! This module defines all error types used throughout the Keel constraint engine.
//! We use `thiserror` for ergonomic error definitions with automatic Display/Error implementations.
//!
//! Note that a constraint violation is *not* an error: it is the normal outcome of
//! validating an invalid state and is reported through
//! [`ValidationResult`](crate::constraints::ValidationResult).

use crate::constraints::Violation;
use thiserror::Error;

/// Result type alias for Keel operations
pub type Result<T> = std::result::Result<T, KeelError>;

/// Main error type for Keel operations
#[derive(Error, Debug)]
pub enum KeelError {
    /// Malformed configuration, fatal at load time
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A state could not be built from caller input
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A batch or runtime parameter is out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An agent crossed the consecutive-block limit and needs operator attention
    #[error(
        "System intervention required for agent '{agent_id}': {consecutive_blocks} consecutive blocked actions"
    )]
    SystemIntervention {
        agent_id: String,
        consecutive_blocks: u32,
        violations: Vec<Violation>,
    },

    /// The agent is dead-lettered; nothing is evaluated until an explicit reset
    #[error("Agent '{0}' is dead-lettered and awaits an administrative reset")]
    DeadLettered(String),

    /// The validation task failed before producing a result
    #[error("Validator failed: {0}")]
    Validator(String),

    /// The trajectory writer failed or went away before acknowledging an append
    #[error("Trajectory write failed: {0}")]
    TrajectoryWrite(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<KeelError>,
    },
}

/// Errors raised while loading a constraint graph or engine configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown dimension: '{0}'")]
    UnknownDimension(String),

    #[error("Threshold for {context} must be in range [0.0, 1.0], got {value}")]
    ThresholdOutOfRange { context: String, value: f64 },

    #[error("Constraint '{0}' has no requirements")]
    EmptyRequirements(String),

    #[error("Duplicate constraint id: '{0}'")]
    DuplicateId(String),

    #[error("Constraint '{id}' requires its own trigger '{dimension}' above the trigger threshold")]
    SelfReference { id: String, dimension: String },

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl KeelError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True for the escalated conditions that require an operator
    pub fn requires_operator(&self) -> bool {
        match self {
            Self::SystemIntervention { .. } | Self::DeadLettered(_) => true,
            Self::WithContext { source, .. } => source.requires_operator(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<KeelError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
