//! Engine configuration
//!
//! One TOML file, loaded once at process start:
//!
//! ```toml
//! [projector]
//! strategy = "balanced"
//! max_iterations = 32
//!
//! [gate]
//! latency_budget_ms = 100
//! max_consecutive_blocks = 5
//! timeout_policy = "fail_closed"
//! offer_correction = true
//!
//! [discovery]
//! eps = 0.3
//! min_samples = 3
//!
//! [storage]
//! path = ".keel/trajectories.db"
//! ```
//!
//! A missing section takes its defaults. A missing `[constraints]` section
//! means the built-in reference graph; a present one is taken literally, so
//! categories it leaves out are empty.

use crate::constraints::{ConstraintConfig, ConstraintSet};
use crate::discovery::DiscoveryParams;
use crate::error::{ConfigError, Result, ResultExt};
use crate::gate::TimeoutPolicy;
use crate::projection::{Projector, Strategy, DEFAULT_MAX_ITERATIONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub projector: ProjectorSettings,
    pub gate: GateSettings,
    pub discovery: DiscoveryParams,
    pub storage: StorageSettings,
    pub constraints: ConstraintConfig,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            projector: ProjectorSettings::default(),
            gate: GateSettings::default(),
            discovery: DiscoveryParams::default(),
            storage: StorageSettings::default(),
            constraints: ConstraintConfig::default(),
        }
    }
}

impl KeelConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and check a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Reading config '{}'", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Loading config '{}'", path.display()))
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| invalid("config", &e.to_string()))
    }

    /// Check every section; constraint errors surface here, not at request time
    pub fn validate(&self) -> Result<()> {
        self.projector.validate()?;
        self.gate.validate()?;
        self.discovery.validate()?;
        self.constraint_set().map(|_| ())
    }

    /// Build the constraint set described by `[constraints]`
    pub fn constraint_set(&self) -> Result<ConstraintSet> {
        ConstraintSet::from_config(&self.constraints)
    }

    pub fn projector(&self) -> Projector {
        Projector::new(self.projector.max_iterations)
    }

    pub fn with_constraints(mut self, constraints: ConstraintConfig) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.projector.strategy = strategy;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.projector.max_iterations = max_iterations;
        self
    }

    pub fn with_gate(mut self, gate: GateSettings) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryParams) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.path = Some(path.into());
        self
    }
}

/// `[projector]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorSettings {
    pub strategy: Strategy,
    pub max_iterations: usize,
}

impl Default for ProjectorSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl ProjectorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(invalid("projector.max_iterations", "must be at least 1"));
        }
        Ok(())
    }
}

/// `[gate]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Time allowed for one validation
    pub latency_budget_ms: u64,
    pub max_consecutive_blocks: u32,
    /// Blocks that enter Warning; defaults to one below the limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_threshold: Option<u32>,
    pub timeout_policy: TimeoutPolicy,
    /// Attach a projected alternative to blocked decisions
    pub offer_correction: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            latency_budget_ms: 100,
            max_consecutive_blocks: 5,
            warning_threshold: None,
            timeout_policy: TimeoutPolicy::FailClosed,
            offer_correction: true,
        }
    }
}

impl GateSettings {
    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }

    /// Effective warning threshold
    pub fn warning_threshold(&self) -> u32 {
        self.warning_threshold
            .unwrap_or_else(|| self.max_consecutive_blocks.saturating_sub(1))
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_consecutive_blocks(mut self, max: u32) -> Self {
        self.max_consecutive_blocks = max;
        self
    }

    pub fn with_warning_threshold(mut self, threshold: u32) -> Self {
        self.warning_threshold = Some(threshold);
        self
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub fn with_offer_correction(mut self, offer: bool) -> Self {
        self.offer_correction = offer;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.latency_budget_ms == 0 {
            return Err(invalid("gate.latency_budget_ms", "must be positive"));
        }
        if self.max_consecutive_blocks == 0 {
            return Err(invalid("gate.max_consecutive_blocks", "must be at least 1"));
        }
        if let Some(threshold) = self.warning_threshold {
            if threshold == 0 {
                return Err(invalid("gate.warning_threshold", "must be at least 1"));
            }
            if threshold >= self.max_consecutive_blocks {
                return Err(invalid(
                    "gate.warning_threshold",
                    &format!(
                        "{threshold} must be below max_consecutive_blocks ({})",
                        self.max_consecutive_blocks
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite file; `None` keeps trajectories in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Points per page during trajectory scans
    pub page_size: usize,
    /// JSON lines audit log; `None` sends audit events to tracing only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: None,
            page_size: crate::trajectory::DEFAULT_PAGE_SIZE,
            audit_log: None,
        }
    }
}

fn invalid(key: &str, reason: &str) -> crate::error::KeelError {
    ConfigError::InvalidSetting {
        key: key.into(),
        reason: reason.into(),
    }
    .into()
}
