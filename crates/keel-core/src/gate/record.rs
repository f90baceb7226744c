//! Per-agent gating state machine
//!
//! ```text
//! Normal --(blocks == warning_threshold)--> Warning
//! Normal | Warning --(blocks == max)-----> DeadLetter
//! Normal | Warning --(allowed)-----------> Normal
//! DeadLetter --(reset)-------------------> Normal
//! ```

use crate::constraints::Violation;
use crate::types::{now, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gating state of one agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    #[default]
    Normal,
    /// Advisory: close to the limit
    Warning,
    /// Terminal until an administrative reset
    DeadLetter,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateState::Normal => "normal",
            GateState::Warning => "warning",
            GateState::DeadLetter => "dead_letter",
        })
    }
}

/// Effect of one block on the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    EnteredWarning,
    EnteredDeadLetter,
}

/// Consecutive-block counter and state of one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatingRecord {
    pub consecutive_blocks: u32,
    pub total_blocks: u64,
    pub total_allowed: u64,
    pub state: GateState,
    /// Violations of the most recent block
    pub last_violations: Vec<Violation>,
    pub updated_at: Option<Timestamp>,
}

impl GatingRecord {
    pub fn is_dead_lettered(&self) -> bool {
        self.state == GateState::DeadLetter
    }

    /// Count one blocked action
    pub fn register_block(&mut self, violations: Vec<Violation>, warning_threshold: u32, max: u32) -> Transition {
        self.consecutive_blocks = self.consecutive_blocks.saturating_add(1);
        self.total_blocks += 1;
        self.last_violations = violations;
        self.updated_at = Some(now());

        if self.consecutive_blocks >= max {
            self.state = GateState::DeadLetter;
            Transition::EnteredDeadLetter
        } else if self.consecutive_blocks >= warning_threshold && self.state == GateState::Normal {
            self.state = GateState::Warning;
            Transition::EnteredWarning
        } else {
            Transition::Unchanged
        }
    }

    /// Count one allowed action, clearing the streak
    pub fn register_allow(&mut self) {
        self.consecutive_blocks = 0;
        self.total_allowed += 1;
        self.state = GateState::Normal;
        self.last_violations.clear();
        self.updated_at = Some(now());
    }

    /// Administrative reset; lifetime totals are kept
    pub fn reset(&mut self) {
        self.consecutive_blocks = 0;
        self.state = GateState::Normal;
        self.last_violations.clear();
        self.updated_at = Some(now());
    }
}
