//! Durable key-ordered storage behind the trajectory store
//!
//! A backend keeps time-ordered records per agent key. Appends must be
//! durable before returning, and page reads must come back ordered by
//! `(timestamp, seq)` ascending, `seq` being the global insertion counter.

use crate::error::Result;
use crate::state::StateVector;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// One recorded state of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub agent_id: String,
    pub timestamp: Timestamp,
    /// Insertion order, unique across the store
    pub seq: i64,
    pub state: StateVector,
}

impl TrajectoryPoint {
    /// Position of this point in scan order
    pub fn cursor(&self) -> Cursor {
        Cursor {
            timestamp_us: crate::types::to_micros(&self.timestamp),
            seq: self.seq,
        }
    }
}

/// Keyset position: scans resume strictly after this point
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub timestamp_us: i64,
    pub seq: i64,
}

/// Inclusive time bounds; `None` leaves a side open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl TimeRange {
    pub fn new(from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        Self { from, to }
    }

    /// Bounds in storage encoding
    pub(crate) fn micros(&self) -> (i64, i64) {
        (
            self.from.as_ref().map(crate::types::to_micros).unwrap_or(i64::MIN),
            self.to.as_ref().map(crate::types::to_micros).unwrap_or(i64::MAX),
        )
    }
}

/// Append-only, per-agent, time-ordered record store
pub trait TrajectoryBackend: Send + Sync + std::fmt::Debug {
    /// Durably record one state and return the stored point
    fn append(&self, agent_id: &str, timestamp: Timestamp, state: &StateVector) -> Result<TrajectoryPoint>;

    /// Up to `limit` points of `agent_id` within `range`, strictly after `after`
    fn page(
        &self,
        agent_id: &str,
        range: &TimeRange,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<Vec<TrajectoryPoint>>;

    /// Agents with at least one recorded point, sorted
    fn agents(&self) -> Result<Vec<String>>;
}
