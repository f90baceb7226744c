//! In-process trajectory backend
//!
//! Nothing survives the process, so "durable" here means visible to every
//! later read. Each agent's points live behind their own lock.

use super::backend::{Cursor, TimeRange, TrajectoryBackend, TrajectoryPoint};
use crate::error::Result;
use crate::state::StateVector;
use crate::types::Timestamp;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

type AgentPoints = Arc<RwLock<Vec<TrajectoryPoint>>>;

/// HashMap-backed store for tests and ephemeral hosts
#[derive(Debug, Default)]
pub struct MemoryBackend {
    agents: RwLock<HashMap<String, AgentPoints>>,
    seq: AtomicI64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn points_for(&self, agent_id: &str) -> Option<AgentPoints> {
        self.agents.read().get(agent_id).cloned()
    }

    fn points_for_write(&self, agent_id: &str) -> AgentPoints {
        if let Some(points) = self.points_for(agent_id) {
            return points;
        }
        self.agents
            .write()
            .entry(agent_id.to_string())
            .or_default()
            .clone()
    }
}

impl TrajectoryBackend for MemoryBackend {
    fn append(&self, agent_id: &str, timestamp: Timestamp, state: &StateVector) -> Result<TrajectoryPoint> {
        let point = TrajectoryPoint {
            agent_id: agent_id.to_string(),
            timestamp,
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            state: *state,
        };

        let points = self.points_for_write(agent_id);
        let mut points = points.write();
        // Keep (timestamp, seq) order even when timestamps arrive out of order
        let key = point.cursor();
        let at = points.partition_point(|p| p.cursor() <= key);
        points.insert(at, point.clone());
        Ok(point)
    }

    fn page(
        &self,
        agent_id: &str,
        range: &TimeRange,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<Vec<TrajectoryPoint>> {
        let Some(points) = self.points_for(agent_id) else {
            return Ok(Vec::new());
        };
        let (from_us, to_us) = range.micros();
        let points = points.read();

        let start = match after {
            Some(cursor) => points.partition_point(|p| p.cursor() <= cursor),
            None => 0,
        };
        Ok(points[start..]
            .iter()
            .filter(|p| {
                let ts = p.cursor().timestamp_us;
                ts >= from_us && ts <= to_us
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn agents(&self) -> Result<Vec<String>> {
        let mut agents: Vec<String> = self
            .agents
            .read()
            .iter()
            .filter(|(_, points)| !points.read().is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        agents.sort();
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_out_of_order_timestamps_are_read_in_order() {
        let backend = MemoryBackend::new();
        let t0 = crate::types::now();
        backend.append("a", t0 + Duration::seconds(2), &StateVector::uniform(0.2)).unwrap();
        backend.append("a", t0, &StateVector::uniform(0.0)).unwrap();
        backend.append("a", t0 + Duration::seconds(1), &StateVector::uniform(0.1)).unwrap();

        let page = backend.page("a", &TimeRange::default(), None, 10).unwrap();
        let stamps: Vec<_> = page.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![t0, t0 + Duration::seconds(1), t0 + Duration::seconds(2)]);
    }

    #[test]
    fn test_unknown_agent_reads_empty() {
        let backend = MemoryBackend::new();
        assert!(backend.page("ghost", &TimeRange::default(), None, 10).unwrap().is_empty());
        assert!(backend.agents().unwrap().is_empty());
    }

    #[test]
    fn test_cursor_skips_seen_points() {
        let backend = MemoryBackend::new();
        let t0 = crate::types::now();
        let first = backend.append("a", t0, &StateVector::uniform(0.1)).unwrap();
        backend.append("a", t0, &StateVector::uniform(0.2)).unwrap();

        let rest = backend
            .page("a", &TimeRange::default(), Some(first.cursor()), 10)
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].seq > first.seq);
    }
}
