//! TrajectoryStore - append-only per-agent history of states
//!
//! Appends for one agent are serialized by that agent's ordering lock;
//! appends for different agents share no lock above the backend. Reads go
//! straight to the backend and page lazily by `(timestamp, seq)` cursor, so a
//! scan never holds a lock across pages and never blocks a writer.
//!
//! # Example
//!
//! ```
//! use keel_core::state::StateVector;
//! use keel_core::trajectory::TrajectoryStore;
//!
//! let store = TrajectoryStore::in_memory();
//! store.append("agent-1", keel_core::types::now(), &StateVector::uniform(0.2)).unwrap();
//! store.append("agent-1", keel_core::types::now(), &StateVector::uniform(0.4)).unwrap();
//!
//! let points = store.get_trajectory("agent-1", None, None).collect_points().unwrap();
//! assert_eq!(points.len(), 2);
//! ```

pub mod backend;
pub mod memory;
pub mod sqlite;

pub use backend::{Cursor, TimeRange, TrajectoryBackend, TrajectoryPoint};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::Result;
use crate::state::{self, StateVector};
use crate::types::Timestamp;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default number of points fetched per backend page
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Per-agent, time-ordered, append-only store over a [`TrajectoryBackend`]
#[derive(Debug)]
pub struct TrajectoryStore {
    backend: Arc<dyn TrajectoryBackend>,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    page_size: usize,
}

impl TrajectoryStore {
    pub fn new(backend: Arc<dyn TrajectoryBackend>) -> Self {
        Self {
            backend,
            locks: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Store over a fresh [`MemoryBackend`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Store over a SQLite file
    pub fn open_sqlite(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteBackend::open(path)?)))
    }

    /// Points fetched per backend round trip during scans
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn agent_lock(&self, agent_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(agent_id) {
            return Arc::clone(lock);
        }
        Arc::clone(self.locks.write().entry(agent_id.to_string()).or_default())
    }

    /// Durably record `state` for `agent_id`
    ///
    /// Returns once the backend has acknowledged the write.
    pub fn append(&self, agent_id: &str, timestamp: Timestamp, state: &StateVector) -> Result<TrajectoryPoint> {
        let lock = self.agent_lock(agent_id);
        let _ordered = lock.lock();
        let point = self.backend.append(agent_id, timestamp, state)?;
        tracing::trace!("Appended point {} for agent {}", point.seq, agent_id);
        Ok(point)
    }

    /// Lazy, restartable query over one agent's points in `[from, to]`
    pub fn get_trajectory(
        &self,
        agent_id: &str,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> TrajectoryQuery {
        TrajectoryQuery {
            backend: Arc::clone(&self.backend),
            agent_id: agent_id.to_string(),
            range: TimeRange::new(from, to),
            page_size: self.page_size,
        }
    }

    /// Agents with recorded points, sorted
    pub fn agents(&self) -> Result<Vec<String>> {
        self.backend.agents()
    }

    /// States of one agent, or of every agent, as of now
    ///
    /// The population snapshot concatenates agents in sorted order.
    pub fn snapshot_states(&self, agent_id: Option<&str>) -> Result<Vec<StateVector>> {
        let agents = match agent_id {
            Some(id) => vec![id.to_string()],
            None => self.agents()?,
        };

        let mut states = Vec::new();
        for agent in &agents {
            for point in self.get_trajectory(agent, None, None).iter() {
                states.push(point?.state);
            }
        }
        Ok(states)
    }

    /// Sum of consecutive distances along a trajectory
    pub fn path_length(points: &[TrajectoryPoint]) -> f64 {
        let states: Vec<StateVector> = points.iter().map(|p| p.state).collect();
        state::path_length(&states)
    }
}

/// A range read that can be scanned any number of times
#[derive(Debug, Clone)]
pub struct TrajectoryQuery {
    backend: Arc<dyn TrajectoryBackend>,
    agent_id: String,
    range: TimeRange,
    page_size: usize,
}

impl TrajectoryQuery {
    /// Start a fresh scan from the beginning of the range
    pub fn iter(&self) -> TrajectoryIter {
        TrajectoryIter {
            query: self.clone(),
            buffer: VecDeque::new(),
            cursor: None,
            done: false,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Materialize the whole range
    pub fn collect_points(&self) -> Result<Vec<TrajectoryPoint>> {
        self.iter().collect()
    }

    /// States of the whole range, in order
    pub fn states(&self) -> Result<Vec<StateVector>> {
        self.iter().map(|p| p.map(|p| p.state)).collect()
    }

    /// Path length of the whole range
    pub fn path_length(&self) -> Result<f64> {
        Ok(state::path_length(&self.states()?))
    }
}

impl IntoIterator for &TrajectoryQuery {
    type Item = Result<TrajectoryPoint>;
    type IntoIter = TrajectoryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over a [`TrajectoryQuery`], fetching a page at a time
///
/// A backend error is yielded once and ends the scan.
#[derive(Debug)]
pub struct TrajectoryIter {
    query: TrajectoryQuery,
    buffer: VecDeque<TrajectoryPoint>,
    cursor: Option<Cursor>,
    done: bool,
}

impl Iterator for TrajectoryIter {
    type Item = Result<TrajectoryPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            let q = &self.query;
            match q.backend.page(&q.agent_id, &q.range, self.cursor, q.page_size) {
                Ok(page) => {
                    if page.len() < q.page_size {
                        self.done = true;
                    }
                    if let Some(last) = page.last() {
                        self.cursor = Some(last.cursor());
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Dimension;
    use chrono::Duration;

    fn stores() -> Vec<TrajectoryStore> {
        vec![
            TrajectoryStore::in_memory().with_page_size(2),
            TrajectoryStore::new(Arc::new(SqliteBackend::open_in_memory().unwrap())).with_page_size(2),
        ]
    }

    #[test]
    fn test_pages_through_long_trajectory() {
        for store in stores() {
            let t0 = crate::types::now();
            for i in 0..7 {
                store
                    .append("a", t0 + Duration::milliseconds(i), &StateVector::uniform(i as f64 / 10.0))
                    .unwrap();
            }
            let points = store.get_trajectory("a", None, None).collect_points().unwrap();
            assert_eq!(points.len(), 7);
            assert!(points.windows(2).all(|w| w[0].cursor() < w[1].cursor()));
        }
    }

    #[test]
    fn test_query_is_restartable_and_sees_new_appends() {
        for store in stores() {
            let t0 = crate::types::now();
            store.append("a", t0, &StateVector::uniform(0.1)).unwrap();
            let query = store.get_trajectory("a", None, None);
            assert_eq!(query.iter().count(), 1);

            store.append("a", t0 + Duration::seconds(1), &StateVector::uniform(0.2)).unwrap();
            assert_eq!(query.iter().count(), 2);
            assert_eq!(query.iter().count(), 2);
        }
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        for store in stores() {
            let t = crate::types::now();
            for v in [0.3, 0.1, 0.2] {
                store.append("a", t, &StateVector::uniform(v)).unwrap();
            }
            let order: Vec<f64> = store
                .get_trajectory("a", None, None)
                .states()
                .unwrap()
                .iter()
                .map(|s| s[Dimension::Unity])
                .collect();
            assert_eq!(order, vec![0.3, 0.1, 0.2]);
        }
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        for store in stores() {
            let t0 = crate::types::now();
            for i in 0..5 {
                store.append("a", t0 + Duration::seconds(i), &StateVector::uniform(0.5)).unwrap();
            }
            let q = store.get_trajectory("a", Some(t0 + Duration::seconds(1)), Some(t0 + Duration::seconds(3)));
            assert_eq!(q.iter().count(), 3);
            let q = store.get_trajectory("a", Some(t0 + Duration::seconds(10)), None);
            assert_eq!(q.iter().count(), 0);
        }
    }

    #[test]
    fn test_path_length_of_trajectory() {
        let store = TrajectoryStore::in_memory();
        let t0 = crate::types::now();
        let base = StateVector::uniform(0.5);
        store.append("a", t0, &base).unwrap();
        store.append("a", t0 + Duration::seconds(1), &base.with(Dimension::Courage, 0.8)).unwrap();
        store.append("a", t0 + Duration::seconds(2), &base.with(Dimension::Courage, 0.4)).unwrap();

        let query = store.get_trajectory("a", None, None);
        let len = query.path_length().unwrap();
        assert!((len - 0.7).abs() < 1e-9);
        let points = query.collect_points().unwrap();
        assert!((TrajectoryStore::path_length(&points) - len).abs() < 1e-12);
    }

    #[test]
    fn test_population_snapshot_covers_all_agents() {
        let store = TrajectoryStore::in_memory();
        let t = crate::types::now();
        store.append("b", t, &StateVector::uniform(0.2)).unwrap();
        store.append("a", t, &StateVector::uniform(0.1)).unwrap();
        store.append("a", t, &StateVector::uniform(0.3)).unwrap();

        assert_eq!(store.agents().unwrap(), vec!["a", "b"]);
        assert_eq!(store.snapshot_states(None).unwrap().len(), 3);
        assert_eq!(store.snapshot_states(Some("b")).unwrap().len(), 1);
        assert!(store.snapshot_states(Some("c")).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_appends_across_agents() {
        let store = Arc::new(TrajectoryStore::in_memory());
        let t0 = crate::types::now();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let agent = format!("agent-{n}");
                    for i in 0..50 {
                        store
                            .append(&agent, t0 + Duration::milliseconds(i), &StateVector::uniform(0.5))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for n in 0..4 {
            let points = store
                .get_trajectory(&format!("agent-{n}"), None, None)
                .collect_points()
                .unwrap();
            assert_eq!(points.len(), 50);
            assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }
    }
}
