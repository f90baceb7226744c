//! SqliteBackend - SQLite WAL storage for trajectories
//!
//! - WAL mode: readers use their own connection and never wait on the writer
//! - `synchronous = FULL`: an append is on disk before it is acknowledged
//! - `seq` is the AUTOINCREMENT row id, so insertion order is stable
//! - Group commit: SQLite admits one writer, so appends go through a writer
//!   thread that commits every queued row (across agents) in one transaction

use super::backend::{Cursor, TimeRange, TrajectoryBackend, TrajectoryPoint};
use crate::error::{KeelError, Result, ResultExt};
use crate::state::StateVector;
use crate::types::{from_micros, to_micros, Timestamp};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Upper bound on rows committed in one transaction
const MAX_BATCH: usize = 512;

struct WriteRequest {
    agent_id: String,
    ts_us: i64,
    state_json: String,
    reply: mpsc::Sender<std::result::Result<i64, String>>,
}

/// SQLite store for trajectory points
#[derive(Debug)]
pub struct SqliteBackend {
    /// Write connection, owned by the writer thread between batches
    conn: Arc<Mutex<Connection>>,
    /// Separate read connection; `None` for in-memory databases
    reader: Option<Mutex<Connection>>,
    queue: Option<mpsc::Sender<WriteRequest>>,
    writer: Option<JoinHandle<()>>,
    commits: Arc<AtomicU64>,
}

impl SqliteBackend {
    /// Open (or create) the database file in WAL mode
    ///
    /// # Example
    ///
    /// ```no_run
    /// use keel_core::trajectory::SqliteBackend;
    /// let backend = SqliteBackend::open(".keel/trajectories.db").unwrap();
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Creating database directory '{}'", parent.display()))?;
            }
        }

        let writer = Connection::open(path)
            .with_context(|| format!("Opening SQLite '{}'", path.display()))?;
        configure(&writer)?;
        migrate(&writer)?;

        let reader = Connection::open(path)
            .with_context(|| format!("Opening SQLite reader '{}'", path.display()))?;
        reader
            .execute_batch("PRAGMA busy_timeout = 5000;")
            .context("Configuring SQLite reader")?;

        Self::start(writer, Some(reader))
    }

    /// Ephemeral database; reads share the single connection
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Opening in-memory SQLite")?;
        configure(&conn)?;
        migrate(&conn)?;
        Self::start(conn, None)
    }

    fn start(conn: Connection, reader: Option<Connection>) -> Result<Self> {
        let conn = Arc::new(Mutex::new(conn));
        let commits = Arc::new(AtomicU64::new(0));
        let (queue, requests) = mpsc::channel();

        let writer = {
            let conn = Arc::clone(&conn);
            let commits = Arc::clone(&commits);
            std::thread::Builder::new()
                .name("keel-sqlite-writer".into())
                .spawn(move || run_writer(&conn, &requests, &commits))?
        };

        Ok(Self {
            conn,
            reader: reader.map(Mutex::new),
            queue: Some(queue),
            writer: Some(writer),
            commits,
        })
    }

    /// Number of stored points across all agents
    pub fn count(&self) -> Result<u64> {
        let conn = self.read_conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM trajectory_points", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Transactions committed by the writer so far
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    fn read_conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        match &self.reader {
            Some(reader) => reader.lock(),
            None => self.conn.lock(),
        }
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        // Closing the queue lets the writer drain what is pending and exit
        self.queue.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                tracing::error!("SQLite writer thread panicked");
            }
        }
    }
}

fn run_writer(conn: &Mutex<Connection>, requests: &mpsc::Receiver<WriteRequest>, commits: &AtomicU64) {
    while let Ok(first) = requests.recv() {
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match requests.try_recv() {
                Ok(next) => batch.push(next),
                Err(_) => break,
            }
        }

        let mut conn = conn.lock();
        match commit_batch(&mut conn, &batch) {
            Ok(seqs) => {
                commits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Committed {} trajectory points", batch.len());
                for (request, seq) in batch.into_iter().zip(seqs) {
                    // A caller that stopped waiting has nothing to receive
                    let _ = request.reply.send(Ok(seq));
                }
            }
            Err(e) => {
                tracing::error!("Trajectory batch of {} rolled back: {}", batch.len(), e);
                let message = e.to_string();
                for request in batch {
                    let _ = request.reply.send(Err(message.clone()));
                }
            }
        }
    }
}

fn commit_batch(conn: &mut Connection, batch: &[WriteRequest]) -> rusqlite::Result<Vec<i64>> {
    let tx = conn.transaction()?;
    let mut seqs = Vec::with_capacity(batch.len());
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO trajectory_points (agent_id, ts_us, state_json) VALUES (?1, ?2, ?3)",
        )?;
        for request in batch {
            stmt.execute(params![request.agent_id, request.ts_us, request.state_json])?;
            seqs.push(tx.last_insert_rowid());
        }
    }
    tx.commit()?;
    Ok(seqs)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA busy_timeout = 5000;",
    )
    .context("Configuring SQLite WAL PRAGMAs")
}

/// Idempotent schema migration
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Append-only trajectory ledger
        CREATE TABLE IF NOT EXISTS trajectory_points (
            seq          INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id     TEXT NOT NULL,
            ts_us        INTEGER NOT NULL,
            state_json   TEXT NOT NULL
        );

        -- Range scans per agent in (timestamp, seq) order
        CREATE INDEX IF NOT EXISTS idx_trajectory_agent_ts
            ON trajectory_points(agent_id, ts_us, seq);
        ",
    )
    .context("Migrating SQLite schema")
}

fn decode_row(agent_id: String, seq: i64, ts_us: i64, state_json: String) -> Result<TrajectoryPoint> {
    let timestamp = from_micros(ts_us)
        .ok_or_else(|| KeelError::InvalidState(format!("stored timestamp {ts_us} out of range")))?;
    let state: StateVector =
        serde_json::from_str(&state_json).with_context(|| format!("Decoding stored point {seq}"))?;
    Ok(TrajectoryPoint {
        agent_id,
        timestamp,
        seq,
        state,
    })
}

impl TrajectoryBackend for SqliteBackend {
    fn append(&self, agent_id: &str, timestamp: Timestamp, state: &StateVector) -> Result<TrajectoryPoint> {
        let (reply, response) = mpsc::channel();
        let request = WriteRequest {
            agent_id: agent_id.to_string(),
            ts_us: to_micros(&timestamp),
            state_json: serde_json::to_string(state)?,
            reply,
        };

        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| KeelError::TrajectoryWrite("writer is shut down".into()))?;
        queue
            .send(request)
            .map_err(|_| KeelError::TrajectoryWrite("writer thread exited".into()))?;
        let seq = response
            .recv()
            .map_err(|_| KeelError::TrajectoryWrite("writer dropped the request".into()))?
            .map_err(KeelError::TrajectoryWrite)?;

        Ok(TrajectoryPoint {
            agent_id: agent_id.to_string(),
            timestamp,
            seq,
            state: *state,
        })
    }

    fn page(
        &self,
        agent_id: &str,
        range: &TimeRange,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<Vec<TrajectoryPoint>> {
        let (from_us, to_us) = range.micros();
        let after = after.unwrap_or(Cursor {
            timestamp_us: i64::MIN,
            seq: i64::MIN,
        });

        let conn = self.read_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT seq, ts_us, state_json FROM trajectory_points
             WHERE agent_id = ?1
               AND ts_us >= ?2 AND ts_us <= ?3
               AND (ts_us > ?4 OR (ts_us = ?4 AND seq > ?5))
             ORDER BY ts_us ASC, seq ASC
             LIMIT ?6",
        )?;

        let rows = stmt
            .query_map(
                params![agent_id, from_us, to_us, after.timestamp_us, after.seq, limit as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .context("Query trajectory_points")?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(seq, ts_us, json)| decode_row(agent_id.to_string(), seq, ts_us, json))
            .collect()
    }

    fn agents(&self) -> Result<Vec<String>> {
        let conn = self.read_conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT agent_id FROM trajectory_points ORDER BY agent_id")?;
        let agents = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(agents)
    }
}
