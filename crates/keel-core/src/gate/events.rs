//! Audit events emitted by the gate

use super::TimeoutPolicy;
use crate::constraints::Violation;
use crate::error::Result;
use crate::types::{now, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub agent_id: String,
    pub timestamp: Timestamp,
    pub consecutive_blocks: u32,
    pub kind: AuditEventKind,
}

impl AuditEvent {
    pub fn new(agent_id: impl Into<String>, consecutive_blocks: u32, kind: AuditEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            timestamp: now(),
            consecutive_blocks,
            kind,
        }
    }

    /// Ids of the constraints behind this event, in check order
    pub fn constraint_ids(&self) -> Vec<&str> {
        match &self.kind {
            AuditEventKind::Blocked { violations } | AuditEventKind::DeadLettered { violations } => {
                let mut ids: Vec<&str> = Vec::new();
                for v in violations {
                    if !ids.contains(&v.constraint_id.as_str()) {
                        ids.push(&v.constraint_id);
                    }
                }
                ids
            }
            _ => Vec::new(),
        }
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// An action was blocked
    Blocked { violations: Vec<Violation> },

    /// The agent reached the warning threshold
    WarningEntered,

    /// The agent reached the block limit
    DeadLettered { violations: Vec<Violation> },

    /// Validation missed its latency budget
    ValidationTimedOut { policy: TimeoutPolicy },

    /// A dead-lettered agent proposed an action; it was not evaluated
    Rejected { action_id: Uuid, action_kind: String },

    /// An operator reset the agent
    Reset,
}

/// Destination for audit events
#[async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    async fn emit(&self, event: &AuditEvent) -> Result<()>;
}

/// Writes events to the `keel::audit` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: &AuditEvent) -> Result<()> {
        let payload = serde_json::to_string(&event.kind)?;
        tracing::info!(
            target: "keel::audit",
            event_id = %event.id,
            agent_id = %event.agent_id,
            consecutive_blocks = event.consecutive_blocks,
            "{}",
            payload
        );
        Ok(())
    }
}

/// Keeps events in memory, for tests and inspection
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: parking_lot::Mutex<Vec<AuditEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Appends events to a JSON lines file
#[derive(Debug)]
pub struct JsonlEventSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlEventSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every event in the file
    ///
    /// Malformed lines (a write torn by a crash) are skipped with a warning
    /// naming the line number.
    pub async fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(path).await?;

        let mut events = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(
                    "Skipping malformed audit line {} in {}: {}",
                    n + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn emit(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
