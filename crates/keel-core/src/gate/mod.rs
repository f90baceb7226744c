//! ActionGate - the authorization point for agent actions
//!
//! Every proposed action arrives with the state it is estimated to produce.
//! The gate validates that state within a latency budget and either
//! allows it (recording the state in the trajectory store) or blocks it
//! (counting the block and emitting an audit event). An agent blocked
//! `max_consecutive_blocks` times in a row is dead-lettered: the call that
//! crosses the limit fails with [`KeelError::SystemIntervention`] and every
//! later call fails with [`KeelError::DeadLettered`] until [`ActionGate::reset`].
//!
//! Calls for one agent are serialized by that agent's record lock; calls for
//! different agents never wait on each other.

pub mod events;
pub mod record;

pub use events::{AuditEvent, AuditEventKind, EventSink, JsonlEventSink, MemoryEventSink, TracingEventSink};
pub use record::{GateState, GatingRecord, Transition};

use crate::config::{GateSettings, KeelConfig};
use crate::constraints::{ConstraintSet, ValidationResult, Violation};
use crate::error::{KeelError, Result};
use crate::projection::{Projector, Strategy};
use crate::state::StateVector;
use crate::trajectory::TrajectoryStore;
use crate::types::{now, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Outcome when validation misses its latency budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Allow the action and record its unvalidated state
    FailOpen,
    /// Block the action
    FailClosed,
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutPolicy::FailOpen => "fail_open",
            TimeoutPolicy::FailClosed => "fail_closed",
        })
    }
}

/// Opaque action descriptor supplied by the agent runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub id: Uuid,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ProposedAction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Answer to one authorization request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingDecision {
    pub action_id: Uuid,
    pub agent_id: String,
    pub allowed: bool,
    /// Empty when allowed, and when blocked by a timeout
    pub violations: Vec<Violation>,
    /// Projected alternative the caller may re-propose
    pub corrected_state: Option<StateVector>,
    /// Whether `corrected_state` satisfies every constraint
    pub correction_converged: Option<bool>,
    pub consecutive_blocks: u32,
    pub dead_letter: bool,
    pub timed_out: bool,
    pub state: GateState,
    pub decided_at: Timestamp,
}

/// Validation seam run under the gate's latency budget
pub trait StateValidator: Send + Sync + std::fmt::Debug {
    fn validate(&self, state: &StateVector) -> ValidationResult;
}

impl StateValidator for ConstraintSet {
    fn validate(&self, state: &StateVector) -> ValidationResult {
        ConstraintSet::validate(self, state)
    }
}

/// Runtime gate with per-agent circuit breaking
#[derive(Debug)]
pub struct ActionGate {
    constraints: Arc<ConstraintSet>,
    validator: Arc<dyn StateValidator>,
    projector: Projector,
    strategy: Strategy,
    store: Arc<TrajectoryStore>,
    sink: Arc<dyn EventSink>,
    settings: GateSettings,
    records: RwLock<HashMap<String, Arc<Mutex<GatingRecord>>>>,
}

impl ActionGate {
    /// Gate validating with `constraints` and recording into `store`
    pub fn new(constraints: Arc<ConstraintSet>, store: Arc<TrajectoryStore>, settings: GateSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            validator: Arc::clone(&constraints) as Arc<dyn StateValidator>,
            constraints,
            projector: Projector::default(),
            strategy: Strategy::default(),
            store,
            sink: Arc::new(TracingEventSink),
            settings,
            records: RwLock::new(HashMap::new()),
        })
    }

    /// Gate configured from the `[gate]` and `[projector]` sections
    pub fn from_config(config: &KeelConfig, constraints: Arc<ConstraintSet>, store: Arc<TrajectoryStore>) -> Result<Self> {
        Ok(Self::new(constraints, store, config.gate)?
            .with_projector(config.projector(), config.projector.strategy))
    }

    /// Replace the validator run under the latency budget
    pub fn with_validator(mut self, validator: Arc<dyn StateValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Projector and strategy used for offered corrections
    pub fn with_projector(mut self, projector: Projector, strategy: Strategy) -> Self {
        self.projector = projector;
        self.strategy = strategy;
        self
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<TrajectoryStore> {
        &self.store
    }

    fn record_handle(&self, agent_id: &str) -> Arc<Mutex<GatingRecord>> {
        if let Some(record) = self.records.read().get(agent_id) {
            return Arc::clone(record);
        }
        Arc::clone(self.records.write().entry(agent_id.to_string()).or_default())
    }

    /// Decide whether `agent_id` may perform `action`
    ///
    /// # Errors
    ///
    /// - `SystemIntervention` when this block reaches `max_consecutive_blocks`
    /// - `DeadLettered` for any call on a dead-lettered agent
    /// - storage errors if an allowed state cannot be recorded
    pub async fn authorize(
        &self,
        agent_id: &str,
        action: &ProposedAction,
        estimated: StateVector,
    ) -> Result<GatingDecision> {
        let handle = self.record_handle(agent_id);
        let mut record = handle.lock().await;

        if record.is_dead_lettered() {
            tracing::error!(
                "Rejecting action {} ({}) from dead-lettered agent {}",
                action.id,
                action.kind,
                agent_id
            );
            self.emit(AuditEvent::new(
                agent_id,
                record.consecutive_blocks,
                AuditEventKind::Rejected {
                    action_id: action.id,
                    action_kind: action.kind.clone(),
                },
            ))
            .await;
            return Err(KeelError::DeadLettered(agent_id.to_string()));
        }

        match self.validate_within_budget(estimated).await? {
            Some(result) if result.is_valid() => {
                self.record_state(agent_id, estimated).await?;
                record.register_allow();
                tracing::info!("Allowed action {} ({}) for agent {}", action.id, action.kind, agent_id);
                Ok(self.decision(agent_id, action, &record, true, Vec::new(), false))
            }
            Some(result) => self.block(agent_id, action, estimated, result.violations, &mut record).await,
            None => self.on_timeout(agent_id, action, estimated, &mut record).await,
        }
    }

    /// `None` when the budget ran out first
    async fn validate_within_budget(&self, estimated: StateVector) -> Result<Option<ValidationResult>> {
        let validator = Arc::clone(&self.validator);
        let task = tokio::task::spawn_blocking(move || validator.validate(&estimated));

        match tokio::time::timeout(self.settings.latency_budget(), task).await {
            Ok(Ok(result)) => Ok(Some(result)),
            Ok(Err(e)) => Err(KeelError::Validator(e.to_string())),
            Err(_) => Ok(None),
        }
    }

    /// Append an accepted state on the blocking pool; SQLite appends wait for fsync
    async fn record_state(&self, agent_id: &str, state: StateVector) -> Result<()> {
        let store = Arc::clone(&self.store);
        let agent = agent_id.to_string();
        tokio::task::spawn_blocking(move || store.append(&agent, now(), &state))
            .await
            .map_err(|e| KeelError::TrajectoryWrite(e.to_string()))??;
        Ok(())
    }

    async fn block(
        &self,
        agent_id: &str,
        action: &ProposedAction,
        estimated: StateVector,
        violations: Vec<Violation>,
        record: &mut GatingRecord,
    ) -> Result<GatingDecision> {
        let transition = record.register_block(
            violations.clone(),
            self.settings.warning_threshold(),
            self.settings.max_consecutive_blocks,
        );
        let blocks = record.consecutive_blocks;

        tracing::warn!(
            "Blocked action {} ({}) for agent {}: {} violations, {} consecutive blocks",
            action.id,
            action.kind,
            agent_id,
            violations.len(),
            blocks
        );
        self.emit(AuditEvent::new(
            agent_id,
            blocks,
            AuditEventKind::Blocked {
                violations: violations.clone(),
            },
        ))
        .await;

        match transition {
            Transition::EnteredDeadLetter => {
                tracing::error!(
                    "Agent {} dead-lettered after {} consecutive blocks; operator reset required",
                    agent_id,
                    blocks
                );
                self.emit(AuditEvent::new(
                    agent_id,
                    blocks,
                    AuditEventKind::DeadLettered {
                        violations: violations.clone(),
                    },
                ))
                .await;
                return Err(KeelError::SystemIntervention {
                    agent_id: agent_id.to_string(),
                    consecutive_blocks: blocks,
                    violations,
                });
            }
            Transition::EnteredWarning => {
                tracing::warn!(
                    "Agent {} entered warning state at {} of {} consecutive blocks",
                    agent_id,
                    blocks,
                    self.settings.max_consecutive_blocks
                );
                self.emit(AuditEvent::new(agent_id, blocks, AuditEventKind::WarningEntered))
                    .await;
            }
            Transition::Unchanged => {}
        }

        let mut decision = self.decision(agent_id, action, record, false, violations, false);
        if self.settings.offer_correction {
            let outcome = self
                .projector
                .project_with_fallback(&estimated, &self.constraints, self.strategy);
            decision.corrected_state = Some(outcome.state);
            decision.correction_converged = Some(outcome.converged);
        }
        Ok(decision)
    }

    async fn on_timeout(
        &self,
        agent_id: &str,
        action: &ProposedAction,
        estimated: StateVector,
        record: &mut GatingRecord,
    ) -> Result<GatingDecision> {
        let policy = self.settings.timeout_policy;
        tracing::warn!(
            "Validation for action {} of agent {} exceeded {}ms; applying {}",
            action.id,
            agent_id,
            self.settings.latency_budget_ms,
            policy
        );
        self.emit(AuditEvent::new(
            agent_id,
            record.consecutive_blocks,
            AuditEventKind::ValidationTimedOut { policy },
        ))
        .await;

        // Fail-open is an allowed action and clears the streak; fail-closed counts nothing
        let allowed = policy == TimeoutPolicy::FailOpen;
        if allowed {
            self.record_state(agent_id, estimated).await?;
            record.register_allow();
        }
        Ok(self.decision(agent_id, action, record, allowed, Vec::new(), true))
    }

    fn decision(
        &self,
        agent_id: &str,
        action: &ProposedAction,
        record: &GatingRecord,
        allowed: bool,
        violations: Vec<Violation>,
        timed_out: bool,
    ) -> GatingDecision {
        GatingDecision {
            action_id: action.id,
            agent_id: agent_id.to_string(),
            allowed,
            violations,
            corrected_state: None,
            correction_converged: None,
            consecutive_blocks: record.consecutive_blocks,
            dead_letter: record.is_dead_lettered(),
            timed_out,
            state: record.state,
            decided_at: now(),
        }
    }

    async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.sink.emit(&event).await {
            tracing::error!("Failed to emit audit event {} for agent {}: {}", event.id, event.agent_id, e);
        }
    }

    /// Administrative reset back to `Normal`; returns the record as it was
    pub async fn reset(&self, agent_id: &str) -> GatingRecord {
        let handle = self.record_handle(agent_id);
        let mut record = handle.lock().await;
        let previous = record.clone();
        record.reset();

        tracing::info!(
            "Agent {} reset from {} after {} consecutive blocks",
            agent_id,
            previous.state,
            previous.consecutive_blocks
        );
        self.emit(AuditEvent::new(agent_id, previous.consecutive_blocks, AuditEventKind::Reset))
            .await;
        previous
    }

    /// Current record of an agent, if it has been seen
    pub async fn record(&self, agent_id: &str) -> Option<GatingRecord> {
        let handle = self.records.read().get(agent_id).cloned()?;
        let record = handle.lock().await;
        Some(record.clone())
    }

    /// Agents currently dead-lettered, sorted
    pub async fn dead_lettered(&self) -> Vec<String> {
        let handles: Vec<(String, Arc<Mutex<GatingRecord>>)> = self
            .records
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();

        let mut agents = Vec::new();
        for (id, handle) in handles {
            if handle.lock().await.is_dead_lettered() {
                agents.push(id);
            }
        }
        agents.sort();
        agents
    }
}
