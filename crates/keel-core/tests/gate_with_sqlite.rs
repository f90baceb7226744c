//! The gate over a file-backed trajectory store and a JSON lines audit log

use keel_core::gate::{AuditEventKind, JsonlEventSink};
use keel_core::{
    ActionGate, AttractorDiscoverer, ConstraintSet, Dimension, DiscoveryParams, GateSettings, KeelConfig, KeelError,
    ProposedAction, StateVector, TrajectoryStore,
};
use std::sync::Arc;
use std::time::Duration;

fn blocked_state() -> StateVector {
    StateVector::uniform(0.5)
        .with(Dimension::Justice, 0.9)
        .with(Dimension::Truthfulness, 0.2)
}

#[tokio::test]
async fn test_accepted_states_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("trajectories.db");
    let audit = dir.path().join("audit.jsonl");

    {
        let constraints = Arc::new(ConstraintSet::default());
        let store = Arc::new(TrajectoryStore::open_sqlite(&db).unwrap());
        let sink = Arc::new(JsonlEventSink::open(&audit).await.unwrap());
        let gate = ActionGate::new(
            constraints,
            store,
            GateSettings::default().with_latency_budget(Duration::from_secs(5)),
        )
        .unwrap()
        .with_event_sink(sink);

        for i in 0..5 {
            let state = StateVector::uniform(0.6).with(Dimension::Service, 0.6 + i as f64 * 0.01);
            let decision = gate.authorize("agent-7", &ProposedAction::new("reply"), state).await.unwrap();
            assert!(decision.allowed);
        }
        let decision = gate
            .authorize("agent-7", &ProposedAction::new("reply"), blocked_state())
            .await
            .unwrap();
        assert!(!decision.allowed);
    }

    let store = TrajectoryStore::open_sqlite(&db).unwrap();
    let points = store.get_trajectory("agent-7", None, None).collect_points().unwrap();
    assert_eq!(points.len(), 5);
    assert!(points.windows(2).all(|w| w[0].seq < w[1].seq));

    let attractors = AttractorDiscoverer::new(Arc::new(ConstraintSet::default()), DiscoveryParams::new(0.1, 3))
        .unwrap()
        .discover_agent(&store, "agent-7")
        .unwrap();
    assert_eq!(attractors.len(), 1);
    assert_eq!(attractors[0].member_count, 5);

    let events = JsonlEventSink::read_all(&audit).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].agent_id, "agent-7");
    assert_eq!(events[0].consecutive_blocks, 1);
    assert!(events[0].constraint_ids().contains(&"hub.justice"));
}

#[tokio::test]
async fn test_configured_gate_escalates_and_resets() {
    let config = KeelConfig::from_toml_str(
        r#"
        [gate]
        max_consecutive_blocks = 3
        latency_budget_ms = 5000
        offer_correction = false
        "#,
    )
    .unwrap();
    let constraints = Arc::new(config.constraint_set().unwrap());
    let store = Arc::new(TrajectoryStore::in_memory());
    let sink = Arc::new(keel_core::gate::MemoryEventSink::new());
    let gate = ActionGate::from_config(&config, constraints, store)
        .unwrap()
        .with_event_sink(sink.clone());

    let action = ProposedAction::new("transfer");
    assert!(gate.authorize("a", &action, blocked_state()).await.is_ok());
    let warned = gate.authorize("a", &action, blocked_state()).await.unwrap();
    assert_eq!(warned.state, keel_core::GateState::Warning);
    assert!(warned.corrected_state.is_none());

    let err = gate.authorize("a", &action, blocked_state()).await.unwrap_err();
    assert!(matches!(err, KeelError::SystemIntervention { consecutive_blocks: 3, .. }));

    // Other agents keep working while "a" waits for an operator
    assert!(gate.authorize("b", &action, StateVector::uniform(0.5)).await.unwrap().allowed);

    gate.reset("a").await;
    assert!(gate.authorize("a", &action, StateVector::uniform(0.5)).await.unwrap().allowed);

    let kinds: Vec<AuditEventKind> = sink.events().into_iter().map(|e| e.kind).collect();
    let dead_letters = kinds
        .iter()
        .filter(|k| matches!(k, AuditEventKind::DeadLettered { .. }))
        .count();
    assert_eq!(dead_letters, 1);
    assert_eq!(kinds.last(), Some(&AuditEventKind::Reset));
}
