//! Keel CLI
//!
//! Offline validation and projection of state files, trajectory inspection,
//! batch attractor discovery and gate replays.
//!
//! # Usage
//! ```bash
//! keel validate state.json
//! keel --db .keel/trajectories.db discover --classify courage --top-fraction 0.25
//! ```

mod render;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use keel_core::discovery::classify;
use keel_core::gate::{ActionGate, EventSink, JsonlEventSink, TracingEventSink};
use keel_core::{
    AttractorDiscoverer, Dimension, KeelConfig, KeelError, ProposedAction, StateVector, Strategy,
    TrajectoryStore,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Keel - threshold-dependency gating for agent state
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration (TOML); built-in defaults when omitted
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite trajectory database, overrides [storage] path
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a JSON state file against the constraint set
    Validate {
        state: PathBuf,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Project a JSON state file onto the constraint set
    Project {
        state: PathBuf,
        /// raise_dependencies, lower_dependents or balanced
        #[arg(short, long)]
        strategy: Option<Strategy>,
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Retry with raise_dependencies when the strategy does not converge
        #[arg(long)]
        fallback: bool,
        #[arg(long)]
        json: bool,
    },

    /// Append a state to an agent's trajectory
    Append {
        agent: String,
        state: PathBuf,
        /// RFC 3339 timestamp; now when omitted
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Print an agent's trajectory
    Trajectory {
        agent: String,
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        #[arg(long)]
        json: bool,
    },

    /// Discover attractors over one agent or the whole population
    Discover {
        /// Restrict to one agent
        #[arg(short, long)]
        agent: Option<String>,
        #[arg(long)]
        eps: Option<f64>,
        #[arg(long)]
        min_samples: Option<usize>,
        /// Rank attractors on this dimension
        #[arg(long, value_name = "DIMENSION")]
        classify: Option<Dimension>,
        #[arg(long, default_value = "0.25")]
        top_fraction: f64,
        #[arg(long)]
        json: bool,
    },

    /// Run a JSON lines file of proposals through the gate
    Replay {
        agent: String,
        /// One `{"kind", "payload", "state"}` object per line
        proposals: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Show the structure of the constraint graph
    Graph {
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Deserialize)]
struct ReplayLine {
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
    state: StateVector,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => {
            tracing::debug!("Loading configuration from {}", path.display());
            KeelConfig::from_file(path)?
        }
        None => {
            tracing::debug!("No configuration file given; using built-in defaults");
            KeelConfig::default()
        }
    };
    if let Some(db) = &cli.db {
        config = config.with_storage_path(db);
    }
    let constraints = Arc::new(config.constraint_set()?);

    match cli.command {
        Commands::Validate { state, json } => {
            let state = read_state(&state)?;
            let result = constraints.validate(&state);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                render::validation(&state, &result);
            }
            if !result.is_valid() {
                return Ok(ExitCode::from(1));
            }
        }

        Commands::Project {
            state,
            strategy,
            max_iterations,
            fallback,
            json,
        } => {
            let state = read_state(&state)?;
            let strategy = strategy.unwrap_or(config.projector.strategy);
            let projector = match max_iterations {
                Some(n) => keel_core::Projector::new(n),
                None => config.projector(),
            };
            let outcome = if fallback {
                projector.project_with_fallback(&state, &constraints, strategy)
            } else {
                projector.project(&state, &constraints, strategy)
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                render::projection(&outcome);
            }
            if !outcome.converged {
                return Ok(ExitCode::from(2));
            }
        }

        Commands::Append { agent, state, at } => {
            let store = open_store(&config)?;
            let state = read_state(&state)?;
            let point = store.append(&agent, at.unwrap_or_else(Utc::now), &state)?;
            println!("Appended point {} for {} at {}", point.seq, agent, point.timestamp.to_rfc3339());
        }

        Commands::Trajectory { agent, from, to, json } => {
            let store = open_store(&config)?;
            let points = store.get_trajectory(&agent, from, to).collect_points()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else {
                render::trajectory(&agent, &points);
            }
        }

        Commands::Discover {
            agent,
            eps,
            min_samples,
            classify: dimension,
            top_fraction,
            json,
        } => {
            let store = open_store(&config)?;
            let mut params = config.discovery;
            params.eps = eps.unwrap_or(params.eps);
            params.min_samples = min_samples.unwrap_or(params.min_samples);

            let discoverer = AttractorDiscoverer::new(Arc::clone(&constraints), params)?;
            let attractors = match &agent {
                Some(agent) => discoverer.discover_agent(&store, agent)?,
                None => discoverer.discover_population(&store)?,
            };

            match dimension {
                Some(dim) => {
                    let split = classify(&attractors, dim, top_fraction);
                    if json {
                        println!("{}", serde_json::to_string_pretty(&split)?);
                    } else {
                        render::classification(&split);
                    }
                }
                None if json => println!("{}", serde_json::to_string_pretty(&attractors)?),
                None => render::attractors(&attractors),
            }
        }

        Commands::Replay { agent, proposals, json } => {
            let store = Arc::new(match &config.storage.path {
                Some(_) => open_store(&config)?,
                None => TrajectoryStore::in_memory(),
            });
            let sink: Arc<dyn EventSink> = match &config.storage.audit_log {
                Some(path) => Arc::new(JsonlEventSink::open(path).await?),
                None => Arc::new(TracingEventSink),
            };
            let gate = ActionGate::from_config(&config, Arc::clone(&constraints), store)?.with_event_sink(sink);
            return replay(&gate, &agent, &proposals, json).await;
        }

        Commands::Graph { json } => {
            let graph = constraints.graph();
            if json {
                println!("{}", serde_json::to_string_pretty(&graph.roles())?);
            } else {
                render::graph(&constraints, &graph);
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn read_state(path: &Path) -> anyhow::Result<StateVector> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading state file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing state file {}", path.display()))
}

fn open_store(config: &KeelConfig) -> anyhow::Result<TrajectoryStore> {
    let Some(path) = &config.storage.path else {
        bail!("no trajectory database configured; pass --db or set [storage] path");
    };
    Ok(TrajectoryStore::open_sqlite(path)?.with_page_size(config.storage.page_size))
}

async fn replay(gate: &ActionGate, agent: &str, proposals: &Path, json: bool) -> anyhow::Result<ExitCode> {
    let content = std::fs::read_to_string(proposals)
        .with_context(|| format!("reading proposals {}", proposals.display()))?;

    let mut allowed = 0usize;
    let mut blocked = 0usize;
    for (n, line) in content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let entry: ReplayLine =
            serde_json::from_str(line).with_context(|| format!("parsing proposal on line {}", n + 1))?;
        let action = ProposedAction::new(entry.kind).with_payload(entry.payload);

        match gate.authorize(agent, &action, entry.state).await {
            Ok(decision) => {
                if decision.allowed {
                    allowed += 1;
                } else {
                    blocked += 1;
                }
                if json {
                    println!("{}", serde_json::to_string(&decision)?);
                } else {
                    render::decision(n + 1, &decision);
                }
            }
            Err(e @ KeelError::SystemIntervention { .. }) => {
                tracing::error!("Replay for {} stopped at line {}: {}", agent, n + 1, e);
                eprintln!("line {}: {}", n + 1, e);
                eprintln!("{allowed} allowed, {} blocked before intervention", blocked + 1);
                return Ok(ExitCode::from(3));
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(
        "Replayed {} proposals for {}: {} allowed, {} blocked",
        allowed + blocked,
        agent,
        allowed,
        blocked
    );
    if !json {
        println!("{allowed} allowed, {blocked} blocked");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_discover_flags() {
        let cli = Cli::try_parse_from([
            "keel", "--db", "k.db", "discover", "--agent", "a", "--eps", "0.2", "--classify", "courage",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("k.db")));
        match cli.command {
            Commands::Discover {
                agent, eps, classify, ..
            } => {
                assert_eq!(agent.as_deref(), Some("a"));
                assert_eq!(eps, Some(0.2));
                assert_eq!(classify, Some(Dimension::Courage));
            }
            _ => panic!("expected discover"),
        }
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["keel", "project", "s.json", "--strategy", "nearest"]).is_err());
    }

    #[test]
    fn test_read_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = StateVector::uniform(0.5).with(Dimension::Wisdom, 0.8);
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(read_state(&path).unwrap(), state);

        std::fs::write(&path, r#"{"wisdom": 0.8}"#).unwrap();
        assert!(read_state(&path).is_err());
    }

    #[test]
    fn test_replay_line_defaults_payload() {
        let state = serde_json::to_value(StateVector::uniform(0.5)).unwrap();
        let line = serde_json::json!({ "kind": "reply", "state": state }).to_string();
        let entry: ReplayLine = serde_json::from_str(&line).unwrap();
        assert_eq!(entry.kind, "reply");
        assert!(entry.payload.is_null());
    }

    #[tokio::test]
    async fn test_replay_stops_at_intervention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proposals.jsonl");
        let ok = serde_json::to_value(StateVector::uniform(0.5)).unwrap();
        let bad = serde_json::to_value(
            StateVector::uniform(0.5)
                .with(Dimension::Justice, 0.9)
                .with(Dimension::Truthfulness, 0.2),
        )
        .unwrap();
        let lines: Vec<String> = [&ok, &bad, &bad, &ok]
            .iter()
            .map(|state| serde_json::json!({ "kind": "step", "state": state }).to_string())
            .collect();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let config = KeelConfig::from_toml_str("[gate]\nmax_consecutive_blocks = 2\nlatency_budget_ms = 5000\n").unwrap();
        let constraints = Arc::new(config.constraint_set().unwrap());
        let store = Arc::new(TrajectoryStore::in_memory());
        let gate = ActionGate::from_config(&config, constraints, Arc::clone(&store)).unwrap();

        assert!(replay(&gate, "agent-1", &path, true).await.is_ok());
        assert!(gate.record("agent-1").await.unwrap().is_dead_lettered());
        // The last line is never reached
        assert_eq!(store.get_trajectory("agent-1", None, None).collect_points().unwrap().len(), 1);
    }

    #[test]
    fn test_store_requires_a_path() {
        assert!(open_store(&KeelConfig::default()).is_err());
    }
}
