//! Human-readable output

use keel_core::constraints::{ConstraintGraph, ValidationResult};
use keel_core::discovery::{Attractor, Classification};
use keel_core::trajectory::TrajectoryPoint;
use keel_core::{ConstraintCategory, ConstraintSet, GatingDecision, ProjectionOutcome, StateVector, TrajectoryStore};

pub fn validation(state: &StateVector, result: &ValidationResult) {
    println!("STATE: {state}");
    if result.is_valid() {
        println!("VALID");
        return;
    }
    println!(
        "INVALID: {} violations across {} constraints",
        result.violations.len(),
        result.violated_constraints().len()
    );
    for v in &result.violations {
        println!(
            "  [{}] {}: {} = {:.3} > {:.3} requires {} >= {:.3}, got {:.3} (short {:.3})",
            v.category,
            v.constraint_id,
            v.trigger,
            v.observed,
            v.trigger_threshold,
            v.requirement,
            v.required,
            v.actual,
            v.deficit()
        );
    }
}

pub fn projection(outcome: &ProjectionOutcome) {
    println!(
        "STRATEGY: {}{}",
        outcome.strategy,
        if outcome.fallback_used { " (fallback)" } else { "" }
    );
    println!(
        "CONVERGED: {} after {} passes, displacement {:.4}",
        outcome.converged,
        outcome.iterations,
        outcome.displacement()
    );
    for (dim, delta) in outcome.original.displacement(&outcome.state) {
        println!("  {dim}: {:+.4}", delta);
    }
    println!("STATE: {}", outcome.state);
    if !outcome.remaining.is_empty() {
        println!("REMAINING VIOLATIONS:");
        for v in &outcome.remaining {
            println!("  {} requires {} >= {:.3}", v.constraint_id, v.requirement, v.required);
        }
    }
}

pub fn trajectory(agent: &str, points: &[TrajectoryPoint]) {
    println!("AGENT: {agent} ({} points)", points.len());
    for p in points {
        println!("  #{} {} {}", p.seq, p.timestamp.to_rfc3339(), p.state);
    }
    println!("PATH LENGTH: {:.4}", TrajectoryStore::path_length(points));
}

pub fn attractors(attractors: &[Attractor]) {
    if attractors.is_empty() {
        println!("No attractors found");
        return;
    }
    for a in attractors {
        println!(
            "#{} {} members={} density={:.3} dispersion={:.3} quality={:.3}",
            a.id,
            a.label,
            a.member_count,
            a.coupling_density,
            a.dispersion,
            a.quality()
        );
        println!("    centroid {}", a.centroid);
    }
}

pub fn classification(split: &Classification) {
    println!("HIGH {}:", split.dimension);
    attractors(&split.high);
    println!("OTHER:");
    attractors(&split.other);
}

pub fn decision(line: usize, d: &GatingDecision) {
    let verdict = match (d.allowed, d.timed_out) {
        (true, false) => "ALLOW",
        (true, true) => "ALLOW (timeout)",
        (false, false) => "BLOCK",
        (false, true) => "BLOCK (timeout)",
    };
    println!(
        "{line:>4} {verdict} state={} consecutive_blocks={}",
        d.state, d.consecutive_blocks
    );
    for v in &d.violations {
        println!("       {} requires {} >= {:.3}, got {:.3}", v.constraint_id, v.requirement, v.required, v.actual);
    }
    if let Some(corrected) = &d.corrected_state {
        println!("       suggested {corrected}");
    }
}

pub fn graph(set: &ConstraintSet, graph: &ConstraintGraph) {
    for category in ConstraintCategory::ORDER {
        println!("{category}: {} constraints", set.by_category(category).count());
    }
    println!("EDGES: {}", graph.edge_count());
    if let Some(hub) = graph.hub_candidate() {
        println!("HUB CANDIDATE: {hub}");
    }
    if let Some(foundation) = graph.foundation_candidate() {
        println!("FOUNDATION CANDIDATE: {foundation}");
    }
    println!("CYCLES: {}", graph.has_dependency_cycle());
    for role in graph.roles() {
        println!(
            "  {:<16} requires {:>2}  required by {:>2}",
            role.dimension.as_str(),
            role.requires,
            role.required_by
        );
    }
}
