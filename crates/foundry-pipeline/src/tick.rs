//! One bounded, idempotent execution step of the batch state machine.
//!
//! A tick selects eligible nodes for the current phase, runs their phase
//! bodies with bounded fan-out, applies and persists each node's outcome as
//! it resolves, and advances the phase once every node has settled. All
//! mutation of `BatchState` happens here, serially, between awaits; phase
//! bodies only see an immutable snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use foundry_core::analyzer::AnalyzerError;
use foundry_core::batch::{BatchState, Phase};
use foundry_core::config::PipelineConfig;
use foundry_core::store::{StateStore, StoreError};
use futures::stream::{self, StreamExt};
use rand::RngExt;
use tracing::{debug, info, warn};

use crate::phases::{self, NodeUpdate, PhaseContext};

/// What the coordinator should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub more_work: bool,
}

/// Run one tick against the batch. Completion flags are persisted as each
/// node resolves, so a crash never loses more than the nodes in flight.
pub async fn run_tick(state: &mut BatchState, ctx: &PhaseContext) -> TickOutcome {
    let phase = state.phase;
    if phase.is_terminal() {
        return TickOutcome { more_work: false };
    }

    if matches!(phase, Phase::Uploading | Phase::Chunking) {
        // Upstream transport and transcoding own these windows and have
        // finished by the time the queue message arrives. Traversed rather
        // than skipped so status consumers observe the full progression.
        for node in state.nodes.values_mut() {
            node.mark_completed(phase);
        }
        state.touch();
        advance_phase(state, ctx).await;
        return TickOutcome {
            more_work: !state.phase.is_terminal(),
        };
    }

    let selected = select_paths(state, phase, Utc::now(), ctx.config.max_nodes_per_tick);
    if selected.is_empty() {
        if state.phase_settled(phase) {
            advance_phase(state, ctx).await;
        } else {
            // Everything pending is waiting on children or backing off; the
            // timer brings them back.
            debug!(batch = %state.batch_id, phase = %phase, "no eligible nodes this tick");
        }
        return TickOutcome {
            more_work: !state.phase.is_terminal(),
        };
    }

    debug!(
        batch = %state.batch_id,
        phase = %phase,
        nodes = selected.len(),
        "tick selected nodes"
    );

    let snapshot = Arc::new(state.clone());
    let mut completions = stream::iter(selected.into_iter().map(|path| {
        let snapshot = Arc::clone(&snapshot);
        let ctx = ctx.clone();
        async move {
            let result = phases::execute(phase, &path, &snapshot, &ctx).await;
            (path, result)
        }
    }))
    .buffer_unordered(ctx.config.fan_out.max(1));

    while let Some((path, result)) = completions.next().await {
        match result {
            Ok(update) => apply_update(state, phase, update),
            Err(err) => record_failure(state, phase, &path, &err, &ctx.config),
        }
        state.touch();
        persist(state, ctx).await;
    }

    if state.phase_settled(phase) {
        advance_phase(state, ctx).await;
    }
    TickOutcome {
        more_work: !state.phase.is_terminal(),
    }
}

/// Eligible nodes for the phase: unsettled, past any backoff window, and for
/// bottom-up phases with every child already settled. Deepest first so
/// children drain before their parents, paths breaking ties.
fn select_paths(state: &BatchState, phase: Phase, now: DateTime<Utc>, limit: usize) -> Vec<String> {
    let mut eligible: Vec<_> = state
        .nodes
        .values()
        .filter(|node| !node.is_settled(phase))
        .filter(|node| node.next_retry_at.map_or(true, |at| at <= now))
        .filter(|node| {
            !phase.is_bottom_up()
                || node.children.iter().all(|child| {
                    state.node(child).map_or(true, |c| c.is_settled(phase))
                })
        })
        .collect();
    eligible.sort_by(|a, b| b.depth.cmp(&a.depth).then_with(|| a.path.cmp(&b.path)));
    eligible
        .into_iter()
        .take(limit)
        .map(|node| node.path.clone())
        .collect()
}

fn apply_update(state: &mut BatchState, phase: Phase, update: NodeUpdate) {
    let NodeUpdate {
        path,
        published,
        new_children,
    } = update;

    for child in new_children {
        debug!(parent = %path, child = %child.path, "attached reorganized child node");
        if let Some(parent) = state.node_mut(&path) {
            parent.children.insert(child.path.clone());
        }
        state.nodes.insert(child.path.clone(), child);
    }

    let mut root_published = None;
    if let Some(node) = state.node_mut(&path) {
        if let Some(entity) = published {
            info!(
                node = %path,
                phase = %phase,
                entity = %entity.id,
                version = entity.version,
                "published node entity"
            );
            if node.parent.is_none() {
                root_published = Some(entity.id.clone());
            }
            node.set_published(entity.id, entity.version);
        }
        node.mark_completed(phase);
    }
    if let Some(id) = root_published {
        state.root_entity = Some(id);
    }
}

fn record_failure(
    state: &mut BatchState,
    phase: Phase,
    path: &str,
    err: &anyhow::Error,
    config: &PipelineConfig,
) {
    let Some(node) = state.node_mut(path) else {
        return;
    };

    if !is_transient(err) {
        warn!(
            node = %path,
            phase = %phase,
            error = %format!("{err:#}"),
            "permanent failure, node skipped"
        );
        node.mark_failed(phase);
        return;
    }

    let delay = config.backoff_delay(node.retry_count(phase) + 1) + jitter(config.retry_jitter_ms);
    let retry_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
    let retries = node.record_retry(phase, retry_at);
    if retries > config.max_retries {
        warn!(
            node = %path,
            phase = %phase,
            retries,
            error = %format!("{err:#}"),
            "retry budget exhausted, node skipped"
        );
        node.mark_failed(phase);
    } else {
        warn!(
            node = %path,
            phase = %phase,
            retries,
            delay_ms = delay.as_millis() as u64,
            error = %format!("{err:#}"),
            "node failed, will retry"
        );
    }
}

/// Analyzer and store errors carry their own retry semantics; anything else
/// gets the retry budget.
fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(analyzer) = err.downcast_ref::<AnalyzerError>() {
        return analyzer.is_retryable();
    }
    if let Some(store) = err.downcast_ref::<StoreError>() {
        return store.is_retryable();
    }
    true
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

async fn advance_phase(state: &mut BatchState, ctx: &PhaseContext) {
    let Some(next) = state.phase.next() else {
        return;
    };
    let from = state.phase;
    state.phase = next;
    state.touch();
    info!(batch = %state.batch_id, from = %from, to = %next, "phase transition");
    persist(state, ctx).await;
}

async fn persist(state: &BatchState, ctx: &PhaseContext) {
    if let Err(err) = ctx.states.save(state).await {
        // State is cumulative; a later successful save captures the same
        // flags, and replayed nodes adopt committed work.
        warn!(batch = %state.batch_id, error = %err, "failed to persist batch state");
    }
}
