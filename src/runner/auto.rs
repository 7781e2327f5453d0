//! Auto Runner (spec §4.10): resolves linear vs tree mode and falls back
//! from a catastrophically-failed tree run to the linear runner, grounded in
//! `original_source/agent/workflows/deepsearch_optimized.py::run_deepsearch_auto`
//! / `_resolve_deepsearch_mode`.

use tracing::warn;

use crate::cancellation::CancellationToken;
use crate::config::DeepSearchMode;
use crate::error::DeepSearchError;
use crate::explorer::TreeExplorer;
use crate::providers::SearchStrategy;

use super::linear::LinearRunner;
use super::{Collaborators, QualityDiagnostics, RunArtifacts, RunMode, RunRequest};

/// Resolves which mode a run actually executes in (spec §4.10): the
/// request's own override outranks `settings.deepsearch_mode`, which in turn
/// outranks the boolean `settings.tree_exploration_enabled` switch.
fn resolve_mode(request: &RunRequest) -> RunMode {
    let mode = request.mode_override.unwrap_or(request.settings.deepsearch_mode);
    match mode {
        DeepSearchMode::Linear => RunMode::Linear,
        DeepSearchMode::Tree => RunMode::Tree,
        DeepSearchMode::Auto => {
            if request.settings.tree_exploration_enabled {
                RunMode::Tree
            } else {
                RunMode::Linear
            }
        }
    }
}

/// Single public entry point: resolves the run mode, drives the matching
/// runner, and falls back from a failed tree run to linear mode (spec §4.10,
/// §8 scenario 8) — except when the tree run was itself cancelled, in which
/// case the cancellation outcome is returned as-is.
pub async fn run_deepsearch(request: &RunRequest, deps: &Collaborators, token: &CancellationToken) -> RunArtifacts {
    match resolve_mode(request) {
        RunMode::Linear => LinearRunner::new(request, deps).run(token).await,
        RunMode::Tree => match run_tree(request, deps, token).await {
            Ok(artifacts) => artifacts,
            Err(DeepSearchError::Cancelled { reason, .. }) => {
                RunArtifacts::cancelled(RunMode::Tree, &request.topic, &request.settings, &reason)
            }
            Err(e) => {
                warn!(error = %e, "tree exploration failed, falling back to linear mode");
                LinearRunner::new(request, deps).run(token).await
            }
        },
    }
}

async fn run_tree(request: &RunRequest, deps: &Collaborators, token: &CancellationToken) -> Result<RunArtifacts, DeepSearchError> {
    let settings = &request.settings;
    let strategy: SearchStrategy = settings.search_strategy.into();

    let explorer = TreeExplorer::new(
        deps.planner.clone(),
        deps.researcher.clone(),
        deps.writer.clone(),
        deps.providers.clone(),
        deps.profile.clone(),
        strategy,
        settings.deepsearch_results_per_query as usize,
        settings.tree_queries_per_branch as usize,
        settings.tree_max_depth,
        settings.tree_max_branches,
        settings.tree_parallel_branches,
        deps.events.clone(),
        request.session_id.clone(),
        deps.clock,
        request.settings.clone(),
    );

    let final_report = explorer.run(&request.topic, token).await?;

    let tree = explorer.tree_snapshot().await;
    let sources = tree.all_sources();
    let all_queries: Vec<String> = tree.all_findings().into_iter().map(|f| f.query).collect();
    let tree_snapshot = serde_json::to_value(&tree).ok();

    let freshness = crate::query::summarize_freshness(
        sources.iter().map(|r| crate::query::FreshnessInput { published_date: r.published_date.as_deref() }),
    );
    let quality_summary = QualityDiagnostics::compute(&request.topic, &all_queries, freshness, settings);

    let mut final_report = final_report;
    if let Some(message) = quality_summary.warning_message() {
        final_report.push_str("\n\n");
        final_report.push_str(&message);
    }

    let artifacts = RunArtifacts {
        mode: RunMode::Tree,
        queries: all_queries,
        research_tree: tree_snapshot,
        query_coverage: quality_summary.query_coverage.clone(),
        freshness_summary: quality_summary.freshness.clone(),
        quality_summary,
        final_report,
        summaries: Vec::new(),
        search_runs: Vec::new(),
        epoch: 0,
        budget_stop_reason: None,
        is_cancelled: false,
        is_complete: true,
        errors: Vec::new(),
        deepsearch_events_emitted: true,
    };

    persist_artifacts(request, deps, &artifacts).await;
    Ok(artifacts)
}

/// Best-effort artifact persistence (spec §6 `deepsearch_save_data`), shared
/// with the linear runner's equivalent step so both modes persist the same
/// way regardless of which one an auto-resolved run ends up taking.
async fn persist_artifacts(request: &RunRequest, deps: &Collaborators, artifacts: &RunArtifacts) {
    if !request.settings.deepsearch_save_data {
        return;
    }
    let Some(writer) = &deps.artifact_writer else { return };
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let filename = crate::config::safe_filename(&request.topic, &timestamp);
    let payload = artifacts.to_persisted_json(&request.topic);
    if let Err(e) = writer.write(&filename, &payload).await {
        warn!(error = %e, filename = %filename, "failed to persist run artifact");
    }
}
