//! Run orchestration (spec §4.9, §4.10): the Linear Runner and Auto Runner,
//! plus the artifact/diagnostics types both produce, grounded in
//! `original_source/agent/workflows/deepsearch_optimized.py`.

pub mod auto;
pub mod linear;

pub use auto::run_deepsearch;
pub use linear::LinearRunner;

use std::sync::Arc;

use serde::Serialize;

use crate::collaborators::{ArtifactWriter, ChatModel, Crawler};
use crate::config::{DeepSearchMode, Settings};
use crate::error::BudgetStopReason;
use crate::events::{EventBus, SessionId};
use crate::providers::{ProviderRegistry, SearchCache, SearchResult};
use crate::query::{FreshnessSummary, QueryCoverage};
use crate::routing::RuntimeOverrides;

/// Function-pointer clock, shared with [`crate::explorer::Clock`] so both
/// runners and the tree explorer can be driven by the same fixed-time stub
/// in tests.
pub type Clock = crate::explorer::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Linear,
    Tree,
}

/// `{query_coverage, freshness, time_sensitive, freshness_warning}` (spec §3).
#[derive(Debug, Clone, Serialize)]
pub struct QualityDiagnostics {
    pub query_coverage: QueryCoverage,
    pub freshness: FreshnessSummary,
    pub time_sensitive: bool,
    pub freshness_warning: String,
}

impl QualityDiagnostics {
    /// Literal warning token from spec §3/§8; suppressed unless the topic is
    /// time-sensitive, enough published dates are known, and the fresh-30
    /// ratio is below the configured floor.
    pub fn compute(topic: &str, queries: &[String], freshness: FreshnessSummary, settings: &Settings) -> Self {
        let time_sensitive = crate::query::is_time_sensitive_topic(topic);
        let query_coverage = crate::query::analyze_query_coverage(queries);
        let warning = if time_sensitive
            && freshness.known_count >= settings.deepsearch_freshness_warning_min_known as u64
            && freshness.fresh_30_ratio < settings.deepsearch_freshness_warning_min_ratio
        {
            "low_freshness_for_time_sensitive_query"
        } else {
            ""
        };
        QualityDiagnostics { query_coverage, freshness, time_sensitive, freshness_warning: warning.to_string() }
    }

    /// User-facing note appended to the final report when the warning fires
    /// (spec §8 scenario 4: message must mention "新鲜来源占比较低").
    pub fn warning_message(&self) -> Option<String> {
        if self.freshness_warning.is_empty() {
            return None;
        }
        Some(format!(
            "提示：该主题具有较强时效性，但新鲜来源占比较低（近30天占比 {:.0}%），建议补充最新信息来源。",
            self.freshness.fresh_30_ratio * 100.0
        ))
    }
}

/// One executed query plus the results it produced, persisted verbatim into
/// the run-artifact file (spec §6 "Run artifact file").
#[derive(Debug, Clone, Serialize)]
pub struct SearchRunRecord {
    pub query: String,
    pub provider_breakdown: std::collections::BTreeMap<String, u32>,
    pub results: Vec<SearchResult>,
}

/// `{mode, queries[], research_tree?, quality_summary, query_coverage,
/// freshness_summary}` (spec §3), extended with the run-outcome fields of
/// §7 ("is_cancelled", "is_complete", "errors", "budget_stop_reason") and
/// the persistence fields of §6 ("summaries", "search_runs", "epoch") so a
/// single value round-trips through both call sites described in the spec.
#[derive(Debug, Clone, Serialize)]
pub struct RunArtifacts {
    pub mode: RunMode,
    pub queries: Vec<String>,
    pub research_tree: Option<serde_json::Value>,
    pub quality_summary: QualityDiagnostics,
    pub query_coverage: QueryCoverage,
    pub freshness_summary: FreshnessSummary,
    pub final_report: String,
    pub summaries: Vec<String>,
    pub search_runs: Vec<SearchRunRecord>,
    pub epoch: u32,
    pub budget_stop_reason: Option<BudgetStopReason>,
    pub is_cancelled: bool,
    pub is_complete: bool,
    pub errors: Vec<String>,
    #[serde(rename = "_deepsearch_events_emitted")]
    pub deepsearch_events_emitted: bool,
}

impl RunArtifacts {
    /// `{is_cancelled:true, is_complete:true, errors:[…],
    /// final_report:"task cancelled"}` (spec §7).
    pub fn cancelled(mode: RunMode, topic: &str, settings: &Settings, reason: &str) -> Self {
        let quality_summary = QualityDiagnostics::compute(topic, &[], FreshnessSummary::empty(), settings);
        RunArtifacts {
            mode,
            queries: Vec::new(),
            research_tree: None,
            quality_summary: quality_summary.clone(),
            query_coverage: quality_summary.query_coverage.clone(),
            freshness_summary: quality_summary.freshness.clone(),
            final_report: "task cancelled".to_string(),
            summaries: Vec::new(),
            search_runs: Vec::new(),
            epoch: 0,
            budget_stop_reason: None,
            is_cancelled: true,
            is_complete: true,
            errors: vec![reason.to_string()],
            deepsearch_events_emitted: true,
        }
    }

    /// JSON payload for the run-artifact file (spec §6): `{topic, queries[],
    /// summaries[], search_runs[], final_report, epoch, mode}`.
    pub fn to_persisted_json(&self, topic: &str) -> serde_json::Value {
        serde_json::json!({
            "topic": topic,
            "queries": self.queries,
            "summaries": self.summaries,
            "search_runs": self.search_runs,
            "final_report": self.final_report,
            "epoch": self.epoch,
            "mode": match self.mode { RunMode::Linear => "linear", RunMode::Tree => "tree" },
        })
    }
}

/// What a run is researching and under which tenant/session scope (spec §2
/// "Control flow": "a request carries a topic, session id, optional
/// per-task model overrides, and configuration").
#[derive(Clone)]
pub struct RunRequest {
    pub topic: String,
    pub session_id: SessionId,
    pub settings: Arc<Settings>,
    pub overrides: RuntimeOverrides,
    /// Caller-supplied mode override, outranking `settings.deepsearch_mode`
    /// (spec §4.10 resolution precedence, level 1).
    pub mode_override: Option<DeepSearchMode>,
}

/// The host-supplied collaborators a run is wired against (spec §1 "external
/// collaborators"): model gateway per role, the provider registry/cache, and
/// the optional crawler/artifact-writer.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn ChatModel>,
    pub researcher: Arc<dyn ChatModel>,
    pub critic: Arc<dyn ChatModel>,
    pub writer: Arc<dyn ChatModel>,
    pub providers: Arc<ProviderRegistry>,
    pub profile: Vec<String>,
    pub cache: Arc<SearchCache>,
    pub crawler: Option<Arc<dyn Crawler>>,
    pub artifact_writer: Option<Arc<dyn ArtifactWriter>>,
    pub events: EventBus,
    pub clock: Clock,
}
