//! Linear Runner (spec §4.9): a multi-epoch loop of query generation,
//! search, URL selection, optional crawl hydration, summarization, and gap
//! analysis, grounded in
//! `original_source/agent/workflows/deepsearch_optimized.py::run_deepsearch_optimized`.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::cancellation::{estimate_tokens, BudgetGuard, CancellationToken};
use crate::error::DeepSearchError;
use crate::events::EventKind;
use crate::gap::KnowledgeGapAnalyzer;
use crate::providers::{canonical_url_key, SearchResult, SearchStrategy};
use crate::query;
use crate::routing::TaskType;

use super::{Collaborators, QualityDiagnostics, RunArtifacts, RunMode, RunRequest, SearchRunRecord};

/// Default knowledge-gap sufficiency threshold (spec §4.6: "default 0.8").
/// Not itself a `Settings` field — spec.md doesn't list one in §6 — so it is
/// a named constant here rather than invented configuration.
const GAP_COVERAGE_THRESHOLD: f64 = 0.8;

/// `"回答.*yes"` over the whole response, case-insensitive, dot matches
/// newline (spec §4.9 step 7).
static ENOUGH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)回答.*yes").unwrap());

fn parse_enough(response: &str) -> bool {
    ENOUGH_RE.is_match(response)
}

/// Text after the first `"总结"` marker, trimmed, or the whole response when
/// the marker is absent (spec §4.9 step 7).
fn extract_summary_text(response: &str) -> String {
    match response.find("总结") {
        Some(idx) => response[idx + "总结".len()..].trim_start_matches([':', '：', '\n', ' ']).trim().to_string(),
        None => response.trim().to_string(),
    }
}

struct EpochOutcome {
    combined_results: Vec<SearchResult>,
}

/// Drives one linear-mode run for a single topic (spec §4.9).
pub struct LinearRunner<'a> {
    request: &'a RunRequest,
    deps: &'a Collaborators,
    strategy: SearchStrategy,
}

impl<'a> LinearRunner<'a> {
    pub fn new(request: &'a RunRequest, deps: &'a Collaborators) -> Self {
        LinearRunner { request, deps, strategy: deps_strategy(request) }
    }

    /// Runs the full epoch loop and returns a best-effort artifact even when
    /// cancellation or a budget stop cuts the run short (spec §7
    /// "user-visible behavior").
    #[instrument(skip(self, token), fields(topic = %self.request.topic, session = %self.request.session_id))]
    pub async fn run(&self, token: &CancellationToken) -> RunArtifacts {
        match self.run_inner(token).await {
            Ok(artifacts) => artifacts,
            Err(DeepSearchError::Cancelled { reason, .. }) => {
                self.deps.events.emit(&self.request.session_id, EventKind::Done, serde_json::json!({"reason": "cancelled"})).await;
                RunArtifacts::cancelled(RunMode::Linear, &self.request.topic, &self.request.settings, &reason)
            }
            Err(other) => {
                warn!(error = %other, "linear runner aborted unexpectedly");
                let mut artifacts =
                    RunArtifacts::cancelled(RunMode::Linear, &self.request.topic, &self.request.settings, &other.to_string());
                artifacts.is_cancelled = false;
                artifacts.final_report = "No sufficient information was found for this topic.".to_string();
                artifacts
            }
        }
    }

    async fn run_inner(&self, token: &CancellationToken) -> Result<RunArtifacts, DeepSearchError> {
        let settings = &self.request.settings;
        let budget = BudgetGuard::new(settings.deepsearch_max_seconds, settings.deepsearch_max_tokens);
        let mut analyzer = KnowledgeGapAnalyzer::new(GAP_COVERAGE_THRESHOLD);

        let mut all_queries: Vec<String> = Vec::new();
        let mut all_results: Vec<SearchResult> = Vec::new();
        let mut search_runs: Vec<SearchRunRecord> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut selected_urls: HashSet<String> = HashSet::new();
        let mut searched_urls: HashSet<String> = HashSet::new();
        let mut missing_topics: Vec<String> = Vec::new();
        let mut enough = false;
        let mut budget_stop_reason = None;
        let mut final_epoch = 0u32;

        for epoch in 0..settings.deepsearch_max_epochs {
            final_epoch = epoch;
            token.check("epoch_start").await?;

            if let Some(reason) = budget.check() {
                budget_stop_reason = Some(reason);
                break;
            }

            let queries = self.generate_queries(epoch, &missing_topics, &budget, token).await?;
            for q in &queries {
                budget.add_tokens(estimate_tokens(q));
            }
            all_queries.extend(queries.iter().cloned());

            if let Some(reason) = budget.check() {
                budget_stop_reason = Some(reason);
                break;
            }

            let outcome = self.run_searches(epoch, &queries, token, &budget, &mut search_runs, &mut searched_urls).await?;
            if let Some(reason) = budget.check() {
                // a mid-loop stop still keeps whatever this epoch already searched
                budget_stop_reason = Some(reason);
            }

            if outcome.combined_results.is_empty() {
                self.emit_empty_epoch(epoch).await;
                if budget_stop_reason.is_some() {
                    break;
                }
                continue;
            }
            all_results.extend(outcome.combined_results.clone());

            let chosen = self
                .select_urls(&outcome.combined_results, &mut selected_urls, token)
                .await?;
            let hydrated = self.hydrate(chosen, token).await?;

            let summary_response = self.summarize(&hydrated, token).await?;
            budget.add_tokens(estimate_tokens(&summary_response));
            enough = parse_enough(&summary_response);
            notes.push(extract_summary_text(&summary_response));

            let is_last_epoch = epoch + 1 >= settings.deepsearch_max_epochs;
            if !enough && settings.deepsearch_use_gap_analysis && !is_last_epoch {
                let knowledge = notes.join("\n");
                match analyzer.analyze(self.deps.critic.as_ref(), &self.request.topic, &all_queries, &knowledge).await {
                    Ok(gap) => {
                        missing_topics = gap.high_priority_aspects();
                        if analyzer.is_sufficient(&gap) {
                            enough = true;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "gap analysis call failed, continuing without a refined hint");
                    }
                }
            }

            self.emit_quality_and_complete(epoch, &all_queries, &all_results, &notes, &hydrated).await;

            if enough || budget_stop_reason.is_some() {
                break;
            }
        }

        let quality_summary =
            QualityDiagnostics::compute(&self.request.topic, &all_queries, query::summarize_freshness(freshness_inputs(&all_results)), settings);

        let mut final_report = if budget_stop_reason.is_none() && !notes.is_empty() {
            self.write_report(&notes, token).await.unwrap_or_else(|_| notes.join("\n\n"))
        } else if !notes.is_empty() {
            notes.join("\n\n")
        } else {
            "No sufficient information was found for this topic.".to_string()
        };
        if let Some(message) = quality_summary.warning_message() {
            final_report.push_str("\n\n");
            final_report.push_str(&message);
        }

        let artifacts = RunArtifacts {
            mode: RunMode::Linear,
            queries: all_queries,
            research_tree: None,
            query_coverage: quality_summary.query_coverage.clone(),
            freshness_summary: quality_summary.freshness.clone(),
            quality_summary,
            final_report,
            summaries: notes,
            search_runs,
            epoch: final_epoch,
            budget_stop_reason,
            is_cancelled: false,
            is_complete: true,
            errors: Vec::new(),
            deepsearch_events_emitted: true,
        };

        self.persist_artifacts(&artifacts).await;
        Ok(artifacts)
    }

    /// Best-effort artifact persistence (spec §6 `deepsearch_save_data`):
    /// writer failures are logged, never surfaced as a run error.
    async fn persist_artifacts(&self, artifacts: &RunArtifacts) {
        if !self.request.settings.deepsearch_save_data {
            return;
        }
        let Some(writer) = &self.deps.artifact_writer else { return };
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let filename = crate::config::safe_filename(&self.request.topic, &timestamp);
        let payload = artifacts.to_persisted_json(&self.request.topic);
        if let Err(e) = writer.write(&filename, &payload).await {
            warn!(error = %e, filename = %filename, "failed to persist run artifact");
        }
    }

    async fn generate_queries(
        &self,
        epoch: u32,
        missing_topics: &[String],
        _budget: &BudgetGuard,
        token: &CancellationToken,
    ) -> Result<Vec<String>, DeepSearchError> {
        let hint = if missing_topics.is_empty() {
            String::new()
        } else {
            format!("\nPrioritize these under-covered aspects: {}", missing_topics.join(", "))
        };
        let prompt = format!(
            "Generate up to {n} diverse, non-overlapping search queries for researching: {topic}{hint}",
            n = self.request.settings.deepsearch_query_num,
            topic = self.request.topic,
            hint = hint
        );
        token.check("before_generate_queries").await?;
        let raw = self.deps.planner.complete(TaskType::QueryGen, &prompt).await.map_err(DeepSearchError::from)?;
        token.check("after_generate_queries").await?;
        let mut queries = query::parsing::parse_list(&raw);

        if epoch == 0 && !queries.iter().any(|q| q.eq_ignore_ascii_case(&self.request.topic)) {
            queries.insert(0, self.request.topic.clone());
        }
        queries.truncate(self.request.settings.deepsearch_query_num as usize);
        Ok(queries)
    }

    async fn run_searches(
        &self,
        epoch: u32,
        queries: &[String],
        token: &CancellationToken,
        budget: &BudgetGuard,
        search_runs: &mut Vec<SearchRunRecord>,
        searched_urls: &mut HashSet<String>,
    ) -> Result<EpochOutcome, DeepSearchError> {
        let mut combined_results = Vec::new();

        for query_text in queries {
            token.check("per_query_search").await?;
            if let Some(_reason) = budget.check() {
                break;
            }

            let results = self.search_query(query_text).await;
            token.check("after_query_search").await?;
            let mut provider_breakdown: BTreeMap<String, u32> = BTreeMap::new();
            for r in &results {
                *provider_breakdown.entry(r.provider.clone()).or_insert(0) += 1;
                searched_urls.insert(canonical_url_key(&r.url));
                budget.add_tokens(estimate_tokens(&format!("{} {}", r.title, truncated_excerpt(r))));
            }

            self.emit_search_event(epoch, query_text, &results, &provider_breakdown).await;

            search_runs.push(SearchRunRecord { query: query_text.clone(), provider_breakdown, results: results.clone() });
            combined_results.extend(results);
        }

        Ok(EpochOutcome { combined_results })
    }

    /// One query's results, served from cache when present; a last-chance
    /// direct Tavily call is attempted when the orchestrator returns nothing
    /// and Tavily is registered and available (spec §4.3).
    async fn search_query(&self, query_text: &str) -> Vec<SearchResult> {
        let results_per_query = self.request.settings.deepsearch_results_per_query as usize;
        if let Some(cached) = self.deps.cache.get(self.strategy, results_per_query, &self.deps.profile, query_text) {
            return cached;
        }

        let (_used, mut results) =
            self.deps.providers.search(query_text, results_per_query, &self.deps.profile, self.strategy).await;

        if results.is_empty() {
            if let Some(tavily) = self.deps.providers.get("tavily") {
                if tavily.is_available() {
                    if let Ok(fallback) = tavily.search(query_text, results_per_query).await {
                        results = fallback;
                    }
                }
            }
        }

        self.deps.cache.put(self.strategy, results_per_query, &self.deps.profile, query_text, results.clone());
        results
    }

    async fn emit_search_event(&self, epoch: u32, query_text: &str, results: &[SearchResult], provider_breakdown: &BTreeMap<String, u32>) {
        let limit = self.request.settings.deepsearch_event_results_limit;
        let provider_label = match provider_breakdown.len() {
            0 => "unknown".to_string(),
            1 => provider_breakdown.keys().next().unwrap().clone(),
            _ => "multi".to_string(),
        };
        let previews: Vec<_> = results
            .iter()
            .take(limit)
            .map(|r| serde_json::json!({"title": r.title, "url": r.url, "score": r.score, "provider": r.provider}))
            .collect();

        self.deps
            .events
            .emit(
                &self.request.session_id,
                EventKind::Search,
                serde_json::json!({
                    "query": query_text,
                    "provider": provider_label,
                    "provider_breakdown": provider_breakdown,
                    "results": previews,
                    "count": results.len(),
                    "epoch": epoch,
                    "mode": "linear",
                }),
            )
            .await;
    }

    async fn emit_empty_epoch(&self, epoch: u32) {
        self.deps
            .events
            .emit(
                &self.request.session_id,
                EventKind::QualityUpdate,
                serde_json::json!({"epoch": epoch, "stage": "epoch_complete", "query_coverage_score": 0.0}),
            )
            .await;
        self.deps
            .events
            .emit(
                &self.request.session_id,
                EventKind::ResearchNodeComplete,
                serde_json::json!({"node_id": format!("epoch-{epoch}"), "summary": "", "sources": [], "quality": {}, "epoch": epoch}),
            )
            .await;
    }

    /// Critic picks URLs to read in depth, excluding the already-selected
    /// set; falls back to the top-scored results when the critic returns
    /// nothing usable (spec §4.9 step 5).
    async fn select_urls(
        &self,
        results: &[SearchResult],
        selected_urls: &mut HashSet<String>,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>, DeepSearchError> {
        let candidates: Vec<&SearchResult> =
            results.iter().filter(|r| !selected_urls.contains(&canonical_url_key(&r.url))).collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, r)| format!("[{}] {} — {}", i + 1, r.title, r.url))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "From the following candidate sources for '{}', choose the most relevant URLs. Respond with a JSON array of URLs.\n{}",
            self.request.topic, listing
        );

        token.check("before_select_urls").await?;
        let chosen_urls: Vec<String> = match self.deps.critic.complete(TaskType::Critique, &prompt).await {
            Ok(response) => query::parsing::parse_list(&response),
            Err(_) => Vec::new(),
        };
        token.check("after_select_urls").await?;

        let mut chosen: Vec<SearchResult> = if chosen_urls.is_empty() {
            let mut sorted: Vec<&SearchResult> = candidates.clone();
            sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            sorted.into_iter().take(5).cloned().collect()
        } else {
            let wanted: HashSet<String> = chosen_urls.iter().map(|u| canonical_url_key(u)).collect();
            candidates.iter().filter(|r| wanted.contains(&canonical_url_key(&r.url))).map(|r| (*r).clone()).collect()
        };

        if chosen.is_empty() {
            let mut sorted: Vec<&SearchResult> = candidates.clone();
            sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            chosen = sorted.into_iter().take(5).cloned().collect();
        }

        for r in &chosen {
            selected_urls.insert(canonical_url_key(&r.url));
        }
        Ok(chosen)
    }

    /// Crawls chosen results whose body is under 200 chars when a crawler is
    /// wired up and enabled (spec §4.9 step 6).
    async fn hydrate(&self, chosen: Vec<SearchResult>, token: &CancellationToken) -> Result<Vec<SearchResult>, DeepSearchError> {
        if !self.request.settings.deepsearch_enable_crawler {
            return Ok(chosen);
        }
        let Some(crawler) = &self.deps.crawler else { return Ok(chosen) };

        let mut hydrated = Vec::with_capacity(chosen.len());
        for mut r in chosen {
            if r.raw_excerpt.chars().count() < 200 {
                token.check("before_crawl").await?;
                let page = crawler.crawl(&r.url).await;
                token.check("after_crawl").await?;
                if page.ok {
                    r.raw_excerpt = page.content;
                }
            }
            hydrated.push(r);
        }
        Ok(hydrated)
    }

    async fn summarize(&self, hydrated: &[SearchResult], token: &CancellationToken) -> Result<String, DeepSearchError> {
        let formattable: Vec<query::parsing::FormattableResult<'_>> = hydrated
            .iter()
            .map(|r| query::parsing::FormattableResult {
                title: Some(r.title.as_str()),
                published_date: r.published_date.as_deref(),
                score: r.score,
                url: Some(r.url.as_str()),
                summary: Some(r.snippet.as_str()),
                raw_excerpt: Some(r.raw_excerpt.as_str()),
            })
            .collect();
        let table = query::parsing::format_results(&formattable);
        let prompt = format!(
            "Summarize the new knowledge gathered for '{}' from the sources below. \
             Respond in natural language; end with '回答: yes' if this is sufficient to answer the topic, \
             else '回答: no'. Prefix your summary text with '总结'.\n\n{}",
            self.request.topic, table
        );
        token.check("before_summarize").await?;
        let result = self.deps.critic.complete(TaskType::Synthesis, &prompt).await.map_err(DeepSearchError::from);
        token.check("after_summarize").await?;
        result
    }

    async fn emit_quality_and_complete(
        &self,
        epoch: u32,
        all_queries: &[String],
        all_results: &[SearchResult],
        notes: &[String],
        hydrated: &[SearchResult],
    ) {
        let coverage = query::analyze_query_coverage(all_queries);
        let freshness = query::summarize_freshness(freshness_inputs(all_results));
        let time_sensitive = query::is_time_sensitive_topic(&self.request.topic);

        self.deps
            .events
            .emit(
                &self.request.session_id,
                EventKind::QualityUpdate,
                serde_json::json!({
                    "epoch": epoch,
                    "stage": "epoch_complete",
                    "query_coverage": coverage.score,
                    "query_coverage_score": coverage.score,
                    "query_dimensions_covered": coverage.covered_dimensions,
                    "query_dimensions_missing": coverage.missing_dimensions,
                    "query_dimension_hits": coverage.dimension_hits,
                    "freshness_summary": freshness,
                    "time_sensitive_query": time_sensitive,
                    "freshness_warning": "",
                }),
            )
            .await;

        let limit = self.request.settings.deepsearch_event_results_limit;
        let previews = dedup_source_previews(hydrated, limit);
        self.deps
            .events
            .emit(
                &self.request.session_id,
                EventKind::ResearchNodeComplete,
                serde_json::json!({
                    "node_id": format!("epoch-{epoch}"),
                    "summary": notes.last().cloned().unwrap_or_default(),
                    "sources": previews,
                    "quality": coverage.score,
                    "epoch": epoch,
                }),
            )
            .await;
    }

    async fn write_report(&self, notes: &[String], token: &CancellationToken) -> Result<String, DeepSearchError> {
        let knowledge = notes.join("\n\n");
        let prompt = format!("Write a synthesized research report on '{}' from the following notes:\n\n{}", self.request.topic, knowledge);
        token.check("before_write_report").await?;
        let result = self.deps.writer.complete(TaskType::Writing, &prompt).await.map_err(DeepSearchError::from);
        token.check("after_write_report").await?;
        result
    }
}

fn deps_strategy(request: &RunRequest) -> SearchStrategy {
    request.settings.search_strategy.into()
}

fn truncated_excerpt(r: &SearchResult) -> String {
    let source = if r.raw_excerpt.is_empty() { &r.snippet } else { &r.raw_excerpt };
    source.chars().take(600).collect()
}

fn freshness_inputs(results: &[SearchResult]) -> Vec<query::FreshnessInput<'_>> {
    results.iter().map(|r| query::FreshnessInput { published_date: r.published_date.as_deref() }).collect()
}

/// URL-unique, length-bounded preview list for `research_node_complete`
/// (spec §6: "sources length ≤ deepsearch_event_results_limit, URL-unique").
fn dedup_source_previews(results: &[SearchResult], limit: usize) -> Vec<serde_json::Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for r in results {
        let key = canonical_url_key(&r.url);
        if !seen.insert(key) {
            continue;
        }
        out.push(serde_json::json!({"title": r.title, "url": r.url, "provider": r.provider, "published_date": r.published_date, "score": r.score}));
        if out.len() >= limit {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::test_support::StubChatModel;
    use crate::config::Settings;
    use crate::events::{EventBus, SessionId};
    use crate::providers::{ProviderRegistry, SearchCache};
    use crate::routing::RuntimeOverrides;
    use std::sync::Arc;

    fn fixed_clock() -> u64 {
        0
    }

    fn test_collaborators(planner_responses: Vec<String>) -> Collaborators {
        Collaborators {
            planner: Arc::new(StubChatModel::new(planner_responses)),
            researcher: Arc::new(StubChatModel::new(vec![])),
            critic: Arc::new(StubChatModel::new(vec![])),
            writer: Arc::new(StubChatModel::new(vec![])),
            providers: Arc::new(ProviderRegistry::new()),
            profile: vec!["tavily".to_string()],
            cache: Arc::new(SearchCache::new(8)),
            crawler: None,
            artifact_writer: None,
            events: EventBus::new(),
            clock: fixed_clock,
        }
    }

    fn test_request(settings: Settings) -> RunRequest {
        RunRequest {
            topic: "AI".to_string(),
            session_id: SessionId::from("s1"),
            settings: Arc::new(settings),
            overrides: RuntimeOverrides::default(),
            mode_override: None,
        }
    }

    #[tokio::test]
    async fn token_budget_preempts_search_before_any_query_runs() {
        let mut settings = Settings::default();
        settings.deepsearch_max_epochs = 2;
        settings.deepsearch_max_tokens = 3;
        settings.deepsearch_max_seconds = 0.0;

        let request = test_request(settings);
        let deps = test_collaborators(vec![
            "[\"a very long query that should consume token budget quickly\"]".to_string(),
        ]);
        let runner = LinearRunner::new(&request, &deps);
        let token = CancellationToken::new("t1".to_string(), serde_json::Value::Null);

        let artifacts = runner.run(&token).await;
        assert_eq!(artifacts.budget_stop_reason, Some(crate::error::BudgetStopReason::TokensExceeded));
        assert!(artifacts.search_runs.is_empty());
    }

    #[tokio::test]
    async fn time_budget_preempts_search_before_any_query_runs() {
        let mut settings = Settings::default();
        settings.deepsearch_max_epochs = 2;
        settings.deepsearch_max_tokens = 10_000;
        settings.deepsearch_max_seconds = 0.001;

        let request = test_request(settings);

        // Wraps StubChatModel with an artificial delay so the time budget
        // trips before the search loop ever runs.
        struct SlowPlanner(StubChatModel);
        #[async_trait::async_trait]
        impl crate::collaborators::ChatModel for SlowPlanner {
            async fn complete(&self, task_type: TaskType, prompt: &str) -> anyhow::Result<String> {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.0.complete(task_type, prompt).await
            }
        }

        let mut deps = test_collaborators(vec![]);
        deps.planner = Arc::new(SlowPlanner(StubChatModel::new(vec!["[\"q\"]".to_string()])));

        let runner = LinearRunner::new(&request, &deps);
        let token = CancellationToken::new("t1".to_string(), serde_json::Value::Null);

        let artifacts = runner.run(&token).await;
        assert_eq!(artifacts.budget_stop_reason, Some(crate::error::BudgetStopReason::TimeExceeded));
        assert!(artifacts.search_runs.is_empty());
    }

    #[test]
    fn parse_enough_matches_the_literal_heuristic() {
        assert!(parse_enough("我的回答是: yes"));
        assert!(!parse_enough("我的回答是: no"));
    }

    #[test]
    fn extract_summary_text_strips_marker_prefix() {
        let text = extract_summary_text("前言无关\n总结：这是正文");
        assert_eq!(text, "这是正文");
    }
}
