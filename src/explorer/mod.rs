//! Tree Explorer (spec §4.8), grounded in `original_source/agent/core/context.py`'s
//! `ContextManager.fork`/`.merge` and the teacher's bounded-parallelism
//! semaphore pattern.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{instrument, warn};

use crate::cancellation::CancellationToken;
use crate::collaborators::ChatModel;
use crate::config::Settings;
use crate::error::DeepSearchError;
use crate::events::{EventBus, EventKind, SessionId};
use crate::providers::{ProviderRegistry, SearchResult, SearchStrategy};
use crate::query;
use crate::routing::TaskType;
use crate::runner::QualityDiagnostics;
use crate::tree::{Finding, NodeStatus, ResearchTree};

/// Read-only state shared by every branch forked from the same topic
/// (spec §3 [ADD], mirrors `SubAgentContext`'s read-only fields).
pub struct BranchContext {
    pub session_id: SessionId,
    pub topic: String,
    pub domain: Option<String>,
}

/// Per-branch isolated accumulators, merged into the shared tree after the
/// branch completes (spec §3 [ADD], mirrors `ContextManager.fork`/`.merge`).
pub struct BranchScope {
    pub context: Arc<BranchContext>,
    pub findings: Vec<Finding>,
    pub sources: Vec<SearchResult>,
    pub notes: Vec<String>,
}

impl BranchScope {
    fn fork(context: Arc<BranchContext>) -> Self {
        BranchScope { context, findings: Vec::new(), sources: Vec::new(), notes: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct DecomposedChild {
    topic: String,
    relevance: f64,
}

/// Clock source threaded through exploration so tests can supply a fixed
/// timestamp; a plain `fn` pointer is `Copy`, so it needs no special
/// handling across `tokio::spawn` boundaries the way a capturing closure
/// would.
pub type Clock = fn() -> u64;

/// Shared handles cloned into every recursive branch task (spec §4.8 step
/// 3: "branches at the same depth run concurrently").
#[derive(Clone)]
pub struct TreeExplorer {
    planner: Arc<dyn ChatModel>,
    researcher: Arc<dyn ChatModel>,
    writer: Arc<dyn ChatModel>,
    providers: Arc<ProviderRegistry>,
    profile: Vec<String>,
    strategy: SearchStrategy,
    results_per_query: usize,
    queries_per_branch: usize,
    tree: Arc<Mutex<ResearchTree>>,
    all_sources: Arc<Mutex<HashSet<String>>>,
    semaphore: Arc<Semaphore>,
    events: EventBus,
    session_id: SessionId,
    clock: Clock,
    settings: Arc<Settings>,
}

impl TreeExplorer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: Arc<dyn ChatModel>,
        researcher: Arc<dyn ChatModel>,
        writer: Arc<dyn ChatModel>,
        providers: Arc<ProviderRegistry>,
        profile: Vec<String>,
        strategy: SearchStrategy,
        results_per_query: usize,
        queries_per_branch: usize,
        max_depth: u32,
        max_branches: u32,
        parallel_branches: usize,
        events: EventBus,
        session_id: SessionId,
        clock: Clock,
        settings: Arc<Settings>,
    ) -> Self {
        TreeExplorer {
            planner,
            researcher,
            writer,
            providers,
            profile,
            strategy,
            results_per_query,
            queries_per_branch,
            tree: Arc::new(Mutex::new(ResearchTree::new(max_depth, max_branches, clock()))),
            all_sources: Arc::new(Mutex::new(HashSet::new())),
            semaphore: Arc::new(Semaphore::new(parallel_branches.max(1))),
            events,
            session_id,
            clock,
            settings,
        }
    }

    /// Steps 1-5 of spec §4.8. Returns the final merged summary or a
    /// [`DeepSearchError`] on catastrophic failure (caught by the Auto
    /// Runner, which falls back to linear mode — spec §4.8/§4.10).
    #[instrument(skip(self, token), fields(session = %self.session_id))]
    pub async fn run(&self, topic: &str, token: &CancellationToken) -> Result<String, DeepSearchError> {
        token.check("tree_explore_start").await?;

        let root_id = {
            let mut tree = self.tree.lock().await;
            tree.create_root(topic, (self.clock)())
        };

        let root_context = Arc::new(BranchContext { session_id: self.session_id.clone(), topic: topic.to_string(), domain: None });
        let mut root_scope = BranchScope::fork(root_context.clone());
        self.explore_node(&root_id, topic, 0, &mut root_scope, token).await?;
        self.merge_scope(&root_id, root_scope).await;

        let max_branches = { self.tree.lock().await.max_branches };
        let children = self.decompose(topic, max_branches as usize).await.unwrap_or_default();

        let mut handles = Vec::new();
        for child in children {
            let child_id = {
                let mut tree = self.tree.lock().await;
                tree.add_child(&root_id, child.topic.clone(), child.relevance, (self.clock)())
            };
            let Some(child_id) = child_id else { continue };

            let explorer = self.clone();
            let token = token.clone();
            let context = root_context.clone();
            handles.push(tokio::spawn(async move { explorer.run_branch(child_id, context, 1, token).await }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "branch task panicked");
            }
        }

        self.emit_tree_update(topic).await;

        self.merge_branches(topic).await
    }

    /// `{tree, quality}` after every branch has finished and before the
    /// final merge (spec §5: "Tree mode emits `research_tree_update` after
    /// all branches complete and before the final `research_node_complete`").
    async fn emit_tree_update(&self, topic: &str) {
        let tree = self.tree.lock().await.clone();
        let Ok(tree_value) = serde_json::to_value(&tree) else {
            warn!("failed to serialize research tree for research_tree_update");
            return;
        };

        let all_queries: Vec<String> = tree.all_findings().into_iter().map(|f| f.query).collect();
        let freshness = query::summarize_freshness(
            tree.all_sources().iter().map(|r| query::FreshnessInput { published_date: r.published_date.as_deref() }),
        );
        let quality = QualityDiagnostics::compute(topic, &all_queries, freshness, &self.settings);

        self.events
            .emit(&self.session_id, EventKind::ResearchTreeUpdate, serde_json::json!({"tree": tree_value, "quality": quality}))
            .await;
    }

    /// A snapshot of the tree built so far, for callers that need to persist
    /// or inspect it after [`Self::run`] returns (spec §3 `research_tree`).
    pub async fn tree_snapshot(&self) -> ResearchTree {
        self.tree.lock().await.clone()
    }

    #[instrument(skip(self, scope, token), fields(node_id, topic, depth))]
    async fn explore_node(
        &self,
        node_id: &str,
        topic: &str,
        depth: u32,
        scope: &mut BranchScope,
        token: &CancellationToken,
    ) -> Result<(), DeepSearchError> {
        token.check("explore_node_start").await?;

        {
            let mut tree = self.tree.lock().await;
            if let Some(node) = tree.node_mut(node_id) {
                node.status = NodeStatus::InProgress;
            }
        }

        self.events
            .emit(
                &self.session_id,
                EventKind::ResearchNodeStart,
                serde_json::json!({"node_id": node_id, "topic": topic, "depth": depth}),
            )
            .await;

        let query_prompt =
            format!("Generate up to {} focused search queries for researching: {topic}", self.queries_per_branch);
        token.check("explore_node_before_plan").await?;
        let raw_queries = self.planner.complete(TaskType::QueryGen, &query_prompt).await.map_err(DeepSearchError::from)?;
        token.check("explore_node_after_plan").await?;
        let mut queries = query::parsing::parse_list(&raw_queries);
        queries.truncate(self.queries_per_branch);

        for q in &queries {
            token.check("explore_node_before_search").await?;
            let (provider, results) = self.providers.search(q, self.results_per_query, &self.profile, self.strategy).await;
            token.check("explore_node_after_search").await?;
            for result in &results {
                scope.sources.push(result.clone());
            }
            scope.findings.push(Finding {
                query: q.clone(),
                result: format!("{} results from {}", results.len(), provider.unwrap_or_else(|| "none".to_string())),
                ts: (self.clock)(),
            });
        }

        let knowledge = scope.findings.iter().map(|f| format!("{}: {}", f.query, f.result)).collect::<Vec<_>>().join("\n");
        let summary_prompt = format!("Summarize the research findings for '{topic}':\n{knowledge}");
        token.check("explore_node_before_summarize").await?;
        let summary = self.researcher.complete(TaskType::Research, &summary_prompt).await.map_err(DeepSearchError::from)?;
        token.check("explore_node_after_summarize").await?;

        {
            let mut tree = self.tree.lock().await;
            if let Some(node) = tree.node_mut(node_id) {
                node.queries = queries;
                node.summary = summary.clone();
                node.status = NodeStatus::Completed;
                node.completed_at = Some((self.clock)());
            }
        }

        self.events
            .emit(
                &self.session_id,
                EventKind::ResearchNodeComplete,
                serde_json::json!({"node_id": node_id, "summary": summary, "sources": scope.sources.len()}),
            )
            .await;
        Ok(())
    }

    async fn decompose(&self, topic: &str, max_branches: usize) -> Option<Vec<DecomposedChild>> {
        let prompt = format!(
            "Decompose the research topic '{topic}' into up to {max_branches} focused sub-topics. \
             Respond with a JSON object: {{\"children\": [{{\"topic\": str, \"relevance\": float 0-1}}]}}"
        );
        let response = self.planner.complete(TaskType::Planning, &prompt).await.ok()?;
        let value = query::tolerant_json::extract_json_object(&response)?;
        let children = value.get("children")?.as_array()?;
        Some(
            children
                .iter()
                .filter_map(|c| {
                    Some(DecomposedChild {
                        topic: c.get("topic")?.as_str()?.to_string(),
                        relevance: c.get("relevance").and_then(|v| v.as_f64()).unwrap_or(0.5),
                    })
                })
                .take(max_branches)
                .collect(),
        )
    }

    async fn merge_scope(&self, node_id: &str, scope: BranchScope) {
        let mut tree = self.tree.lock().await;
        let mut seen = self.all_sources.lock().await;
        if let Some(node) = tree.node_mut(node_id) {
            node.findings.extend(scope.findings);
            for source in scope.sources {
                if seen.insert(source.url.clone()) {
                    node.sources.push(source);
                }
            }
        }
    }

    /// Writer integrates branch summaries, prompt bounded to ~1000 words
    /// (spec §4.8 step 5).
    async fn merge_branches(&self, topic: &str) -> Result<String, DeepSearchError> {
        let summary = {
            let tree = self.tree.lock().await;
            tree.merged_summary()
        };
        let bounded: String = summary.split_whitespace().take(1000).collect::<Vec<_>>().join(" ");
        let prompt = format!("Integrate the following branch research summaries into a coherent overview of '{topic}':\n{bounded}");
        self.writer.complete(TaskType::Writing, &prompt).await.map_err(DeepSearchError::from)
    }

    /// Node failure marks the node `failed` with the error message; siblings
    /// continue (spec §4.8 "Failure policy"). Recurses while
    /// `depth < max_depth`, using `min(2, max_branches)` at deeper levels.
    async fn run_branch(self, node_id: String, parent_context: Arc<BranchContext>, depth: u32, token: CancellationToken) {
        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        let topic = {
            let tree = self.tree.lock().await;
            match tree.node(&node_id) {
                Some(n) => n.topic.clone(),
                None => return,
            }
        };

        let mut scope = BranchScope::fork(parent_context.clone());
        let result = self.explore_node(&node_id, &topic, depth, &mut scope, &token).await;

        match result {
            Ok(()) => self.merge_scope(&node_id, scope).await,
            Err(e) => {
                let mut tree = self.tree.lock().await;
                if let Some(node) = tree.node_mut(&node_id) {
                    node.status = NodeStatus::Failed;
                    node.error = Some(e.to_string());
                }
                return;
            }
        }

        let (max_depth, max_branches) = {
            let tree = self.tree.lock().await;
            (tree.max_depth, tree.max_branches.min(2))
        };
        if depth >= max_depth {
            return;
        }

        let Some(children) = self.decompose(&topic, max_branches as usize).await else { return };
        let mut handles = Vec::new();
        for child in children {
            let child_id = {
                let mut tree = self.tree.lock().await;
                tree.add_child(&node_id, child.topic.clone(), child.relevance, (self.clock)())
            };
            let Some(child_id) = child_id else { continue };
            let explorer = self.clone();
            let parent_context = parent_context.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                explorer.run_branch(child_id, parent_context, depth + 1, token).await
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "nested branch task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::test_support::StubChatModel;
    use crate::providers::ProviderRegistry;

    fn fixed_clock() -> u64 {
        0
    }

    #[tokio::test]
    async fn explore_node_records_findings_and_completes_status() {
        let planner = Arc::new(StubChatModel::new(vec!["[\"query one\"]".to_string()]));
        let researcher = Arc::new(StubChatModel::new(vec!["a short summary".to_string()]));
        let writer = Arc::new(StubChatModel::new(vec![]));
        let providers = Arc::new(ProviderRegistry::new());
        let events = EventBus::new();
        let session_id = SessionId::from("s1");

        let explorer = TreeExplorer::new(
            planner,
            researcher,
            writer,
            providers,
            vec!["tavily".to_string()],
            SearchStrategy::Fallback,
            5,
            5,
            2,
            4,
            3,
            events,
            session_id.clone(),
            fixed_clock,
            Arc::new(Settings::default()),
        );

        let root_id = { explorer.tree.lock().await.create_root("topic", 0) };
        let token = CancellationToken::new("task-1".to_string(), serde_json::Value::Null);
        let context = Arc::new(BranchContext { session_id, topic: "topic".to_string(), domain: None });
        let mut scope = BranchScope::fork(context);
        explorer.explore_node(&root_id, "topic", 0, &mut scope, &token).await.unwrap();

        let tree = explorer.tree.lock().await;
        let node = tree.node(&root_id).unwrap();
        assert_eq!(node.status, NodeStatus::Completed);
        assert_eq!(node.summary, "a short summary");
    }

    #[tokio::test]
    async fn failed_branch_marks_node_failed_without_aborting_siblings() {
        let planner = Arc::new(StubChatModel::new(vec![]));
        let researcher = Arc::new(StubChatModel::new(vec![]));
        let writer = Arc::new(StubChatModel::new(vec![]));
        let providers = Arc::new(ProviderRegistry::new());
        let events = EventBus::new();
        let session_id = SessionId::from("s1");

        let explorer = TreeExplorer::new(
            planner,
            researcher,
            writer,
            providers,
            vec!["tavily".to_string()],
            SearchStrategy::Fallback,
            5,
            5,
            2,
            4,
            3,
            events,
            session_id.clone(),
            fixed_clock,
            Arc::new(Settings::default()),
        );

        let root_id = { explorer.tree.lock().await.create_root("topic", 0) };
        let token = CancellationToken::new("task-1".to_string(), serde_json::Value::Null);
        let context = Arc::new(BranchContext { session_id, topic: "topic".to_string(), domain: None });
        explorer.clone().run_branch(root_id.clone(), context, 0, token).await;

        let tree = explorer.tree.lock().await;
        assert_eq!(tree.node(&root_id).unwrap().status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn run_emits_research_tree_update_before_the_final_merge() {
        let planner = Arc::new(StubChatModel::new(vec![
            "[\"root query\"]".to_string(),
            "{\"children\": []}".to_string(),
        ]));
        let researcher = Arc::new(StubChatModel::new(vec!["root summary".to_string()]));
        let writer = Arc::new(StubChatModel::new(vec!["integrated overview".to_string()]));
        let providers = Arc::new(ProviderRegistry::new());
        let events = EventBus::new();
        let session_id = SessionId::from("s1");

        let kinds: Arc<std::sync::Mutex<Vec<EventKind>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = kinds.clone();
        events
            .subscribe_sync(&session_id, move |event| recorded.lock().unwrap().push(event.kind))
            .await;

        let explorer = TreeExplorer::new(
            planner,
            researcher,
            writer,
            providers,
            vec!["tavily".to_string()],
            SearchStrategy::Fallback,
            5,
            5,
            2,
            4,
            3,
            events,
            session_id,
            fixed_clock,
            Arc::new(Settings::default()),
        );

        let report = explorer.run("topic", &CancellationToken::new("t1".to_string(), serde_json::Value::Null)).await.unwrap();
        assert_eq!(report, "integrated overview");

        let seen = kinds.lock().unwrap();
        let tree_update_pos = seen.iter().position(|k| matches!(k, EventKind::ResearchTreeUpdate)).unwrap();
        let node_complete_count_before = seen[..tree_update_pos].iter().filter(|k| matches!(k, EventKind::ResearchNodeComplete)).count();
        assert!(node_complete_count_before >= 1, "root node_complete should precede the tree update");
        assert_eq!(tree_update_pos, seen.len() - 1, "tree update should be the last event the run emits");
    }
}
