//! End-to-end coverage of spec §8 scenarios 1 and 8: mode-override
//! precedence and tree-mode-failure fallback to the linear runner.

use std::sync::Arc;

use async_trait::async_trait;

use deepsearch_core::cancellation::CancellationManager;
use deepsearch_core::collaborators::ChatModel;
use deepsearch_core::config::{DeepSearchMode, Settings};
use deepsearch_core::events::{EventBus, SessionId};
use deepsearch_core::providers::{ProviderRegistry, SearchCache};
use deepsearch_core::routing::{RuntimeOverrides, TaskType};
use deepsearch_core::runner::{run_deepsearch, Collaborators, RunMode, RunRequest};

fn fixed_clock() -> u64 {
    0
}

struct StaticModel(String);

#[async_trait]
impl ChatModel for StaticModel {
    async fn complete(&self, _task_type: TaskType, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

struct AlwaysFailingModel;

#[async_trait]
impl ChatModel for AlwaysFailingModel {
    async fn complete(&self, _task_type: TaskType, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("simulated model outage")
    }
}

fn base_collaborators(planner: Arc<dyn ChatModel>) -> Collaborators {
    Collaborators {
        planner: planner.clone(),
        researcher: planner.clone(),
        critic: planner.clone(),
        writer: planner,
        providers: Arc::new(ProviderRegistry::new()),
        profile: vec!["tavily".to_string()],
        cache: Arc::new(SearchCache::new(8)),
        crawler: None,
        artifact_writer: None,
        events: EventBus::new(),
        clock: fixed_clock,
    }
}

/// Scenario 1: a request-level override of `linear` wins over the
/// settings' `tree_exploration_enabled:true` + `deepsearch_mode:"tree"`
/// combination, so the run ends up in linear mode.
#[tokio::test]
async fn request_mode_override_outranks_settings() {
    let mut settings = Settings::default();
    settings.deepsearch_mode = DeepSearchMode::Tree;
    settings.tree_exploration_enabled = true;
    settings.deepsearch_max_epochs = 1;
    settings.deepsearch_query_num = 1;

    let planner: Arc<dyn ChatModel> = Arc::new(StaticModel("[\"q\"]".to_string()));
    let deps = base_collaborators(planner);

    let manager = CancellationManager::new();
    let token = manager.create_token("run-1", serde_json::Value::Null).await;

    let request = RunRequest {
        topic: "test".to_string(),
        session_id: SessionId::from("s1"),
        settings: Arc::new(settings),
        overrides: RuntimeOverrides::default(),
        mode_override: Some(DeepSearchMode::Linear),
    };

    let artifacts = run_deepsearch(&request, &deps, &token).await;
    assert_eq!(artifacts.mode, RunMode::Linear);
}

/// Scenario 8: a catastrophic tree-explorer failure (the planner model
/// itself is down) falls back to the linear runner, which still returns a
/// usable artifact rather than propagating the failure to the caller.
#[tokio::test]
async fn tree_failure_falls_back_to_linear_runner() {
    let mut settings = Settings::default();
    settings.deepsearch_mode = DeepSearchMode::Tree;
    settings.deepsearch_max_epochs = 1;

    let planner: Arc<dyn ChatModel> = Arc::new(AlwaysFailingModel);
    let deps = base_collaborators(planner);

    let manager = CancellationManager::new();
    let token = manager.create_token("run-2", serde_json::Value::Null).await;

    let request = RunRequest {
        topic: "test".to_string(),
        session_id: SessionId::from("s2"),
        settings: Arc::new(settings),
        overrides: RuntimeOverrides::default(),
        mode_override: None,
    };

    let artifacts = run_deepsearch(&request, &deps, &token).await;
    assert_eq!(artifacts.mode, RunMode::Linear);
    assert!(artifacts.is_complete);
}
