//! Model Router (spec §4.4), grounded in `original_source/agent/core/multi_model.py`
//! and styled after `providers::factory::create` in the teacher repo.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::Settings;

/// Task taxonomy (spec §4.4). `Display`/`EnumString` come from `strum` —
/// the same crate the teacher uses for its own enum<->string conversions —
/// rather than a hand-rolled match, so `TaskType::Research.to_string()` and
/// `"research".parse::<TaskType>()` are both free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskType {
    Routing,
    Planning,
    QueryGen,
    Research,
    Critique,
    Synthesis,
    Writing,
    Evaluation,
    Reflection,
    GapAnalysis,
}

impl TaskType {
    fn default_temperature(self) -> f64 {
        match self {
            TaskType::Routing => 0.3,
            TaskType::Planning => 0.6,
            TaskType::QueryGen => 0.8,
            TaskType::Research => 0.4,
            TaskType::Critique => 0.2,
            TaskType::Synthesis => 0.5,
            TaskType::Writing => 0.6,
            TaskType::Evaluation => 0.3,
            TaskType::Reflection => 0.5,
            TaskType::GapAnalysis => 0.4,
        }
    }

    fn is_reasoning_task(self) -> bool {
        matches!(
            self,
            TaskType::Routing
                | TaskType::Planning
                | TaskType::Evaluation
                | TaskType::Critique
                | TaskType::Reflection
                | TaskType::GapAnalysis
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Routing => "routing",
            TaskType::Planning => "planning",
            TaskType::QueryGen => "query_gen",
            TaskType::Research => "research",
            TaskType::Critique => "critique",
            TaskType::Synthesis => "synthesis",
            TaskType::Writing => "writing",
            TaskType::Evaluation => "evaluation",
            TaskType::Reflection => "reflection",
            TaskType::GapAnalysis => "gap_analysis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatProvider {
    OpenAi,
    Anthropic,
    Azure,
    Ollama,
    DeepSeek,
    Custom,
}

/// Substring detection from a bare model name (spec §4.4 [ADD]).
pub fn detect_provider(model_name: &str, settings: &Settings) -> ChatProvider {
    let lower = model_name.to_lowercase();
    if lower.contains("claude") {
        ChatProvider::Anthropic
    } else if lower.contains("gpt") || lower.contains("o1") || lower.contains("o3") {
        ChatProvider::OpenAi
    } else if lower.contains("deepseek") {
        ChatProvider::DeepSeek
    } else if settings.use_azure {
        ChatProvider::Azure
    } else if settings.openai_base_url.as_deref().map(|u| u.to_lowercase().contains("ollama")).unwrap_or(false) {
        ChatProvider::Ollama
    } else {
        ChatProvider::OpenAi
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ChatProvider,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelUsageStats {
    pub task_type: TaskType,
    pub model_name: String,
    pub provider: ChatProvider,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct UsageSummary {
    pub total_calls: u64,
    pub success_rate: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_latency_ms: u64,
    pub by_task: HashMap<String, TaskUsage>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TaskUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Runtime config overrides, keyed loosely the way a caller's configurable
/// dict would be (spec §4.4 resolution precedence, levels 1-2).
#[derive(Debug, Default, Clone)]
pub struct RuntimeOverrides {
    pub task_model: HashMap<TaskType, String>,
    pub reasoning_model: Option<String>,
    pub model: Option<String>,
}

/// Routes tasks to model names/configs based on task type, with runtime
/// overrides, a fallback chain, and append-only usage bookkeeping.
pub struct ModelRouter {
    settings: Settings,
    task_model_map: Mutex<HashMap<TaskType, ModelConfig>>,
    fallback_configs: HashMap<String, Vec<ModelConfig>>,
    usage_stats: Mutex<Vec<ModelUsageStats>>,
}

impl ModelRouter {
    pub fn new(settings: Settings) -> Self {
        ModelRouter {
            settings,
            task_model_map: Mutex::new(HashMap::new()),
            fallback_configs: HashMap::new(),
            usage_stats: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fallback_chain(&mut self, model_name: impl Into<String>, chain: Vec<ModelConfig>) {
        self.fallback_configs.insert(model_name.into(), chain);
    }

    pub fn set_task_model(&self, task_type: TaskType, config: ModelConfig) {
        self.task_model_map.lock().unwrap().insert(task_type, config);
    }

    fn settings_model_for(&self, task_type: TaskType) -> Option<String> {
        match task_type {
            TaskType::Planning => self.settings.planner_model.clone(),
            TaskType::Research => self.settings.researcher_model.clone(),
            TaskType::Writing => self.settings.writer_model.clone(),
            TaskType::Evaluation => self.settings.evaluator_model.clone(),
            TaskType::Critique => self.settings.critic_model.clone(),
            _ => None,
        }
    }

    /// Resolution precedence level 3-4 (spec §4.4): explicit per-task
    /// setting, else reasoning/primary model.
    pub fn model_config(&self, task_type: TaskType) -> ModelConfig {
        if let Some(config) = self.task_model_map.lock().unwrap().get(&task_type) {
            return config.clone();
        }

        let model_name = self.settings_model_for(task_type).unwrap_or_else(|| {
            if task_type.is_reasoning_task() {
                self.settings
                    .reasoning_model
                    .clone()
                    .unwrap_or_else(|| self.settings.primary_model.clone())
            } else {
                self.settings.primary_model.clone()
            }
        });

        ModelConfig {
            provider: detect_provider(&model_name, &self.settings),
            model_name,
            temperature: task_type.default_temperature(),
            max_tokens: None,
            timeout: self.settings.model_timeout,
            base_url: self.settings.openai_base_url.clone(),
        }
    }

    /// Full 4-level resolution precedence (spec §4.4), given runtime overrides.
    pub fn model_name(&self, task_type: TaskType, overrides: Option<&RuntimeOverrides>) -> String {
        if let Some(overrides) = overrides {
            if let Some(val) = overrides.task_model.get(&task_type) {
                if !val.trim().is_empty() {
                    return val.trim().to_string();
                }
            }
            if task_type.is_reasoning_task() {
                if let Some(val) = &overrides.reasoning_model {
                    if !val.trim().is_empty() {
                        return val.trim().to_string();
                    }
                }
            }
            if let Some(val) = &overrides.model {
                if !val.trim().is_empty() {
                    return val.trim().to_string();
                }
            }
        }
        self.model_config(task_type).model_name
    }

    pub fn fallback_chain(&self, model_name: &str) -> Vec<ModelConfig> {
        self.fallback_configs.get(model_name).cloned().unwrap_or_default()
    }

    pub fn record_usage(&self, stats: ModelUsageStats) {
        self.usage_stats.lock().unwrap().push(stats);
    }

    pub fn usage_summary(&self) -> UsageSummary {
        let stats = self.usage_stats.lock().unwrap();
        if stats.is_empty() {
            return UsageSummary::default();
        }

        let total_calls = stats.len() as u64;
        let success_count = stats.iter().filter(|s| s.success).count() as u64;
        let mut by_task: HashMap<String, TaskUsage> = HashMap::new();
        for s in stats.iter() {
            let entry = by_task.entry(s.task_type.as_str().to_string()).or_default();
            entry.calls += 1;
            entry.input_tokens += s.input_tokens;
            entry.output_tokens += s.output_tokens;
        }

        UsageSummary {
            total_calls,
            success_rate: success_count as f64 / total_calls as f64,
            total_input_tokens: stats.iter().map(|s| s.input_tokens).sum(),
            total_output_tokens: stats.iter().map(|s| s.output_tokens).sum(),
            total_latency_ms: stats.iter().map(|s| s.latency_ms).sum(),
            by_task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.primary_model = "gpt-4o".to_string();
        settings.reasoning_model = Some("claude-3-opus".to_string());
        settings
    }

    #[test]
    fn reasoning_tasks_use_reasoning_model() {
        let router = ModelRouter::new(test_settings());
        let config = router.model_config(TaskType::Planning);
        assert_eq!(config.model_name, "claude-3-opus");
        assert_eq!(config.provider, ChatProvider::Anthropic);
    }

    #[test]
    fn non_reasoning_tasks_use_primary_model() {
        let router = ModelRouter::new(test_settings());
        let config = router.model_config(TaskType::Synthesis);
        assert_eq!(config.model_name, "gpt-4o");
    }

    #[test]
    fn task_type_round_trips_through_strum_display_and_from_str() {
        use std::str::FromStr;
        assert_eq!(TaskType::GapAnalysis.to_string(), "gap_analysis");
        assert_eq!(TaskType::from_str("query_gen").unwrap(), TaskType::QueryGen);
    }

    #[test]
    fn detect_provider_matches_on_substrings() {
        let settings = Settings::default();
        assert_eq!(detect_provider("claude-3-5-sonnet", &settings), ChatProvider::Anthropic);
        assert_eq!(detect_provider("gpt-4o-mini", &settings), ChatProvider::OpenAi);
        assert_eq!(detect_provider("deepseek-chat", &settings), ChatProvider::DeepSeek);
    }

    #[test]
    fn runtime_override_precedence_beats_settings() {
        let router = ModelRouter::new(test_settings());
        let mut overrides = RuntimeOverrides::default();
        overrides.task_model.insert(TaskType::Planning, "custom-planner".to_string());
        assert_eq!(router.model_name(TaskType::Planning, Some(&overrides)), "custom-planner");
    }

    #[test]
    fn general_reasoning_override_applies_only_to_reasoning_tasks() {
        let router = ModelRouter::new(test_settings());
        let mut overrides = RuntimeOverrides::default();
        overrides.reasoning_model = Some("o3".to_string());
        assert_eq!(router.model_name(TaskType::Critique, Some(&overrides)), "o3");
        assert_eq!(router.model_name(TaskType::Synthesis, Some(&overrides)), "gpt-4o");
    }

    #[test]
    fn usage_summary_aggregates_by_task() {
        let router = ModelRouter::new(test_settings());
        router.record_usage(ModelUsageStats {
            task_type: TaskType::Research,
            model_name: "gpt-4o".to_string(),
            provider: ChatProvider::OpenAi,
            input_tokens: 100,
            output_tokens: 50,
            latency_ms: 200,
            success: true,
            error: None,
        });
        let summary = router.usage_summary();
        assert_eq!(summary.total_calls, 1);
        assert_eq!(summary.by_task["research"].input_tokens, 100);
    }
}
