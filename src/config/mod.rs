//! Runtime configuration (spec §6), grounded in the teacher's
//! `config/mod.rs` `pub use` re-export style and the settings-object pattern
//! of `original_source/common/config.py`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors surfaced while loading [`Settings`] from an external source.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for environment variable {name}: {message}")]
    InvalidEnvValue { name: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeepSearchMode {
    Auto,
    Tree,
    Linear,
}

impl Default for DeepSearchMode {
    fn default() -> Self {
        DeepSearchMode::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Fallback,
    Profile,
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::Fallback
    }
}

/// Single typed configuration object constructed once by the host and
/// passed by `Arc<Settings>` into runners (spec §6 [ADD], §9 resolved).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Scheduling
    pub deepsearch_mode: DeepSearchMode,
    pub tree_exploration_enabled: bool,
    pub tree_max_depth: u32,
    pub tree_max_branches: u32,
    pub tree_queries_per_branch: u32,
    pub tree_parallel_branches: usize,
    pub deepsearch_max_epochs: u32,
    pub deepsearch_query_num: u32,
    pub deepsearch_results_per_query: u32,

    // Budgets
    pub deepsearch_max_seconds: f64,
    pub deepsearch_max_tokens: u64,

    // Quality
    pub deepsearch_freshness_warning_min_known: u32,
    pub deepsearch_freshness_warning_min_ratio: f64,
    pub deepsearch_use_gap_analysis: bool,
    pub deepsearch_event_results_limit: usize,
    pub deepsearch_enable_crawler: bool,

    // Search strategy
    pub search_strategy: SearchStrategy,

    // Model routing
    pub primary_model: String,
    pub reasoning_model: Option<String>,
    pub planner_model: Option<String>,
    pub researcher_model: Option<String>,
    pub writer_model: Option<String>,
    pub evaluator_model: Option<String>,
    pub critic_model: Option<String>,
    pub use_azure: bool,
    pub openai_base_url: Option<String>,
    pub model_timeout: Option<Duration>,

    // Persistence
    pub deepsearch_save_data: bool,
    pub deepsearch_save_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            deepsearch_mode: DeepSearchMode::default(),
            tree_exploration_enabled: true,
            tree_max_depth: 2,
            tree_max_branches: 4,
            tree_queries_per_branch: 3,
            tree_parallel_branches: 3,
            deepsearch_max_epochs: 3,
            deepsearch_query_num: 5,
            deepsearch_results_per_query: 5,

            deepsearch_max_seconds: 0.0,
            deepsearch_max_tokens: 0,

            deepsearch_freshness_warning_min_known: 3,
            deepsearch_freshness_warning_min_ratio: 0.4,
            deepsearch_use_gap_analysis: true,
            deepsearch_event_results_limit: 5,
            deepsearch_enable_crawler: false,

            search_strategy: SearchStrategy::default(),

            primary_model: "gpt-4o".to_string(),
            reasoning_model: None,
            planner_model: None,
            researcher_model: None,
            writer_model: None,
            evaluator_model: None,
            critic_model: None,
            use_azure: false,
            openai_base_url: None,
            model_timeout: None,

            deepsearch_save_data: false,
            deepsearch_save_dir: "runs".to_string(),
        }
    }
}

impl Settings {
    /// Parses a YAML document into [`Settings`], like the teacher's
    /// `serde_yaml::from_value` calls over its own config mapping. Unknown
    /// fields are accepted (`#[serde(default)]` on `Settings` fills in the
    /// rest), so a host's config file only needs to name what it overrides.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Parses a JSON document into [`Settings`].
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Applies `DEEPSEARCH_*` environment overrides on top of `self`, the
    /// lowest-precedence layer below a config file and below the per-request
    /// [`crate::routing::RuntimeOverrides`] (spec §6 "layered configuration").
    /// Only a handful of scalar fields are realistic to override by a single
    /// env var; structured fields (model routing maps) are left to the
    /// config file.
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var("DEEPSEARCH_MAX_EPOCHS") {
            self.deepsearch_max_epochs = parse_env("DEEPSEARCH_MAX_EPOCHS", &val)?;
        }
        if let Ok(val) = std::env::var("DEEPSEARCH_MAX_SECONDS") {
            self.deepsearch_max_seconds = parse_env("DEEPSEARCH_MAX_SECONDS", &val)?;
        }
        if let Ok(val) = std::env::var("DEEPSEARCH_MAX_TOKENS") {
            self.deepsearch_max_tokens = parse_env("DEEPSEARCH_MAX_TOKENS", &val)?;
        }
        if let Ok(val) = std::env::var("DEEPSEARCH_PRIMARY_MODEL") {
            self.primary_model = val;
        }
        if let Ok(val) = std::env::var("DEEPSEARCH_SAVE_DATA") {
            self.deepsearch_save_data = parse_env("DEEPSEARCH_SAVE_DATA", &val)?;
        }
        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue { name: name.to_string(), message: format!("could not parse {raw:?}") })
}

static UNSAFE_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// `<safe_topic>_<YYYYmmdd_HHMMSS>.json`, unsafe characters replaced, full
/// filename truncated to 80 chars (spec §6 [ADD], from `deepsearch.py`'s
/// `_safe_filename`).
pub fn safe_filename(topic: &str, timestamp: &str) -> String {
    let sanitized: String =
        topic.chars().map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c }).collect();
    let suffix = format!("_{timestamp}.json");
    let max_topic_len = 80usize.saturating_sub(suffix.len());
    let truncated: String = sanitized.chars().take(max_topic_len).collect();
    format!("{truncated}{suffix}")
}
