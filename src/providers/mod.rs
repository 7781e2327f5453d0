//! Provider registry, cache, and multi-search orchestrator (spec §4.3),
//! grounded in the teacher's `providers::factory` dispatch pattern, the
//! `#[async_trait] trait Provider` seam, and
//! `original_source/{agent/workflows/domain_router.py,tools/search/fallback_search.py}`.

mod cache;
mod dedup;
mod domain;
mod serper;

pub use cache::SearchCache;
pub use dedup::canonical_url_key;
pub use domain::{build_provider_profile, DomainClassification, ResearchDomain};
pub use serper::SerperProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::{sanitize_error_text, ProviderError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub raw_excerpt: String,
    pub score: f64,
    pub published_date: Option<String>,
    pub provider: String,
}

/// `{name, is_available, search}` (spec §4.3). Concrete providers wrap HTTP
/// calls; the crate ships [`SerperProvider`] as one illustrative
/// implementation and otherwise expects hosts to implement this trait for
/// whichever other search APIs they have credentials for (Non-goal: no
/// bundled API keys for every engine named in spec §4.3).
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_available(&self) -> bool;
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Rejects empty or placeholder-looking API keys (spec §4.3: "reject
/// placeholders, require ≥10 chars").
pub fn validate_api_key(key: &str) -> Result<(), ProviderError> {
    let trimmed = key.trim();
    if trimmed.len() < 10 {
        return Err(ProviderError::Authentication("API key is missing or too short".to_string()));
    }
    let lowered = trimmed.to_lowercase();
    let placeholders = ["your_api_key", "changeme", "xxxxxxxxxx", "sk-xxx", "placeholder"];
    if placeholders.iter().any(|p| lowered.contains(p)) {
        return Err(ProviderError::Authentication("API key looks like a placeholder".to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Fallback,
    Profile,
}

impl From<crate::config::SearchStrategy> for SearchStrategy {
    fn from(value: crate::config::SearchStrategy) -> Self {
        match value {
            crate::config::SearchStrategy::Fallback => SearchStrategy::Fallback,
            crate::config::SearchStrategy::Profile => SearchStrategy::Profile,
        }
    }
}

static ENGINE_ALIASES: &[(&str, &str)] =
    &[("google", "google_cse"), ("googlecse", "google_cse"), ("google_custom_search", "google_cse")];

fn resolve_alias(name: &str) -> String {
    let key = name.trim().to_lowercase();
    ENGINE_ALIASES.iter().find(|(alias, _)| *alias == key).map(|(_, canonical)| canonical.to_string()).unwrap_or(key)
}

/// Holds the registered providers and dispatches a query per the `fallback`
/// or `profile` strategy (spec §4.3).
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SearchProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry { providers: HashMap::new() }
    }

    pub fn register(&mut self, provider: Arc<dyn SearchProvider>) {
        self.providers.insert(resolve_alias(provider.name()), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SearchProvider>> {
        self.providers.get(&resolve_alias(name)).cloned()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.get(name).map(|p| p.is_available()).unwrap_or(false)
    }

    /// First provider in `profile` returning ≥1 result wins; providers
    /// erroring or returning empty are logged and skipped (spec §4.3
    /// `fallback` strategy). `enforce_profile=true` implements the
    /// `profile` strategy: unknown names are skipped with a warning instead
    /// of silently falling through to any registered provider.
    #[instrument(skip(self, profile), fields(profile_len = profile.len()))]
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        profile: &[String],
        strategy: SearchStrategy,
    ) -> (Option<String>, Vec<SearchResult>) {
        for raw_name in profile {
            let canonical = resolve_alias(raw_name);
            let provider = match self.providers.get(&canonical) {
                Some(p) => p,
                None => {
                    if strategy == SearchStrategy::Profile {
                        warn!(provider = %raw_name, "unknown provider in profile, skipping");
                    }
                    continue;
                }
            };
            if !provider.is_available() {
                continue;
            }
            match provider.search(query, max_results).await {
                Ok(results) if !results.is_empty() => return (Some(canonical), results),
                Ok(_) => continue,
                Err(e) => {
                    warn!(provider = %canonical, error = %sanitize_error_text(&e.to_string()), "provider search failed");
                    continue;
                }
            }
        }
        (None, Vec::new())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Coerces a loosely-shaped provider response into [`SearchResult`]s,
/// defaulting `score` to 0.5 and tagging the provider (spec §4.3
/// Normalization).
pub fn normalize_results(raw: Vec<serde_json::Value>, provider: &str) -> Vec<SearchResult> {
    raw.into_iter()
        .map(|item| SearchResult {
            title: item.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            url: item.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            snippet: item.get("snippet").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            raw_excerpt: item.get("raw_excerpt").or_else(|| item.get("content")).and_then(|v| v.as_str()).unwrap_or("").to_string(),
            score: item.get("score").and_then(|v| v.as_f64()).unwrap_or(0.5),
            published_date: item.get("published_date").and_then(|v| v.as_str()).map(|s| s.to_string()),
            provider: provider.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        name: &'static str,
        available: bool,
        results: Vec<SearchResult>,
    }

    #[async_trait]
    impl SearchProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn is_available(&self) -> bool {
            self.available
        }
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>, ProviderError> {
            Ok(self.results.clone())
        }
    }

    fn result(provider: &str) -> SearchResult {
        SearchResult {
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            snippet: "s".to_string(),
            raw_excerpt: "r".to_string(),
            score: 0.5,
            published_date: None,
            provider: provider.to_string(),
        }
    }

    #[tokio::test]
    async fn fallback_strategy_skips_empty_and_unavailable_providers() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider { name: "a", available: true, results: vec![] }));
        registry.register(Arc::new(StubProvider { name: "b", available: true, results: vec![result("b")] }));

        let (used, results) = registry
            .search("q", 5, &["a".to_string(), "b".to_string()], SearchStrategy::Fallback)
            .await;
        assert_eq!(used.as_deref(), Some("b"));
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn engine_aliases_resolve_to_canonical_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider { name: "google_cse", available: true, results: vec![result("google_cse")] }));
        let (used, _) = registry.search("q", 5, &["google".to_string()], SearchStrategy::Fallback).await;
        assert_eq!(used.as_deref(), Some("google_cse"));
    }

    #[test]
    fn validate_api_key_rejects_short_and_placeholder_keys() {
        assert!(validate_api_key("short").is_err());
        assert!(validate_api_key("your_api_key_12345").is_err());
        assert!(validate_api_key("sk-real-looking-key-0123456789").is_ok());
    }
}
