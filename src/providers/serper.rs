//! A single concrete [`SearchProvider`] implementation over Serper's Google
//! search proxy, grounded in `original_source/tools/search/providers.py`'s
//! `serper_search`. This is the one illustrative HTTP-backed provider the
//! crate ships; every other engine named in spec §4.3 (SerpApi, Bing,
//! Google CSE, Exa, Firecrawl) is structurally identical — a host wires
//! those up against the same [`SearchProvider`] trait with its own API key.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use super::{normalize_results, validate_api_key, SearchProvider, SearchResult};
use crate::error::{sanitize_error_text, ProviderError};

const SERPER_URL: &str = "https://google.serper.dev/search";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct SerperKnowledgeGraph {
    title: Option<String>,
    description: Option<String>,
    website: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganicItem {
    title: Option<String>,
    snippet: Option<String>,
    link: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SerperResponse {
    #[serde(rename = "knowledgeGraph")]
    knowledge_graph: Option<SerperKnowledgeGraph>,
    #[serde(default)]
    organic: Vec<SerperOrganicItem>,
}

/// Wraps Serper's `/search` endpoint (spec §4.3 Normalization: knowledge
/// graph hit first, then organic results, capped at `max_results`).
pub struct SerperProvider {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl SerperProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, SERPER_URL.to_string())
    }

    /// Points the provider at a different base endpoint than Serper's own,
    /// for tests driving it against a local [`wiremock`] server.
    fn with_endpoint(api_key: impl Into<String>, endpoint: String) -> Self {
        SerperProvider {
            api_key: api_key.into(),
            endpoint,
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default(),
        }
    }

    #[cfg(test)]
    fn for_test(base_url: &str, api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, format!("{base_url}/search"))
    }
}

#[async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &str {
        "serper"
    }

    fn is_available(&self) -> bool {
        validate_api_key(&self.api_key).is_ok()
    }

    #[instrument(skip(self), fields(provider = "serper"))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, ProviderError> {
        validate_api_key(&self.api_key)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({"q": query, "num": max_results.max(1)}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ServerError(format!(
                "Serper API error ({status}): {}",
                sanitize_error_text(&body)
            )));
        }

        let body: SerperResponse = response.json().await.unwrap_or_default();
        let mut raw = Vec::new();

        if let Some(kg) = body.knowledge_graph {
            let has_content = kg.title.as_deref().is_some_and(|s| !s.is_empty())
                || kg.description.as_deref().is_some_and(|s| !s.is_empty())
                || kg.website.as_deref().is_some_and(|s| !s.is_empty());
            if has_content {
                raw.push(serde_json::json!({
                    "title": kg.title.unwrap_or_default(),
                    "snippet": kg.description.unwrap_or_default(),
                    "url": kg.website.unwrap_or_default(),
                    "raw_excerpt": "",
                    "score": 0.9,
                }));
            }
        }

        for item in body.organic {
            raw.push(serde_json::json!({
                "title": item.title.unwrap_or_default(),
                "snippet": item.snippet.clone().unwrap_or_default(),
                "url": item.link.unwrap_or_default(),
                "raw_excerpt": item.snippet.unwrap_or_default(),
                "score": 0.5,
                "published_date": item.date,
            }));
        }

        raw.truncate(max_results.max(1));
        Ok(normalize_results(raw, "serper"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn is_available_rejects_placeholder_keys() {
        let provider = SerperProvider::new("your_api_key_here");
        assert!(!provider.is_available());
    }

    #[tokio::test]
    async fn search_normalizes_knowledge_graph_ahead_of_organic_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "a-real-looking-api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "knowledgeGraph": {"title": "Rust", "description": "A language", "website": "https://rust-lang.org"},
                "organic": [{"title": "Rust Book", "snippet": "Learn Rust", "link": "https://doc.rust-lang.org/book", "position": 1}],
            })))
            .mount(&server)
            .await;

        let provider = SerperProvider::for_test(&server.uri(), "a-real-looking-api-key");
        let results = provider.search("rust programming", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://rust-lang.org");
        assert_eq!(results[1].url, "https://doc.rust-lang.org/book");
    }

    #[tokio::test]
    async fn search_sanitizes_non_success_response_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("api_key=a-real-looking-api-key is invalid"))
            .mount(&server)
            .await;

        let provider = SerperProvider::for_test(&server.uri(), "a-real-looking-api-key");
        let err = provider.search("q", 5).await.unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("a-real-looking-api-key"));
    }

    #[tokio::test]
    async fn empty_knowledge_graph_is_dropped_rather_than_emitted_blank() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "knowledgeGraph": {"title": "", "description": "", "website": ""},
                "organic": [{"title": "Only Result", "snippet": "s", "link": "https://example.com", "position": 1}],
            })))
            .mount(&server)
            .await;

        let provider = SerperProvider::for_test(&server.uri(), "a-real-looking-api-key");
        let results = provider.search("q", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://example.com");
    }
}
