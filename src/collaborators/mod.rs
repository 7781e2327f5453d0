//! External-interface traits (spec §6): the collaborators a
//! `DeepSearchEngine` is composed with. Styled after the teacher's
//! `#[async_trait] trait Provider` seam in `providers/base.rs` and its
//! `AcpProvider`-style subprocess/remote wrapper — here there is no local
//! model inference (Non-goal), only a gateway trait a host implements.

use async_trait::async_trait;

use crate::error::DeepSearchError;
use crate::routing::TaskType;

/// Gateway to whatever chat-completion backend the host wires up. The
/// engine never constructs a concrete model client itself (Non-goal); it
/// only calls through this trait, keyed by [`TaskType`] so a host can route
/// differently per call the way `ModelRouter` resolves model names.
///
/// `#[cfg_attr(test, mockall::automock)]` above `#[async_trait]` mirrors the
/// teacher's `StdinReader`/`Environment` mocking seam in
/// `providers/keyring_manager.rs`, generating a `MockChatModel` alongside
/// the hand-rolled [`test_support::StubChatModel`] for tests that need to
/// assert on call arguments rather than just queue canned responses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, task_type: TaskType, prompt: &str) -> anyhow::Result<String>;
}

/// A single crawled page, mirroring `original_source/tools/crawler.py`'s
/// best-effort, never-raises contract: on failure `content` holds a
/// human-readable error string rather than the caller getting an `Err`.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub content: String,
    pub ok: bool,
}

/// Best-effort page fetcher (spec §6, Non-goal: no JS rendering / full
/// browser engine). Implementations must never propagate a fetch failure as
/// an `Err` — they report it in [`CrawledPage::content`] instead, matching
/// `crawl_url`'s contract.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, url: &str) -> CrawledPage;

    async fn crawl_many(&self, urls: &[String]) -> Vec<CrawledPage> {
        let mut pages = Vec::with_capacity(urls.len());
        for url in urls {
            pages.push(self.crawl(url).await);
        }
        pages
    }
}

/// Persists a run artifact (spec §6 `deepsearch_save_data`). Implementations
/// decide the storage backend (filesystem, object store, ...); the engine
/// only ever builds the JSON payload and a sanitized filename via
/// [`crate::config::safe_filename`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    async fn write(&self, filename: &str, payload: &serde_json::Value) -> Result<(), DeepSearchError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    pub struct StubChatModel {
        pub responses: Mutex<Vec<String>>,
    }

    impl StubChatModel {
        pub fn new(responses: Vec<String>) -> Self {
            StubChatModel { responses: Mutex::new(responses) }
        }
    }

    #[async_trait]
    impl ChatModel for StubChatModel {
        async fn complete(&self, _task_type: TaskType, _prompt: &str) -> anyhow::Result<String> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                anyhow::bail!("no more stubbed responses");
            }
            Ok(responses.remove(0))
        }
    }
}
