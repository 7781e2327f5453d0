//! Search-result cache keyed by `(strategy, max_results, profile_joined,
//! query)` (spec §4.3). A bounded LRU; no TTL specified.

use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;

use super::{SearchResult, SearchStrategy};

fn cache_key(strategy: SearchStrategy, max_results: usize, profile: &[String], query: &str) -> String {
    let strategy_tag = match strategy {
        SearchStrategy::Fallback => "fallback",
        SearchStrategy::Profile => "profile",
    };
    format!("deepsearch::{strategy_tag}::{max_results}::{}::{query}", profile.join(","))
}

/// Default capacity a host should reach for absent a more specific sizing
/// need (spec §9 design note (b)).
pub const DEFAULT_CAPACITY: usize = 512;

pub struct SearchCache {
    inner: Mutex<LruCache<String, Vec<SearchResult>>>,
}

impl SearchCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        SearchCache { inner: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns a deep copy on hit (spec §4.3: "Hits return a deep copy").
    pub fn get(
        &self,
        strategy: SearchStrategy,
        max_results: usize,
        profile: &[String],
        query: &str,
    ) -> Option<Vec<SearchResult>> {
        let key = cache_key(strategy, max_results, profile, query);
        self.inner.lock().unwrap().get(&key).cloned()
    }

    pub fn put(
        &self,
        strategy: SearchStrategy,
        max_results: usize,
        profile: &[String],
        query: &str,
        results: Vec<SearchResult>,
    ) {
        let key = cache_key(strategy, max_results, profile, query);
        self.inner.lock().unwrap().put(key, results);
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        SearchCache::new(DEFAULT_CAPACITY)
    }
}
