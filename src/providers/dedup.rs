//! URL canonicalization for result dedup (spec §3 `SearchResult` equality,
//! §8 "case-insensitive host dedupe").

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static TRACKING_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^utm_").unwrap());

/// Lowercases scheme and host, strips a trailing slash and common tracking
/// query params (`utm_*`), so two URLs differing only in case or tracking
/// noise dedup to the same key.
pub fn canonical_url_key(raw_url: &str) -> String {
    let parsed = match Url::parse(raw_url) {
        Ok(u) => u,
        Err(_) => return raw_url.trim().to_lowercase(),
    };

    let scheme = parsed.scheme().to_lowercase();
    let host = parsed.host_str().unwrap_or("").to_lowercase();
    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
    let mut path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    let kept_params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAM_RE.is_match(k))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let query = if kept_params.is_empty() {
        String::new()
    } else {
        let joined = kept_params.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        format!("?{joined}")
    };

    format!("{scheme}://{host}{port}{path}{query}")
}
