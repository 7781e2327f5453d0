//! Tolerant JSON extraction from LLM text output (spec §4.6, §9).
//!
//! Shared by the knowledge-gap analyzer and any other stage that parses
//! structured output from a model: strip an optional code fence, take the
//! substring between the first `{` and the last `}`, then attempt strict
//! JSON parsing. Never partially evaluates input.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*([\s\S]*?)```").unwrap());

/// Returns `None` when no valid JSON object can be recovered — callers
/// decide on their own degrade-to-neutral-default behavior (spec §4.6, §9).
pub fn extract_json_object(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }

    let mut working = text.to_string();
    if let Some(caps) = FENCE_RE.captures(text) {
        working = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or(working);
    }

    let start = working.find('{')?;
    let end = working.rfind('}')?;
    if end < start {
        return None;
    }
    let candidate = &working[start..=end];
    serde_json::from_str(candidate).ok()
}
