//! `parse_list` / `format_results` (spec §4.5), grounded in
//! `original_source/agent/workflows/parsing_utils.py`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```(?:python)?(.*?)```").unwrap());
static SINGLE_QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"'([^']*)'").unwrap());

/// Parse a Python-list-like LLM output into a string list.
///
/// Never executes input — handles code-fenced lists, bracketed JSON-ish
/// arrays (single- or double-quoted, the way `ast.literal_eval` accepts
/// either), and falls back to newline splitting. `parse_list("[x for x in
/// range(3)]")` must return the text verbatim as a single item, never
/// evaluate it (spec §8).
pub fn parse_list(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut working = text.to_string();
    if let Some(last) = CODE_FENCE_RE.captures_iter(text).last() {
        working = last.get(1).map(|m| m.as_str().to_string()).unwrap_or(working);
    }

    if let (Some(start), Some(end)) = (working.find('['), working.rfind(']')) {
        if end > start {
            working = working[start..=end].to_string();
        }
    }

    if let Some(items) = try_parse_json_array(&working) {
        return items;
    }

    text.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect()
}

/// Attempt strict parsing only (mirrors `ast.literal_eval`'s safety
/// guarantee: malformed or non-list-literal text is rejected, never
/// partially executed) — first as JSON, then, if the text carries no double
/// quotes of its own, with single-quoted string literals normalized to
/// double quotes so a Python-style `['a', 'b']` parses too.
fn try_parse_json_array(text: &str) -> Option<Vec<String>> {
    if let Some(items) = parse_json_array_str(text) {
        return Some(items);
    }
    if !text.contains('"') {
        let normalized = SINGLE_QUOTED_RE.replace_all(text, "\"$1\"").to_string();
        return parse_json_array_str(&normalized);
    }
    None
}

fn parse_json_array_str(text: &str) -> Option<Vec<String>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Item {
        S(String),
        N(serde_json::Number),
    }

    let parsed: Vec<Item> = serde_json::from_str(text).ok()?;
    Some(
        parsed
            .into_iter()
            .map(|item| match item {
                Item::S(s) => s.trim().to_string(),
                Item::N(n) => n.to_string(),
            })
            .collect(),
    )
}

/// A minimal view of a search result for prompt-facing formatting.
pub struct FormattableResult<'a> {
    pub title: Option<&'a str>,
    pub published_date: Option<&'a str>,
    pub score: f64,
    pub url: Option<&'a str>,
    pub summary: Option<&'a str>,
    pub raw_excerpt: Option<&'a str>,
}

/// Numbered, fixed-field textual table for prompt consumption (spec §4.5),
/// with the original source's exact Chinese field labels.
pub fn format_results(results: &[FormattableResult<'_>]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(idx, r)| {
            let raw_excerpt = r.raw_excerpt.unwrap_or("");
            let truncated: String = raw_excerpt.chars().take(500).collect();
            format!(
                "[{idx}]\n标题: {title}\n日期: {date}\n评分: {score}\n链接: {url}\n摘要: {summary}\n原文: {excerpt}",
                idx = idx + 1,
                title = r.title.unwrap_or("N/A"),
                date = r.published_date.unwrap_or("unknown"),
                score = r.score,
                url = r.url.unwrap_or(""),
                summary = r.summary.unwrap_or(""),
                excerpt = truncated,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
