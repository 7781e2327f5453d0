//! Query & quality utilities (spec §4.5): list parsing, coverage scoring,
//! freshness scoring, and diverse backfill.

pub mod markers;
pub mod parsing;
pub mod tolerant_json;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use markers::*;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b20\d{2}\b").unwrap());
static CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[一-鿿]").unwrap());

fn is_cjk_text(text: &str) -> bool {
    CJK_RE.is_match(text)
}

/// True if the topic explicitly asks for recent/fresh information (spec §4.5).
pub fn is_time_sensitive_topic(topic: &str) -> bool {
    let text = topic.trim();
    if text.is_empty() {
        return false;
    }
    if contains_any_case_insensitive(text, EN_TIME_MARKERS) {
        return true;
    }
    if contains_any_raw(text, ZH_TIME_MARKERS) {
        return true;
    }
    YEAR_RE.is_match(text)
}

/// Coverage dimensions a single query touches (spec §4.5).
pub fn query_dimensions(query: &str) -> HashSet<&'static str> {
    let text = query.trim();
    let mut dims = HashSet::new();
    if text.is_empty() {
        return dims;
    }

    if is_time_sensitive_topic(text) {
        dims.insert("freshness");
    }
    if contains_any_case_insensitive(text, OFFICIAL_MARKERS) || contains_any_raw(text, OFFICIAL_MARKERS) {
        dims.insert("official");
    }
    if contains_any_case_insensitive(text, EVIDENCE_MARKERS) || contains_any_raw(text, EVIDENCE_MARKERS) {
        dims.insert("evidence");
    }
    if contains_any_case_insensitive(text, RISK_MARKERS) || contains_any_raw(text, RISK_MARKERS) {
        dims.insert("risk");
    }
    if contains_any_case_insensitive(text, IMPLEMENTATION_MARKERS) || contains_any_raw(text, IMPLEMENTATION_MARKERS) {
        dims.insert("implementation");
    }
    dims
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryCoverage {
    pub score: f64,
    pub covered_dimensions: Vec<String>,
    pub missing_dimensions: Vec<String>,
    pub dimension_hits: BTreeMap<String, u32>,
    pub total_queries: usize,
}

/// `score = covered/5` with the closed dimension set (spec §4.5, §8).
pub fn analyze_query_coverage<S: AsRef<str>>(queries: &[S]) -> QueryCoverage {
    let mut hits: BTreeMap<String, u32> = QUERY_DIMENSIONS.iter().map(|d| (d.to_string(), 0)).collect();

    for query in queries {
        for dim in query_dimensions(query.as_ref()) {
            *hits.get_mut(dim).unwrap() += 1;
        }
    }

    let mut covered: Vec<String> = hits.iter().filter(|(_, c)| **c > 0).map(|(k, _)| k.clone()).collect();
    covered.sort();
    let mut missing: Vec<String> = hits.iter().filter(|(_, c)| **c == 0).map(|(k, _)| k.clone()).collect();
    missing.sort();

    let score = if QUERY_DIMENSIONS.is_empty() {
        0.0
    } else {
        (covered.len() as f64 / QUERY_DIMENSIONS.len() as f64 * 1000.0).round() / 1000.0
    };

    QueryCoverage { score, covered_dimensions: covered, missing_dimensions: missing, dimension_hits: hits, total_queries: queries.len() }
}

struct SeedTemplate {
    dimension: &'static str,
    query: String,
}

fn seed_templates(topic: &str, year: i32) -> Vec<SeedTemplate> {
    if is_cjk_text(topic) {
        vec![
            SeedTemplate { dimension: "freshness", query: format!("{} 最新进展 {}", topic, year) },
            SeedTemplate { dimension: "official", query: format!("{} 官方文档 发布说明", topic) },
            SeedTemplate { dimension: "evidence", query: format!("{} 数据 报告 评测", topic) },
            SeedTemplate { dimension: "risk", query: format!("{} 局限 风险 争议", topic) },
            SeedTemplate { dimension: "implementation", query: format!("{} 实践 案例 最佳实践", topic) },
        ]
    } else {
        vec![
            SeedTemplate { dimension: "freshness", query: format!("{} latest updates {}", topic, year) },
            SeedTemplate { dimension: "official", query: format!("{} official documentation release notes", topic) },
            SeedTemplate { dimension: "evidence", query: format!("{} benchmark evaluation metrics", topic) },
            SeedTemplate { dimension: "risk", query: format!("{} limitations risks tradeoffs", topic) },
            SeedTemplate { dimension: "implementation", query: format!("{} implementation best practices case study", topic) },
        ]
    }
}

/// Preserve existing (LLM-generated) queries, case-insensitively deduped
/// against history, then backfill missing coverage dimensions from seeded
/// templates until `target_n` queries are collected (spec §4.5).
pub fn backfill_diverse_queries(topic: &str, existing: &[String], historical: &[String], target_n: usize, year: i32) -> Vec<String> {
    let target = target_n.max(1);

    let mut seen: HashSet<String> = historical.iter().map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty()).collect();

    let mut final_queries = Vec::new();
    for query in existing {
        let q = query.trim();
        if q.is_empty() {
            continue;
        }
        let key = q.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.insert(key);
        final_queries.push(q.to_string());
        if final_queries.len() >= target {
            final_queries.truncate(target);
            return final_queries;
        }
    }

    let coverage = analyze_query_coverage(&final_queries);
    let missing: HashSet<&str> = coverage.missing_dimensions.iter().map(|s| s.as_str()).collect();

    let topic = if topic.trim().is_empty() { "topic" } else { topic.trim() };
    let seeds = seed_templates(topic, year);

    let mut prioritized: Vec<&SeedTemplate> = seeds.iter().filter(|s| missing.contains(s.dimension)).collect();
    prioritized.extend(seeds.iter().filter(|s| !missing.contains(s.dimension)));

    for seed in prioritized {
        let query = seed.query.trim();
        let key = query.to_lowercase();
        if query.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.insert(key);
        final_queries.push(query.to_string());
        if final_queries.len() >= target {
            break;
        }
    }

    final_queries.truncate(target);
    final_queries
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }
    let normalized = if let Some(stripped) = text.strip_suffix('Z') {
        format!("{}+00:00", stripped)
    } else {
        text.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FreshnessSummary {
    pub total_results: u64,
    pub known_count: u64,
    pub unknown_count: u64,
    pub fresh_7_count: u64,
    pub fresh_30_count: u64,
    pub stale_180_count: u64,
    pub fresh_30_ratio: f64,
    pub stale_180_ratio: f64,
}

impl FreshnessSummary {
    /// The zero value for a run that never searched anything (spec §7
    /// cancelled/empty-result degrade paths).
    pub fn empty() -> Self {
        FreshnessSummary {
            total_results: 0,
            known_count: 0,
            unknown_count: 0,
            fresh_7_count: 0,
            fresh_30_count: 0,
            stale_180_count: 0,
            fresh_30_ratio: 0.0,
            stale_180_ratio: 0.0,
        }
    }
}

/// A minimal view of one search result needed for freshness bucketing.
pub struct FreshnessInput<'a> {
    pub published_date: Option<&'a str>,
}

/// Bucket results by age (≤7d, ≤30d, >180d) and compute freshness ratios
/// (spec §4.5).
pub fn summarize_freshness<'a, I>(results: I) -> FreshnessSummary
where
    I: IntoIterator<Item = FreshnessInput<'a>>,
{
    let now = Utc::now();
    let mut total_results = 0u64;
    let mut known_count = 0u64;
    let mut unknown_count = 0u64;
    let mut fresh_7_count = 0u64;
    let mut fresh_30_count = 0u64;
    let mut stale_180_count = 0u64;

    for result in results {
        total_results += 1;
        let dt = result.published_date.and_then(parse_datetime);
        match dt {
            None => unknown_count += 1,
            Some(dt) => {
                known_count += 1;
                let age_days = (now - dt).num_seconds().max(0) as f64 / 86400.0;
                if age_days <= 7.0 {
                    fresh_7_count += 1;
                }
                if age_days <= 30.0 {
                    fresh_30_count += 1;
                }
                if age_days > 180.0 {
                    stale_180_count += 1;
                }
            }
        }
    }

    let round3 = |n: f64| (n * 1000.0).round() / 1000.0;
    let fresh_30_ratio = if known_count > 0 { round3(fresh_30_count as f64 / known_count as f64) } else { 0.0 };
    let stale_180_ratio = if known_count > 0 { round3(stale_180_count as f64 / known_count as f64) } else { 0.0 };

    FreshnessSummary {
        total_results,
        known_count,
        unknown_count,
        fresh_7_count,
        fresh_30_count,
        stale_180_count,
        fresh_30_ratio,
        stale_180_ratio,
    }
}
