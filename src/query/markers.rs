//! Marker tables for query-dimension scanning (spec §4.5, §9).
//!
//! Carried verbatim from `original_source/agent/workflows/query_strategy.py`
//! since spec.md names the five dimensions but not their marker sets — kept
//! as externalizable `&'static` tables per §9's design note so a new
//! language or dimension is a new constant, not a change to the scanner.

pub const EN_TIME_MARKERS: &[&str] =
    &["latest", "recent", "today", "current", "update", "updates", "new", "this week", "this month", "news"];

pub const ZH_TIME_MARKERS: &[&str] = &["最新", "近期", "今天", "当下", "更新", "本周", "本月", "动态", "新闻"];

pub const OFFICIAL_MARKERS: &[&str] = &[
    "official",
    "documentation",
    "docs",
    "release notes",
    "changelog",
    "roadmap",
    "官方",
    "文档",
    "发布说明",
    "路线图",
];

pub const EVIDENCE_MARKERS: &[&str] = &[
    "benchmark",
    "evaluation",
    "metrics",
    "data",
    "report",
    "study",
    "paper",
    "评测",
    "评估",
    "指标",
    "数据",
    "报告",
    "论文",
];

pub const RISK_MARKERS: &[&str] = &[
    "risk",
    "risks",
    "limitation",
    "limitations",
    "criticism",
    "criticisms",
    "tradeoff",
    "trade-offs",
    "争议",
    "风险",
    "局限",
    "缺点",
    "问题",
];

pub const IMPLEMENTATION_MARKERS: &[&str] = &[
    "implementation",
    "how to",
    "best practices",
    "case study",
    "architecture",
    "playbook",
    "实践",
    "案例",
    "最佳实践",
    "架构",
    "落地",
];

/// Closed set of the five coverage dimensions (spec §4.5).
pub const QUERY_DIMENSIONS: &[&str] = &["freshness", "official", "evidence", "risk", "implementation"];

pub(crate) fn contains_any_case_insensitive(text: &str, markers: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    markers.iter().any(|m| lowered.contains(m))
}

pub(crate) fn contains_any_raw(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}
