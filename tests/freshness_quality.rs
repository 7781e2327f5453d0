//! End-to-end coverage of spec §8 scenarios 4 and 5: the freshness warning
//! fires for a time-sensitive topic with too few fresh sources, and is
//! suppressed once the run hasn't gathered enough known publish dates yet.

use deepsearch_core::config::Settings;
use deepsearch_core::query::FreshnessSummary;
use deepsearch_core::runner::QualityDiagnostics;

fn stale_freshness(known_count: u64) -> FreshnessSummary {
    FreshnessSummary {
        total_results: known_count,
        known_count,
        unknown_count: 0,
        fresh_7_count: 0,
        fresh_30_count: 0,
        stale_180_count: known_count,
        fresh_30_ratio: 0.0,
        stale_180_ratio: 1.0,
    }
}

/// Scenario 4: a time-sensitive topic ("latest ... 2026 news") with enough
/// known publish dates but a fresh-30 ratio of zero raises the literal
/// low-freshness warning, with the user-facing message naming the ratio.
#[test]
fn time_sensitive_topic_with_stale_sources_raises_warning() {
    let settings = Settings::default();
    let queries = vec!["latest news".to_string()];
    let freshness = stale_freshness(settings.deepsearch_freshness_warning_min_known as u64);

    let diagnostics = QualityDiagnostics::compute("latest AI regulation news 2026", &queries, freshness, &settings);

    assert_eq!(diagnostics.freshness_warning, "low_freshness_for_time_sensitive_query");
    let message = diagnostics.warning_message().expect("warning message should be present");
    assert!(message.contains("新鲜来源占比较低"));
}

/// Scenario 5: the same stale ratio is suppressed while fewer than
/// `deepsearch_freshness_warning_min_known` sources have a known publish
/// date — there isn't enough signal yet to justify warning the user.
#[test]
fn warning_suppressed_below_minimum_known_sources() {
    let settings = Settings::default();
    let queries = vec!["latest news".to_string()];
    let freshness = stale_freshness((settings.deepsearch_freshness_warning_min_known - 1) as u64);

    let diagnostics = QualityDiagnostics::compute("latest AI regulation news 2026", &queries, freshness, &settings);

    assert!(diagnostics.freshness_warning.is_empty());
    assert!(diagnostics.warning_message().is_none());
}

/// A topic with no time-sensitive markers never raises the warning, even
/// with an equally stale freshness profile.
#[test]
fn non_time_sensitive_topic_never_warns() {
    let settings = Settings::default();
    let queries = vec!["history of the roman aqueducts".to_string()];
    let freshness = stale_freshness(settings.deepsearch_freshness_warning_min_known as u64);

    let diagnostics = QualityDiagnostics::compute("history of the roman aqueducts", &queries, freshness, &settings);

    assert!(diagnostics.freshness_warning.is_empty());
}
