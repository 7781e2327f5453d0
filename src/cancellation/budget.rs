//! Time/token budget enforcement (spec §4.2, §9 token-estimation window).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::BudgetStopReason;

/// `max(1, len(text)/4)`, applied to query strings, result previews, and
/// generated summaries/reports (spec §4.2).
pub fn estimate_tokens(text: &str) -> u64 {
    std::cmp::max(1, (text.len() / 4) as u64)
}

/// Checked before each stage of a run: query generation, per-query search,
/// summarization, and final report (spec §4.2, §4.9).
pub struct BudgetGuard {
    start: Instant,
    max_seconds: f64,
    max_tokens: u64,
    tokens_used: AtomicU64,
}

impl BudgetGuard {
    pub fn new(max_seconds: f64, max_tokens: u64) -> Self {
        BudgetGuard { start: Instant::now(), max_seconds, max_tokens, tokens_used: AtomicU64::new(0) }
    }

    pub fn add_tokens(&self, n: u64) {
        self.tokens_used.fetch_add(n, Ordering::SeqCst);
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::SeqCst)
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// `0` means unbounded for both the time and token limits (spec §6).
    pub fn check(&self) -> Option<BudgetStopReason> {
        if self.max_seconds > 0.0 && self.elapsed_seconds() >= self.max_seconds {
            return Some(BudgetStopReason::TimeExceeded);
        }
        if self.max_tokens > 0 && self.tokens_used() >= self.max_tokens {
            return Some(BudgetStopReason::TokensExceeded);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_budget_trips_before_time_budget_when_both_could_fire() {
        let guard = BudgetGuard::new(0.0, 3);
        guard.add_tokens(estimate_tokens("a very long query that should consume token budget quickly"));
        assert_eq!(guard.check(), Some(BudgetStopReason::TokensExceeded));
    }

    #[test]
    fn zero_limits_mean_unbounded() {
        let guard = BudgetGuard::new(0.0, 0);
        guard.add_tokens(1_000_000);
        assert_eq!(guard.check(), None);
    }

    #[test]
    fn time_budget_trips_after_elapsed_exceeds_limit() {
        let guard = BudgetGuard::new(0.001, 10_000);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(guard.check(), Some(BudgetStopReason::TimeExceeded));
    }

    #[test]
    fn estimate_tokens_floors_at_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens(&"a".repeat(40)), 10);
    }
}
