//! Per-domain progress accounting for one crawl session
//!
//! Two deltas are tracked: the session total and the part not yet written to
//! the catalog. Flushes drain the unflushed part only, so the sum of all
//! flushes plus the final release equals the session total exactly once.

use crate::models::CounterDelta;

use super::engine::{FailureKind, PageOutcome, PageResult};

#[derive(Debug, Clone, Default)]
pub struct DomainProgress {
    total: CounterDelta,
    unflushed: CounterDelta,
    pages: u64,
    pages_since_flush: u64,
    /// `consecutive_error_count` as read at claim time
    stored_failures: u32,
    session_failures: u32,
    last_failure: Option<FailureKind>,
}

impl DomainProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue the streak persisted in the catalog
    pub fn with_stored_streak(consecutive_error_count: i64) -> Self {
        Self {
            stored_failures: u32::try_from(consecutive_error_count.max(0)).unwrap_or(u32::MAX),
            ..Self::default()
        }
    }

    /// Count URLs added to the frontier outside page results (the root)
    pub fn record_discovered(&mut self, count: u64) {
        let count = count as i64;
        self.total.pages_discovered += count;
        self.unflushed.pages_discovered += count;
    }

    /// Fold one page into both deltas
    pub fn record(&mut self, outcome: &PageOutcome) {
        let mut page = CounterDelta {
            pages_crawled: 1,
            ..Default::default()
        };
        match outcome.result {
            PageResult::Success {
                images_found,
                images_stored,
                urls_discovered,
            } => {
                page.images_found = images_found as i64;
                page.images_stored = images_stored as i64;
                page.pages_discovered = urls_discovered as i64;
                page.streak.record_success();
                self.stored_failures = 0;
                self.session_failures = 0;
            }
            PageResult::Failure { kind } => {
                page.errors = 1;
                page.streak.record_failure();
                self.session_failures += 1;
                self.last_failure = Some(kind);
            }
        }
        self.total.merge(&page);
        self.unflushed.merge(&page);
        self.pages += 1;
        self.pages_since_flush += 1;
    }

    /// Pages fetched this session
    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn should_flush(&self, interval: u64) -> bool {
        interval > 0 && self.pages_since_flush >= interval && !self.unflushed.is_empty()
    }

    /// Hand out the unflushed delta and reset the baseline
    pub fn take_unflushed(&mut self) -> CounterDelta {
        self.pages_since_flush = 0;
        std::mem::take(&mut self.unflushed)
    }

    pub fn unflushed(&self) -> &CounterDelta {
        &self.unflushed
    }

    pub fn total(&self) -> &CounterDelta {
        &self.total
    }

    /// Trailing failures in this session
    pub fn session_failures(&self) -> u32 {
        self.session_failures
    }

    /// Stored streak plus this session's trailing failures
    pub fn consecutive_failures(&self) -> u32 {
        self.stored_failures.saturating_add(self.session_failures)
    }

    /// Only a page failure can cross the threshold
    pub fn threshold_crossed(&self, threshold: u32) -> bool {
        threshold > 0 && self.session_failures > 0 && self.consecutive_failures() >= threshold
    }

    pub fn last_failure(&self) -> Option<FailureKind> {
        self.last_failure
    }
}
