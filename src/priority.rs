//! Priority scoring for claim candidates
//!
//! Scores only order claim candidates. A stale score gives a worse order,
//! never a correctness problem, so recomputation is a plain batch pass with
//! no coordination beyond the catalog's own atomic writes.
//!
//! ```text
//! priority_score =
//!     seed_rank
//!   + round(image_yield_rate * 1000)
//!   + min(max(pages_discovered - pages_crawled, 0), 500) * 2
//!   - round(error_rate * 500)
//!   + round(days_since(last_crawled_at) * 5)
//! ```
//!
//! Terms whose inputs are undefined contribute zero.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::SharedCatalog;
use crate::clock::Clock;
use crate::error::Result;
use crate::metrics;

const YIELD_WEIGHT: f64 = 1000.0;
const BACKLOG_CAP: i64 = 500;
const BACKLOG_WEIGHT: i64 = 2;
const ERROR_WEIGHT: f64 = 500.0;
const STALENESS_PER_DAY: f64 = 5.0;

/// Counters a score is derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityInput {
    pub domain_id: Uuid,
    pub pages_discovered: i64,
    pub pages_crawled: i64,
    pub images_found: i64,
    pub images_stored: i64,
    pub total_error_count: i64,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub seed_rank: Option<i64>,
}

/// Derived signals and score for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub domain_id: Uuid,
    pub image_yield_rate: Option<f64>,
    pub avg_images_per_page: Option<f64>,
    pub error_rate: Option<f64>,
    pub priority_score: i64,
    pub computed_at: DateTime<Utc>,
}

fn per_page(count: i64, pages_crawled: i64) -> Option<f64> {
    (pages_crawled > 0).then(|| count as f64 / pages_crawled as f64)
}

/// Score one domain as of `now`. Pure.
pub fn compute_priority(input: &PriorityInput, now: DateTime<Utc>) -> PriorityScore {
    let image_yield_rate = per_page(input.images_stored, input.pages_crawled);
    let avg_images_per_page = per_page(input.images_found, input.pages_crawled);
    let error_rate = per_page(input.total_error_count, input.pages_crawled);

    let seed = input.seed_rank.unwrap_or(0);
    let yield_bonus = image_yield_rate
        .map(|r| (r * YIELD_WEIGHT).round() as i64)
        .unwrap_or(0);
    let backlog = (input.pages_discovered - input.pages_crawled).clamp(0, BACKLOG_CAP);
    let error_penalty = error_rate
        .map(|r| (r * ERROR_WEIGHT).round() as i64)
        .unwrap_or(0);
    let staleness = input
        .last_crawled_at
        .map(|last| {
            let days = (now - last).num_seconds().max(0) as f64 / 86_400.0;
            (days * STALENESS_PER_DAY).round() as i64
        })
        .unwrap_or(0);

    PriorityScore {
        domain_id: input.domain_id,
        image_yield_rate,
        avg_images_per_page,
        error_rate,
        priority_score: seed + yield_bonus + backlog * BACKLOG_WEIGHT - error_penalty + staleness,
        computed_at: now,
    }
}

/// Summary of one recalculation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalcReport {
    pub scored: usize,
    pub updated: u64,
    pub duration_ms: u64,
}

/// Whole-table batch rescoring
pub struct PriorityCalculator {
    catalog: SharedCatalog,
    clock: Arc<dyn Clock>,
}

impl PriorityCalculator {
    pub fn new(catalog: SharedCatalog, clock: Arc<dyn Clock>) -> Self {
        Self { catalog, clock }
    }

    /// Recompute signals and scores for every domain not blocked/unreachable
    pub async fn recalculate(&self) -> Result<RecalcReport> {
        let started = Instant::now();
        let now = self.clock.now();

        let inputs = self.catalog.priority_inputs().await?;
        let scores: Vec<PriorityScore> = inputs
            .iter()
            .map(|input| compute_priority(input, now))
            .collect();
        let updated = self.catalog.store_priorities(&scores).await?;

        let elapsed = started.elapsed();
        metrics::record_priority_recalc(elapsed.as_secs_f64());

        tracing::info!(
            scored = scores.len(),
            updated,
            elapsed_ms = elapsed.as_millis() as u64,
            "Priority recalculation complete"
        );

        Ok(RecalcReport {
            scored: scores.len(),
            updated,
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}
