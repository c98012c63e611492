//! Domain catalog: the durable source of truth for domain identity,
//! lifecycle state, claims and cumulative progress
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        ClaimManager / PriorityCalculator / control API      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  DomainCatalog (trait)                      │
//! └─────────────────────────────────────────────────────────────┘
//!                   │                          │
//!                   ▼                          ▼
//!          ┌─────────────────┐        ┌─────────────────┐
//!          │   PostgreSQL    │        │    In-memory    │
//!          │    PgCatalog    │        │  MemoryCatalog  │
//!          └─────────────────┘        └─────────────────┘
//! ```
//!
//! Every mutating method is a single atomic operation in the store. Methods
//! that touch `status`, `claimed_by`, `claim_expires_at` or `version` are
//! meant to be called only through [`crate::claim::ClaimManager`].

pub mod canonical;
pub mod lifecycle;
pub mod memory;
pub mod postgres;
pub mod schema;

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ClaimedDomain, ClaimedUpdate, CounterDelta, CrawlRun, Domain, DomainFilter, DomainStatus,
    NewDomain, ReleaseOutcome, ReleaseRequest, RunStatus, StatusSummary, WorkerClaims,
};
use crate::priority::{PriorityInput, PriorityScore};

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

// ============================================================================
// Catalog Trait
// ============================================================================

#[async_trait]
pub trait DomainCatalog: Send + Sync {
    // ---- reads -------------------------------------------------------------

    /// Insert a domain unless its canonical name already exists
    ///
    /// Returns `true` when a row was created.
    async fn upsert_domain(&self, domain: &NewDomain) -> Result<bool>;

    async fn get_domain(&self, id: Uuid) -> Result<Option<Domain>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Domain>>;

    /// Rows matching the filter, highest priority first
    async fn list_domains(&self, filter: &DomainFilter) -> Result<Vec<Domain>>;

    async fn status_summary(&self) -> Result<Vec<StatusSummary>>;

    /// Live (unexpired) claims grouped by worker
    async fn active_claims(&self) -> Result<Vec<WorkerClaims>>;

    // ---- claim protocol ----------------------------------------------------

    /// Select and claim up to `batch_size` eligible rows without waiting on
    /// rows another caller is claiming
    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedDomain>>;

    /// Extend a live claim; `None` when the claim is no longer held
    async fn renew_claim(
        &self,
        domain_id: Uuid,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<i64>>;

    /// Apply an incremental update under a live claim; `None` when the claim
    /// is no longer held
    async fn update_claimed(
        &self,
        domain_id: Uuid,
        worker_id: &str,
        update: &ClaimedUpdate,
    ) -> Result<Option<i64>>;

    /// Conditional release; `Err(InvalidTransition)` leaves the row untouched
    async fn release_claim(&self, request: &ReleaseRequest) -> Result<ReleaseOutcome>;

    /// Checked status change asserting `from`, ownership and version
    async fn transition_status(
        &self,
        domain_id: Uuid,
        from: DomainStatus,
        to: DomainStatus,
        worker_id: Option<&str>,
        expected_version: i64,
    ) -> Result<bool>;

    /// Clear every claim whose lease has passed
    async fn expire_stale_claims(&self) -> Result<u64>;

    /// Clear claims regardless of expiry; `None` means every worker
    async fn force_release(&self, worker_id: Option<&str>) -> Result<u64>;

    /// Move parked rows whose cooldown has passed back to `pending`
    async fn requeue_cooled_down(&self) -> Result<u64>;

    /// Operator override back to `pending` from any state
    async fn reset_to_pending(&self, name: &str) -> Result<bool>;

    // ---- priorities --------------------------------------------------------

    /// Counters of every row not `blocked` / `unreachable`
    async fn priority_inputs(&self) -> Result<Vec<PriorityInput>>;

    /// Write advisory score columns; `version` is left untouched
    async fn store_priorities(&self, scores: &[PriorityScore]) -> Result<u64>;

    // ---- crawl runs --------------------------------------------------------

    async fn create_run(&self, worker_id: &str) -> Result<CrawlRun>;

    async fn record_run_progress(&self, run_id: Uuid, delta: &CounterDelta) -> Result<()>;

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn list_runs(&self, limit: usize) -> Result<Vec<CrawlRun>>;

    /// Mark `running` runs with no activity for `older_than` as failed
    async fn fail_stale_runs(&self, older_than: Duration) -> Result<Vec<Uuid>>;
}

/// Thread-safe shared catalog handle
pub type SharedCatalog = Arc<dyn DomainCatalog>;

/// Claim candidate order: `active` first, then higher priority, then least
/// recently crawled (never-crawled first)
pub(crate) fn claim_order(a: &Domain, b: &Domain) -> Ordering {
    let fresh = |d: &Domain| d.status != DomainStatus::Active;
    fresh(a)
        .cmp(&fresh(b))
        .then_with(|| b.priority_score.cmp(&a.priority_score))
        .then_with(|| a.last_crawled_at.cmp(&b.last_crawled_at))
}
