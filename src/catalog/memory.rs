//! In-process catalog
//!
//! One mutex guards the whole table, so every method is trivially atomic and
//! concurrent claimers serialize instead of skipping locked rows; the
//! observable outcome (no row claimed twice) is the same as the PostgreSQL
//! store. Time comes from an injectable [`Clock`] so tests can step past
//! lease expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::lifecycle::validate_transition;
use super::{claim_order, DomainCatalog};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::models::{
    ClaimedDomain, ClaimedUpdate, CounterDelta, CrawlRun, Domain, DomainFilter, DomainStatus,
    FrontierUpdate, NewDomain, ReleaseOutcome, ReleaseRequest, RunStatus, StatusSummary,
    WorkerClaims,
};
use crate::priority::{PriorityInput, PriorityScore};

#[derive(Default)]
struct State {
    domains: HashMap<Uuid, Domain>,
    by_name: HashMap<String, Uuid>,
    runs: HashMap<Uuid, CrawlRun>,
}

impl State {
    fn by_name_mut(&mut self, name: &str) -> Option<&mut Domain> {
        let id = *self.by_name.get(name)?;
        self.domains.get_mut(&id)
    }
}

/// Catalog held entirely in memory
pub struct MemoryCatalog {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    /// Insert a fully-formed row, replacing any row with the same name
    pub async fn insert(&self, domain: Domain) {
        let mut state = self.state.lock().await;
        if let Some(old) = state.by_name.insert(domain.name.clone(), domain.id) {
            state.domains.remove(&old);
        }
        state.domains.insert(domain.id, domain);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.domains.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn lease_end(now: DateTime<Utc>, lease: Duration) -> Result<DateTime<Utc>> {
        chrono::Duration::from_std(lease)
            .map(|d| now + d)
            .map_err(|e| Error::config(format!("lease out of range: {e}")))
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DomainCatalog for MemoryCatalog {
    async fn upsert_domain(&self, new: &NewDomain) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.by_name.contains_key(&new.name) {
            return Ok(false);
        }
        let mut domain = Domain::new(new.name.clone(), now);
        domain.source = new.source.clone();
        domain.seed_rank = new.seed_rank;
        state.by_name.insert(domain.name.clone(), domain.id);
        state.domains.insert(domain.id, domain);
        Ok(true)
    }

    async fn get_domain(&self, id: Uuid) -> Result<Option<Domain>> {
        Ok(self.state.lock().await.domains.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Domain>> {
        let state = self.state.lock().await;
        Ok(state
            .by_name
            .get(name)
            .and_then(|id| state.domains.get(id))
            .cloned())
    }

    async fn list_domains(&self, filter: &DomainFilter) -> Result<Vec<Domain>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Domain> = state
            .domains
            .values()
            .filter(|d| filter.status.map_or(true, |s| d.status == s))
            .filter(|d| {
                filter
                    .claimed_by
                    .as_deref()
                    .map_or(true, |w| d.claimed_by.as_deref() == Some(w))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.priority_score
                .cmp(&a.priority_score)
                .then_with(|| a.name.cmp(&b.name))
        });
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn status_summary(&self) -> Result<Vec<StatusSummary>> {
        let state = self.state.lock().await;
        let mut summaries = Vec::new();
        for status in DomainStatus::ALL {
            let rows: Vec<&Domain> = state
                .domains
                .values()
                .filter(|d| d.status == status)
                .collect();
            if rows.is_empty() {
                continue;
            }
            let pages: i64 = rows.iter().map(|d| d.pages_crawled).sum();
            summaries.push(StatusSummary {
                status,
                count: rows.len() as i64,
                avg_pages_crawled: pages as f64 / rows.len() as f64,
                total_images_stored: rows.iter().map(|d| d.images_stored).sum(),
            });
        }
        Ok(summaries)
    }

    async fn active_claims(&self) -> Result<Vec<WorkerClaims>> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let mut grouped: HashMap<String, WorkerClaims> = HashMap::new();
        for domain in state.domains.values().filter(|d| d.has_live_claim(now)) {
            let (Some(worker), Some(expiry)) = (&domain.claimed_by, domain.claim_expires_at)
            else {
                continue;
            };
            grouped
                .entry(worker.clone())
                .and_modify(|c| {
                    c.count += 1;
                    c.earliest_expiry = c.earliest_expiry.min(expiry);
                    c.latest_expiry = c.latest_expiry.max(expiry);
                })
                .or_insert_with(|| WorkerClaims {
                    worker_id: worker.clone(),
                    count: 1,
                    earliest_expiry: expiry,
                    latest_expiry: expiry,
                });
        }
        let mut claims: Vec<WorkerClaims> = grouped.into_values().collect();
        claims.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.worker_id.cmp(&b.worker_id)));
        Ok(claims)
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedDomain>> {
        let now = self.clock.now();
        let expires = Self::lease_end(now, lease)?;
        let mut state = self.state.lock().await;

        let mut candidates: Vec<&Domain> = state
            .domains
            .values()
            .filter(|d| d.status.is_claimable())
            .filter(|d| d.next_crawl_after.map_or(true, |t| t <= now))
            .filter(|d| !d.has_live_claim(now))
            .collect();
        candidates.sort_by(|a, b| claim_order(a, b));
        let ids: Vec<Uuid> = candidates.iter().take(batch_size).map(|d| d.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(domain) = state.domains.get_mut(&id) else {
                continue;
            };
            let pre_claim_version = domain.version;
            domain.claimed_by = Some(worker_id.to_string());
            domain.claim_expires_at = Some(expires);
            domain.status = DomainStatus::Active;
            domain.version += 1;
            domain.updated_at = now;
            claimed.push(ClaimedDomain {
                domain: domain.clone(),
                pre_claim_version,
            });
        }
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        domain_id: Uuid,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<i64>> {
        let now = self.clock.now();
        let expires = Self::lease_end(now, lease)?;
        let mut state = self.state.lock().await;
        let Some(domain) = state.domains.get_mut(&domain_id) else {
            return Ok(None);
        };
        if !domain.is_claimed_by(worker_id, now) {
            return Ok(None);
        }
        domain.claim_expires_at = Some(expires);
        domain.version += 1;
        domain.updated_at = now;
        Ok(Some(domain.version))
    }

    async fn update_claimed(
        &self,
        domain_id: Uuid,
        worker_id: &str,
        update: &ClaimedUpdate,
    ) -> Result<Option<i64>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(domain) = state.domains.get_mut(&domain_id) else {
            return Ok(None);
        };
        if !domain.is_claimed_by(worker_id, now) {
            return Ok(None);
        }
        update.delta.apply_to(domain);
        if update.delta.pages_crawled > 0 {
            domain.last_crawled_at = Some(now);
        }
        if update.clear_frontier {
            domain.frontier_checkpoint_id = None;
            domain.frontier_size = 0;
        }
        domain.version += 1;
        domain.updated_at = now;
        Ok(Some(domain.version))
    }

    async fn release_claim(&self, request: &ReleaseRequest) -> Result<ReleaseOutcome> {
        let now = self.clock.now();
        let next_crawl_after = request
            .cooldown
            .map(|c| Self::lease_end(now, c))
            .transpose()?;
        let mut state = self.state.lock().await;
        let Some(domain) = state.domains.get_mut(&request.domain_id) else {
            return Ok(ReleaseOutcome::NotFound);
        };
        if domain.claimed_by.as_deref() != Some(request.worker_id.as_str()) {
            return Ok(ReleaseOutcome::ClaimLost);
        }
        if domain.version != request.expected_version {
            return Ok(ReleaseOutcome::VersionConflict {
                current: domain.version,
            });
        }
        validate_transition(domain.status, request.final_status)?;

        request.delta.apply_to(domain);
        domain.status = request.final_status;
        domain.claimed_by = None;
        domain.claim_expires_at = None;
        domain.last_crawled_at = Some(now);
        domain.next_crawl_after = next_crawl_after;
        if request.crawl_run_id.is_some() {
            domain.last_crawl_run_id = request.crawl_run_id;
        }
        match &request.block_reason {
            Some(reason) => {
                domain.block_reason_code = Some(reason.code);
                domain.block_reason = Some(reason.detail.clone());
                domain.first_blocked_at.get_or_insert(now);
            }
            None => {
                domain.block_reason_code = None;
                domain.block_reason = None;
            }
        }
        match &request.frontier {
            FrontierUpdate::Keep => {}
            FrontierUpdate::Set {
                checkpoint_id,
                size,
            } => {
                domain.frontier_checkpoint_id = Some(checkpoint_id.clone());
                domain.frontier_size = *size;
            }
            FrontierUpdate::Clear => {
                domain.frontier_checkpoint_id = None;
                domain.frontier_size = 0;
            }
        }
        domain.version += 1;
        domain.updated_at = now;
        Ok(ReleaseOutcome::Released {
            version: domain.version,
        })
    }

    async fn transition_status(
        &self,
        domain_id: Uuid,
        from: DomainStatus,
        to: DomainStatus,
        worker_id: Option<&str>,
        expected_version: i64,
    ) -> Result<bool> {
        validate_transition(from, to)?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(domain) = state.domains.get_mut(&domain_id) else {
            return Ok(false);
        };
        let owner_ok = worker_id.map_or(true, |w| domain.claimed_by.as_deref() == Some(w));
        if domain.status != from || !owner_ok || domain.version != expected_version {
            return Ok(false);
        }
        domain.status = to;
        domain.version += 1;
        domain.updated_at = now;
        Ok(true)
    }

    async fn expire_stale_claims(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut cleared = 0;
        for domain in state.domains.values_mut() {
            let stale = domain.claimed_by.is_some()
                && domain.claim_expires_at.map_or(true, |t| t <= now);
            if stale {
                domain.claimed_by = None;
                domain.claim_expires_at = None;
                domain.version += 1;
                domain.updated_at = now;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn force_release(&self, worker_id: Option<&str>) -> Result<u64> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut cleared = 0;
        for domain in state.domains.values_mut() {
            let Some(holder) = domain.claimed_by.as_deref() else {
                continue;
            };
            if worker_id.is_some_and(|w| w != holder) {
                continue;
            }
            domain.claimed_by = None;
            domain.claim_expires_at = None;
            domain.version += 1;
            domain.updated_at = now;
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn requeue_cooled_down(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut requeued = 0;
        for domain in state.domains.values_mut() {
            let parked = matches!(
                domain.status,
                DomainStatus::Exhausted | DomainStatus::Blocked | DomainStatus::Unreachable
            );
            let due = domain.next_crawl_after.is_some_and(|t| t <= now);
            let permanent = domain.block_reason_code.is_some_and(|c| c.is_permanent());
            if parked && due && !permanent && domain.claimed_by.is_none() {
                domain.status = DomainStatus::Pending;
                domain.version += 1;
                domain.updated_at = now;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn reset_to_pending(&self, name: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(domain) = state.by_name_mut(name) else {
            return Ok(false);
        };
        domain.status = DomainStatus::Pending;
        domain.claimed_by = None;
        domain.claim_expires_at = None;
        domain.next_crawl_after = None;
        domain.block_reason_code = None;
        domain.block_reason = None;
        domain.consecutive_error_count = 0;
        domain.version += 1;
        domain.updated_at = now;
        Ok(true)
    }

    async fn priority_inputs(&self) -> Result<Vec<PriorityInput>> {
        let state = self.state.lock().await;
        Ok(state
            .domains
            .values()
            .filter(|d| !matches!(d.status, DomainStatus::Blocked | DomainStatus::Unreachable))
            .map(|d| PriorityInput {
                domain_id: d.id,
                pages_discovered: d.pages_discovered,
                pages_crawled: d.pages_crawled,
                images_found: d.images_found,
                images_stored: d.images_stored,
                total_error_count: d.total_error_count,
                last_crawled_at: d.last_crawled_at,
                seed_rank: d.seed_rank,
            })
            .collect())
    }

    async fn store_priorities(&self, scores: &[PriorityScore]) -> Result<u64> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for score in scores {
            if let Some(domain) = state.domains.get_mut(&score.domain_id) {
                domain.image_yield_rate = score.image_yield_rate;
                domain.avg_images_per_page = score.avg_images_per_page;
                domain.error_rate = score.error_rate;
                domain.priority_score = score.priority_score;
                domain.priority_computed_at = Some(score.computed_at);
                domain.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn create_run(&self, worker_id: &str) -> Result<CrawlRun> {
        let run = CrawlRun::start(worker_id, self.clock.now());
        self.state.lock().await.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn record_run_progress(&self, run_id: Uuid, delta: &CounterDelta) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::other(format!("crawl run not found: {run_id}")))?;
        run.record(delta, now);
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::other(format!("crawl run not found: {run_id}")))?;
        run.status = status;
        run.completed_at = Some(now);
        run.updated_at = now;
        run.error_message = error_message.map(str::to_string);
        Ok(())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<CrawlRun>> {
        let state = self.state.lock().await;
        let mut runs: Vec<CrawlRun> = state.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn fail_stale_runs(&self, older_than: Duration) -> Result<Vec<Uuid>> {
        let now = self.clock.now();
        // an age past the representable range means no run is that old
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };
        let mut state = self.state.lock().await;
        let mut failed = Vec::new();
        for run in state.runs.values_mut() {
            if run.status == RunStatus::Running && run.updated_at < cutoff {
                run.status = RunStatus::Failed;
                run.completed_at = Some(now);
                run.updated_at = now;
                run.error_message = Some("no activity before stale cutoff".to_string());
                failed.push(run.id);
            }
        }
        Ok(failed)
    }
}
