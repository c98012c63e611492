//! Worker scheduling loop
//!
//! A worker claims a batch of domains, crawls them one at a time through the
//! external [`CrawlEngine`], flushes progress every N pages and releases each
//! domain with its final status. A spawned task renews every held lease in
//! the background.
//!
//! Nothing authoritative lives only in worker memory: the held set carries the
//! last known row version, and [`DomainProgress`] carries only the part of the
//! session's progress not yet written to the catalog. If the process dies,
//! leases expire and another worker resumes from what was flushed.
//!
//! Shutdown is cooperative and observed between pages: the current domain is
//! parked with a checkpoint and released, unstarted domains are released
//! unchanged, all within the configured grace period.

pub mod engine;
pub mod heartbeat;
pub mod session;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use crate::claim::{ClaimManager, ReleaseAttempt};
use crate::config::{Config, PolicyConfig};
use crate::error::{Error, Result};
use crate::frontier::CheckpointManager;
use crate::metrics;
use crate::models::{
    BlockReason, ClaimedDomain, Domain, DomainStatus, FrontierUpdate, ReleaseRequest, RunStatus,
};
use crate::priority::PriorityCalculator;

pub use engine::{
    CrawlEngine, CrawlJob, DomainCrawl, FailureKind, PageOutcome, PageResult, StartPoint,
    StopSignal,
};
pub use heartbeat::{HeldDomain, HeldDomains, RenewalTask};
pub use session::DomainProgress;

/// Worker loop settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub batch_size: usize,
    /// 0 disables mid-crawl flushes
    pub flush_interval_pages: u64,
    pub max_pages_per_run: u64,
    pub continuous: bool,
    pub idle_poll: Duration,
    pub shutdown_grace: Duration,
    /// 0 disables the maintenance tick
    pub maintenance_interval: Duration,
    pub renew_interval: Duration,
    pub recalculate_after_batch: bool,
    pub policy: PolicyConfig,
}

impl WorkerSettings {
    /// Defaults with an explicit worker id
    pub fn new(worker_id: impl Into<String>) -> Self {
        let mut settings = Self::from_config(&Config::default());
        settings.worker_id = worker_id.into();
        settings
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_id: config.worker.resolved_worker_id(),
            batch_size: config.worker.batch_size,
            flush_interval_pages: config.worker.flush_interval_pages,
            max_pages_per_run: config.worker.max_pages_per_run,
            continuous: config.worker.continuous,
            idle_poll: config.worker.idle_poll(),
            shutdown_grace: config.worker.shutdown_grace(),
            maintenance_interval: config.worker.maintenance_interval(),
            renew_interval: config.claims.renew_interval(),
            recalculate_after_batch: config.worker.recalculate_after_batch,
            policy: config.policy.clone(),
        }
    }

    fn cooldown_for(&self, status: DomainStatus) -> Option<Duration> {
        let secs = match status {
            DomainStatus::Blocked => self.policy.blocked_cooldown_secs,
            DomainStatus::Unreachable => self.policy.unreachable_cooldown_secs,
            DomainStatus::Exhausted => self.policy.exhausted_refresh_secs,
            DomainStatus::Pending | DomainStatus::Active => 0,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

/// Summary of one worker session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub run_id: Option<Uuid>,
    pub batches: u64,
    pub domains_claimed: u64,
    pub domains_released: u64,
    /// Release gave up; lease expiry recovers these
    pub domains_abandoned: u64,
    /// Lease lost mid-crawl; never released by this worker
    pub domains_lost: u64,
    pub pages_crawled: u64,
    pub shutdown: bool,
}

enum DomainEnd {
    Drained,
    Budget,
    Shutdown,
    Engine(String),
    Threshold,
    Stopped(StopSignal),
    Lost(&'static str),
}

enum Disposition {
    Released,
    Abandoned,
    Lost,
}

struct FinalState {
    status: DomainStatus,
    reason: Option<BlockReason>,
    cooldown: Option<Duration>,
    frontier: FrontierUpdate,
}

struct RunContext {
    run_id: Uuid,
    shutdown: watch::Receiver<bool>,
    grace: Duration,
    deadline: Option<Instant>,
    report: WorkerReport,
}

impl RunContext {
    fn is_shutting_down(&mut self) -> bool {
        let requested = *self.shutdown.borrow();
        if requested && self.deadline.is_none() {
            tracing::info!(grace_secs = self.grace.as_secs(), "Shutdown requested; draining held domains");
            self.deadline = Some(Instant::now() + self.grace);
            self.report.shutdown = true;
        }
        requested
    }

    /// Sleep unless shutdown arrives first; true means stop
    async fn idle(&mut self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            changed = self.shutdown.changed() => {
                if changed.is_err() {
                    tracing::info!("Shutdown channel closed; stopping");
                    self.report.shutdown = true;
                    return true;
                }
            }
        }
        self.is_shutting_down()
    }
}

/// Up to 10% extra so idle workers do not poll in lockstep
fn jittered(period: Duration) -> Duration {
    let spread = (period.as_millis() / 10) as u64;
    if spread == 0 {
        return period;
    }
    period + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Run `fut` to completion, or until `deadline` when one is set
async fn bounded<T>(deadline: Option<Instant>, fut: impl Future<Output = T>) -> Option<T> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

pub struct Worker {
    claims: ClaimManager,
    checkpoints: CheckpointManager,
    engine: Arc<dyn CrawlEngine>,
    priorities: Option<PriorityCalculator>,
    settings: WorkerSettings,
    held: HeldDomains,
}

impl Worker {
    pub fn new(
        claims: ClaimManager,
        checkpoints: CheckpointManager,
        engine: Arc<dyn CrawlEngine>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            claims,
            checkpoints,
            engine,
            priorities: None,
            settings,
            held: Arc::new(Mutex::new(Default::default())),
        }
    }

    /// Recalculate priorities after each batch
    pub fn with_priorities(mut self, calculator: PriorityCalculator) -> Self {
        self.priorities = Some(calculator);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    /// Claims currently held, shared with the renewal task
    pub fn held_domains(&self) -> HeldDomains {
        self.held.clone()
    }

    /// Run one session until the batch is done (or, in continuous mode, until
    /// shutdown is signalled)
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<WorkerReport> {
        let worker_id = self.settings.worker_id.clone();
        let run = self.claims.catalog().create_run(&worker_id).await?;
        tracing::info!(worker_id = %worker_id, run_id = %run.id, "Worker session started");

        let mut ctx = RunContext {
            run_id: run.id,
            shutdown,
            grace: self.settings.shutdown_grace,
            deadline: None,
            report: WorkerReport {
                run_id: Some(run.id),
                ..Default::default()
            },
        };

        let _renewal = heartbeat::spawn_renewal(
            self.claims.clone(),
            worker_id.clone(),
            self.held.clone(),
            self.settings.renew_interval,
        );

        let result = self.session_loop(&mut ctx).await;

        let (status, message) = match &result {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = self
            .claims
            .catalog()
            .finish_run(run.id, status, message.as_deref())
            .await
        {
            tracing::warn!(run_id = %run.id, error = %e, "Failed to close crawl run");
        }

        tracing::info!(
            worker_id = %worker_id,
            run_id = %run.id,
            status = %status,
            released = ctx.report.domains_released,
            abandoned = ctx.report.domains_abandoned,
            lost = ctx.report.domains_lost,
            pages = ctx.report.pages_crawled,
            "Worker session finished"
        );
        result.map(|()| ctx.report)
    }

    async fn session_loop(&self, ctx: &mut RunContext) -> Result<()> {
        let mut next_maintenance = Instant::now();

        loop {
            if ctx.is_shutting_down() {
                break;
            }

            if !self.settings.maintenance_interval.is_zero() && Instant::now() >= next_maintenance {
                self.maintenance().await;
                next_maintenance = Instant::now() + self.settings.maintenance_interval;
            }

            let batch = self
                .claims
                .claim_domains(&self.settings.worker_id, self.settings.batch_size)
                .await?;

            if batch.is_empty() {
                if !self.settings.continuous {
                    break;
                }
                if ctx.idle(jittered(self.settings.idle_poll)).await {
                    break;
                }
                continue;
            }

            ctx.report.batches += 1;
            ctx.report.domains_claimed += batch.len() as u64;
            self.hold(&batch).await;
            self.process_batch(batch, ctx).await;

            if self.settings.recalculate_after_batch {
                if let Some(calculator) = &self.priorities {
                    if let Err(e) = calculator.recalculate().await {
                        tracing::warn!(error = %e, "Priority recalculation failed");
                    }
                }
            }

            if !self.settings.continuous {
                break;
            }
        }
        Ok(())
    }

    async fn maintenance(&self) {
        if let Err(e) = self.claims.expire_stale_claims().await {
            tracing::warn!(error = %e, "Stale claim sweep failed");
        }
        if let Err(e) = self.claims.requeue_cooled_down().await {
            tracing::warn!(error = %e, "Cooldown requeue failed");
        }
    }

    async fn process_batch(&self, batch: Vec<ClaimedDomain>, ctx: &mut RunContext) {
        let mut queue = batch.into_iter();
        while let Some(claimed) = queue.next() {
            if ctx.is_shutting_down() {
                let unstarted: Vec<ClaimedDomain> = std::iter::once(claimed).chain(queue).collect();
                self.release_unstarted(unstarted, ctx).await;
                return;
            }
            self.crawl_domain(claimed.domain, ctx).await;
        }
    }

    // ---- held set ------------------------------------------------------------

    async fn hold(&self, batch: &[ClaimedDomain]) {
        let mut held = self.held.lock().await;
        for claimed in batch {
            held.insert(claimed.domain.id, HeldDomain::new(claimed.domain.version));
        }
        metrics::update_held_domains(&self.settings.worker_id, held.len());
    }

    async fn held_state(&self, id: Uuid) -> Option<HeldDomain> {
        self.held.lock().await.get(&id).copied()
    }

    async fn observe(&self, id: Uuid, version: i64) {
        if let Some(entry) = self.held.lock().await.get_mut(&id) {
            entry.observe(version);
        }
    }

    async fn unhold(&self, id: Uuid) {
        let mut held = self.held.lock().await;
        held.remove(&id);
        metrics::update_held_domains(&self.settings.worker_id, held.len());
    }

    async fn settle(&self, domain: &Domain, disposition: Disposition, ctx: &mut RunContext) {
        self.unhold(domain.id).await;
        match disposition {
            Disposition::Released => ctx.report.domains_released += 1,
            Disposition::Abandoned => ctx.report.domains_abandoned += 1,
            Disposition::Lost => {
                tracing::warn!(domain = %domain.name, "Stopped working domain: lease no longer held");
                ctx.report.domains_lost += 1;
            }
        }
    }

    // ---- per-domain crawl ----------------------------------------------------

    async fn crawl_domain(&self, domain: Domain, ctx: &mut RunContext) {
        let worker_id = self.settings.worker_id.as_str();
        let mut progress = DomainProgress::with_stored_streak(domain.consecutive_error_count);

        if !self.held_state(domain.id).await.is_some_and(|h| !h.lost) {
            return self.settle(&domain, Disposition::Lost, ctx).await;
        }

        let start = match &domain.frontier_checkpoint_id {
            Some(checkpoint_id) => {
                // the checkpoint belongs to whoever holds the claim, so confirm it first
                match self.claims.clear_checkpoint_ref(domain.id, worker_id).await {
                    Ok(Some(version)) => self.observe(domain.id, version).await,
                    Ok(None) => return self.settle(&domain, Disposition::Lost, ctx).await,
                    Err(e) => {
                        tracing::warn!(domain = %domain.name, error = %e, "Could not clear checkpoint reference");
                        return self.settle(&domain, Disposition::Lost, ctx).await;
                    }
                }
                self.checkpoints
                    .resume(checkpoint_id)
                    .await
                    .map_or(StartPoint::Root, StartPoint::Resume)
            }
            None => StartPoint::Root,
        };
        if !start.is_resume() {
            progress.record_discovered(1);
        }

        let budget = match domain.max_pages_per_run {
            n if n > 0 => (n as u64).min(self.settings.max_pages_per_run),
            _ => self.settings.max_pages_per_run,
        };
        tracing::info!(
            domain = %domain.name,
            resume = start.is_resume(),
            budget,
            "Starting domain crawl"
        );

        let job = CrawlJob {
            domain_id: domain.id,
            domain: domain.name.clone(),
            start,
            page_budget: budget,
        };
        let mut crawl = match self.engine.open(job).await {
            Ok(crawl) => crawl,
            Err(e) => {
                tracing::warn!(domain = %domain.name, error = %e, "Crawl engine failed to open domain");
                let state = FinalState {
                    status: domain.status,
                    reason: None,
                    cooldown: None,
                    frontier: FrontierUpdate::Keep,
                };
                let deadline = ctx.deadline;
                let disposition = bounded(deadline, self.release(&domain, state, &mut progress, Some(ctx.run_id)))
                    .await
                    .unwrap_or(Disposition::Abandoned);
                return self.settle(&domain, disposition, ctx).await;
            }
        };

        let end = loop {
            if ctx.is_shutting_down() {
                break DomainEnd::Shutdown;
            }
            if !self.held_state(domain.id).await.is_some_and(|h| !h.lost) {
                break DomainEnd::Lost("lease renewal failed");
            }
            if progress.pages() >= budget {
                break DomainEnd::Budget;
            }

            match crawl.next_page().await {
                Ok(Some(outcome)) => {
                    progress.record(&outcome);
                    ctx.report.pages_crawled += 1;

                    if progress.should_flush(self.settings.flush_interval_pages) {
                        if let Err(reason) = self.flush(domain.id, &mut progress).await {
                            break DomainEnd::Lost(reason);
                        }
                    }
                    if let Some(stop) = crawl.stop_signal() {
                        break DomainEnd::Stopped(stop);
                    }
                    if progress.threshold_crossed(self.settings.policy.error_threshold) {
                        break DomainEnd::Threshold;
                    }
                }
                Ok(None) => break DomainEnd::Drained,
                Err(e) => break DomainEnd::Engine(e.to_string()),
            }
        };

        if let DomainEnd::Lost(reason) = end {
            tracing::debug!(domain = %domain.name, reason, "Abandoning domain without release");
            return self.settle(&domain, Disposition::Lost, ctx).await;
        }

        let pending = crawl.pending();
        drop(crawl);

        let deadline = ctx.deadline;
        let run_id = ctx.run_id;
        let finished = bounded(deadline, async {
            let state = self.final_state(&domain, end, &progress, pending, run_id).await;
            self.release(&domain, state, &mut progress, Some(run_id)).await
        })
        .await;

        let disposition = finished.unwrap_or_else(|| {
            tracing::warn!(domain = %domain.name, "Shutdown grace elapsed before release");
            Disposition::Abandoned
        });
        self.settle(&domain, disposition, ctx).await;
    }

    async fn flush(
        &self,
        domain_id: Uuid,
        progress: &mut DomainProgress,
    ) -> std::result::Result<(), &'static str> {
        let delta = progress.take_unflushed();
        match self
            .claims
            .flush_progress(domain_id, &self.settings.worker_id, &delta)
            .await
        {
            Ok(Some(version)) => {
                self.observe(domain_id, version).await;
                Ok(())
            }
            Ok(None) => Err("claim lost during flush"),
            Err(e) => {
                tracing::warn!(%domain_id, error = %e, "Flush failed");
                Err("catalog unavailable during flush")
            }
        }
    }

    async fn final_state(
        &self,
        domain: &Domain,
        end: DomainEnd,
        progress: &DomainProgress,
        pending: Vec<crate::models::FrontierEntry>,
        run_id: Uuid,
    ) -> FinalState {
        // only a crawl that ran normally can prove the frontier drained
        let frontier_known = !matches!(end, DomainEnd::Engine(_));
        let (status, reason) = match end {
            DomainEnd::Drained => (DomainStatus::Exhausted, None),
            DomainEnd::Budget | DomainEnd::Shutdown => (DomainStatus::Active, None),
            DomainEnd::Engine(message) => {
                tracing::warn!(domain = %domain.name, error = %message, "Crawl engine failed mid-domain");
                (DomainStatus::Active, None)
            }
            DomainEnd::Threshold => {
                let kind = progress.last_failure().unwrap_or(FailureKind::Other);
                let (status, code) = kind.parked_status();
                let detail = format!(
                    "{} consecutive page failures, last {kind:?}",
                    progress.consecutive_failures()
                );
                (status, Some(BlockReason::new(code, detail)))
            }
            DomainEnd::Stopped(stop) => (stop.status(), Some(stop.reason)),
            DomainEnd::Lost(_) => (domain.status, None),
        };

        // an empty frontier means there is nothing left to resume
        let status = if frontier_known && status == DomainStatus::Active && pending.is_empty() {
            DomainStatus::Exhausted
        } else {
            status
        };

        let frontier = if status == DomainStatus::Exhausted || pending.is_empty() {
            FrontierUpdate::Clear
        } else {
            match self.checkpoints.try_save(&domain.name, run_id, &pending).await {
                Some(checkpoint_id) => FrontierUpdate::Set {
                    checkpoint_id,
                    size: pending.len() as i64,
                },
                None => FrontierUpdate::Clear,
            }
        };

        FinalState {
            status,
            reason,
            cooldown: self.settings.cooldown_for(status),
            frontier,
        }
    }

    async fn release(
        &self,
        domain: &Domain,
        state: FinalState,
        progress: &mut DomainProgress,
        run_id: Option<Uuid>,
    ) -> Disposition {
        let Some(held) = self.held_state(domain.id).await.filter(|h| !h.lost) else {
            return Disposition::Lost;
        };

        let request = ReleaseRequest {
            domain_id: domain.id,
            worker_id: self.settings.worker_id.clone(),
            expected_version: held.version,
            final_status: state.status,
            delta: progress.take_unflushed(),
            block_reason: state.reason,
            cooldown: state.cooldown,
            frontier: state.frontier,
            crawl_run_id: run_id,
        };

        match self.claims.release_with_retry(request).await {
            Ok(ReleaseAttempt::Released { .. }) => {
                if let Some(run_id) = run_id {
                    if let Err(e) = self
                        .claims
                        .catalog()
                        .record_run_progress(run_id, progress.total())
                        .await
                    {
                        tracing::warn!(%run_id, error = %e, "Failed to record run progress");
                    }
                }
                Disposition::Released
            }
            Ok(ReleaseAttempt::Abandoned { .. }) => Disposition::Abandoned,
            Err(e @ Error::InvalidTransition { .. }) => {
                tracing::error!(domain = %domain.name, error = %e, "Release rejected by lifecycle table");
                Disposition::Abandoned
            }
            Err(e) => {
                tracing::warn!(domain = %domain.name, error = %e, "Release failed; lease expiry will recover the domain");
                Disposition::Abandoned
            }
        }
    }

    async fn release_unstarted(&self, domains: Vec<ClaimedDomain>, ctx: &mut RunContext) {
        for claimed in domains {
            let domain = claimed.domain;
            let state = FinalState {
                status: domain.status,
                reason: None,
                cooldown: None,
                frontier: FrontierUpdate::Keep,
            };
            let mut progress = DomainProgress::new();
            let deadline = ctx.deadline;
            let disposition = bounded(deadline, self.release(&domain, state, &mut progress, None))
                .await
                .unwrap_or(Disposition::Abandoned);
            self.settle(&domain, disposition, ctx).await;
        }
    }
}
