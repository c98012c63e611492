//! Claim manager: the lease protocol over the domain catalog
//!
//! A claim is ordinary row data (`claimed_by`, `claim_expires_at`) guarded by
//! the row's `version`. Nothing here holds a lock across a crawl: every
//! operation is one short conditional write, and a worker that stops renewing
//! simply loses ownership when its lease passes.
//!
//! # Example
//!
//! ```rust,ignore
//! let claims = ClaimManager::new(catalog.clone(), ClaimSettings::from(&config.claims));
//!
//! for claimed in claims.claim_domains("worker-1", 10).await? {
//!     // crawl, flush, then release with the post-claim version
//!     let request = ReleaseRequest::unchanged(&claimed.domain, "worker-1");
//!     claims.release_with_retry(request).await?;
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::SharedCatalog;
use crate::config::ClaimConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{
    ClaimedDomain, ClaimedUpdate, CounterDelta, DomainStatus, ReleaseOutcome, ReleaseRequest,
};

/// Lease parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimSettings {
    pub lease: Duration,
    /// Conditional release attempts before leaving the domain to lease expiry
    pub release_attempts: u32,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self::from(&ClaimConfig::default())
    }
}

impl From<&ClaimConfig> for ClaimSettings {
    fn from(config: &ClaimConfig) -> Self {
        Self {
            lease: config.lease(),
            release_attempts: config.release_attempts.max(1),
        }
    }
}

/// Who a force release applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceReleaseScope {
    /// Claims held by one worker
    Worker(String),
    /// Every claim in the catalog
    All,
}

impl ForceReleaseScope {
    fn label(&self) -> &'static str {
        match self {
            Self::Worker(_) => "worker",
            Self::All => "global",
        }
    }
}

/// Final result of a bounded release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseAttempt {
    Released { version: i64, attempts: u32 },
    /// Left for lease expiry to recover
    Abandoned { reason: String, attempts: u32 },
}

impl ReleaseAttempt {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released { .. })
    }
}

/// Sole writer of `status`, `claimed_by`, `claim_expires_at` and `version`
#[derive(Clone)]
pub struct ClaimManager {
    catalog: SharedCatalog,
    settings: ClaimSettings,
    origin: &'static str,
}

impl ClaimManager {
    pub fn new(catalog: SharedCatalog, settings: ClaimSettings) -> Self {
        Self {
            catalog,
            settings,
            origin: "worker",
        }
    }

    /// Label sweeps triggered through this manager (`worker`, `control`, `cli`)
    pub fn with_origin(mut self, origin: &'static str) -> Self {
        self.origin = origin;
        self
    }

    pub fn settings(&self) -> ClaimSettings {
        self.settings
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Claim up to `batch_size` eligible domains for `worker_id`
    ///
    /// Returns an empty batch when nothing is eligible.
    pub async fn claim_domains(
        &self,
        worker_id: &str,
        batch_size: usize,
    ) -> Result<Vec<ClaimedDomain>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let claimed = self
            .catalog
            .claim_batch(worker_id, batch_size, self.settings.lease)
            .await?;

        metrics::record_claims_acquired(worker_id, claimed.len());
        if claimed.is_empty() {
            tracing::debug!(worker_id, "No domains available to claim");
        } else {
            tracing::info!(
                worker_id,
                count = claimed.len(),
                domains = ?claimed.iter().map(|c| c.domain.name.as_str()).collect::<Vec<_>>(),
                "Claimed domain batch"
            );
        }
        Ok(claimed)
    }

    /// Extend the lease; `false` means ownership is gone
    pub async fn renew_claim(&self, domain_id: Uuid, worker_id: &str) -> Result<bool> {
        Ok(self.renew_lease(domain_id, worker_id).await?.is_some())
    }

    /// Extend the lease, returning the row's new version
    pub async fn renew_lease(&self, domain_id: Uuid, worker_id: &str) -> Result<Option<i64>> {
        match self
            .catalog
            .renew_claim(domain_id, worker_id, self.settings.lease)
            .await
        {
            Ok(Some(version)) => {
                metrics::record_renewal("renewed");
                tracing::debug!(%domain_id, worker_id, version, "Lease renewed");
                Ok(Some(version))
            }
            Ok(None) => {
                metrics::record_renewal("lost");
                tracing::warn!(%domain_id, worker_id, "Lease lost before renewal");
                Ok(None)
            }
            Err(e) => {
                metrics::record_renewal("error");
                Err(e)
            }
        }
    }

    /// Apply an unflushed delta under a live claim
    pub async fn flush_progress(
        &self,
        domain_id: Uuid,
        worker_id: &str,
        delta: &CounterDelta,
    ) -> Result<Option<i64>> {
        let update = ClaimedUpdate {
            delta: *delta,
            clear_frontier: false,
        };
        let result = self
            .catalog
            .update_claimed(domain_id, worker_id, &update)
            .await;
        match &result {
            Ok(Some(version)) => {
                metrics::record_flush("applied");
                tracing::debug!(
                    %domain_id,
                    worker_id,
                    version,
                    pages_crawled = delta.pages_crawled,
                    "Flushed progress"
                );
            }
            Ok(None) => {
                metrics::record_flush("lost");
                tracing::warn!(%domain_id, worker_id, "Flush rejected: claim no longer held");
            }
            Err(_) => metrics::record_flush("error"),
        }
        result
    }

    /// Drop the frontier reference once its checkpoint has been consumed
    pub async fn clear_checkpoint_ref(
        &self,
        domain_id: Uuid,
        worker_id: &str,
    ) -> Result<Option<i64>> {
        let update = ClaimedUpdate {
            delta: CounterDelta::default(),
            clear_frontier: true,
        };
        self.catalog
            .update_claimed(domain_id, worker_id, &update)
            .await
    }

    /// Single conditional release
    ///
    /// `Ok(false)` on a lost lease or stale version. An illegal final status is
    /// `Err(InvalidTransition)` and nothing is written.
    pub async fn release_claim(&self, request: &ReleaseRequest) -> Result<bool> {
        Ok(self.release_once(request).await?.is_released())
    }

    async fn release_once(&self, request: &ReleaseRequest) -> Result<ReleaseOutcome> {
        let outcome = match self.catalog.release_claim(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_release("error");
                return Err(e);
            }
        };
        let label = match outcome {
            ReleaseOutcome::Released { .. } => "released",
            ReleaseOutcome::VersionConflict { .. } => "conflict",
            ReleaseOutcome::ClaimLost | ReleaseOutcome::NotFound => "lost",
        };
        metrics::record_release(label);
        Ok(outcome)
    }

    /// Release, re-reading the version after conflicts up to the configured
    /// number of attempts
    pub async fn release_with_retry(&self, mut request: ReleaseRequest) -> Result<ReleaseAttempt> {
        let max_attempts = self.settings.release_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.release_once(&request).await? {
                ReleaseOutcome::Released { version } => {
                    tracing::info!(
                        domain_id = %request.domain_id,
                        worker_id = %request.worker_id,
                        status = %request.final_status,
                        version,
                        attempt,
                        "Released claim"
                    );
                    return Ok(ReleaseAttempt::Released {
                        version,
                        attempts: attempt,
                    });
                }
                ReleaseOutcome::ClaimLost => {
                    return Ok(self.abandon(&request, "claim lost", attempt));
                }
                ReleaseOutcome::NotFound => {
                    return Ok(self.abandon(&request, "domain not found", attempt));
                }
                ReleaseOutcome::VersionConflict { current } => {
                    tracing::warn!(
                        domain_id = %request.domain_id,
                        expected = request.expected_version,
                        current,
                        attempt,
                        "Release version conflict"
                    );
                    if attempt >= max_attempts {
                        return Ok(self.abandon(&request, "version conflict", attempt));
                    }
                    let Some(fresh) = self.catalog.get_domain(request.domain_id).await? else {
                        return Ok(self.abandon(&request, "domain not found", attempt));
                    };
                    if fresh.claimed_by.as_deref() != Some(request.worker_id.as_str()) {
                        return Ok(self.abandon(&request, "claim lost", attempt));
                    }
                    request.expected_version = fresh.version;
                }
            }
        }
    }

    fn abandon(&self, request: &ReleaseRequest, reason: &str, attempts: u32) -> ReleaseAttempt {
        metrics::record_release("abandoned");
        tracing::warn!(
            domain_id = %request.domain_id,
            worker_id = %request.worker_id,
            attempts,
            reason,
            "Abandoning release; lease expiry will recover the domain"
        );
        ReleaseAttempt::Abandoned {
            reason: reason.to_string(),
            attempts,
        }
    }

    /// Checked transition asserting current status, owner and version
    pub async fn transition_status(
        &self,
        domain_id: Uuid,
        from: DomainStatus,
        to: DomainStatus,
        worker_id: Option<&str>,
        expected_version: i64,
    ) -> Result<bool> {
        let applied = self
            .catalog
            .transition_status(domain_id, from, to, worker_id, expected_version)
            .await?;
        if !applied {
            tracing::debug!(%domain_id, %from, %to, expected_version, "Transition rejected");
        }
        Ok(applied)
    }

    /// Clear claims whose lease has passed; statuses are untouched
    pub async fn expire_stale_claims(&self) -> Result<u64> {
        let cleared = self.catalog.expire_stale_claims().await?;
        metrics::record_stale_claims_expired(self.origin, cleared);
        if cleared > 0 {
            tracing::info!(cleared, origin = self.origin, "Expired stale claims");
        }
        Ok(cleared)
    }

    /// Operator escape hatch; a global scope requires `confirmed`
    pub async fn force_release_claims(
        &self,
        scope: &ForceReleaseScope,
        confirmed: bool,
    ) -> Result<u64> {
        let worker = match scope {
            ForceReleaseScope::Worker(worker_id) => {
                if worker_id.trim().is_empty() {
                    return Err(Error::other("force release requires a non-empty worker id"));
                }
                Some(worker_id.as_str())
            }
            ForceReleaseScope::All if !confirmed => {
                return Err(Error::ConfirmationRequired(
                    "releasing every claim needs explicit confirmation".to_string(),
                ));
            }
            ForceReleaseScope::All => None,
        };

        let released = self.catalog.force_release(worker).await?;
        metrics::record_force_release(scope.label(), released);
        tracing::warn!(
            scope = scope.label(),
            worker_id = worker.unwrap_or("*"),
            released,
            "Force-released claims"
        );
        Ok(released)
    }

    /// Operator override back to `pending`
    pub async fn reset_to_pending(&self, name: &str) -> Result<bool> {
        let reset = self.catalog.reset_to_pending(name).await?;
        if reset {
            tracing::info!(domain = name, "Domain reset to pending");
        }
        Ok(reset)
    }

    /// Return parked domains whose cooldown passed to `pending`
    pub async fn requeue_cooled_down(&self) -> Result<u64> {
        let requeued = self.catalog.requeue_cooled_down().await?;
        if requeued > 0 {
            tracing::info!(requeued, "Requeued cooled-down domains");
        }
        Ok(requeued)
    }
}
