//! Data models for the domain catalog, crawl runs and frontier checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Lifecycle state of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    /// Never crawled, or reset
    Pending,
    /// Partially crawled, frontier may be non-empty
    Active,
    /// Frontier fully drained
    Exhausted,
    /// Policy or error driven skip with cooldown
    Blocked,
    /// Connectivity driven skip with cooldown
    Unreachable,
}

impl DomainStatus {
    pub const ALL: [DomainStatus; 5] = [
        Self::Pending,
        Self::Active,
        Self::Exhausted,
        Self::Blocked,
        Self::Unreachable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Exhausted => "exhausted",
            Self::Blocked => "blocked",
            Self::Unreachable => "unreachable",
        }
    }

    /// Whether claim acquisition may select a domain in this state
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DomainStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "exhausted" => Ok(Self::Exhausted),
            "blocked" => Ok(Self::Blocked),
            "unreachable" => Ok(Self::Unreachable),
            other => Err(Error::other(format!("unknown domain status: {other}"))),
        }
    }
}

/// Structured cause for `blocked` / `unreachable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReasonCode {
    /// Too many consecutive page failures in one session
    ErrorThreshold,
    /// DNS, connect or timeout failures
    Connectivity,
    /// robots.txt forbids crawling the site
    RobotsDisallowed,
    /// Site answers 401/403 to the crawler
    HttpForbidden,
    /// Explicit legal takedown request
    LegalTakedown,
    /// Operator decision
    Manual,
}

impl BlockReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorThreshold => "error_threshold",
            Self::Connectivity => "connectivity",
            Self::RobotsDisallowed => "robots_disallowed",
            Self::HttpForbidden => "http_forbidden",
            Self::LegalTakedown => "legal_takedown",
            Self::Manual => "manual",
        }
    }

    /// Permanent reasons are never requeued by cooldown expiry
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::LegalTakedown | Self::Manual)
    }

    /// Codes excluded from automatic requeue, as stored strings
    pub fn permanent_codes() -> Vec<&'static str> {
        [Self::LegalTakedown, Self::Manual]
            .iter()
            .map(|c| c.as_str())
            .collect()
    }
}

impl fmt::Display for BlockReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BlockReasonCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error_threshold" => Ok(Self::ErrorThreshold),
            "connectivity" => Ok(Self::Connectivity),
            "robots_disallowed" => Ok(Self::RobotsDisallowed),
            "http_forbidden" => Ok(Self::HttpForbidden),
            "legal_takedown" => Ok(Self::LegalTakedown),
            "manual" => Ok(Self::Manual),
            other => Err(Error::other(format!("unknown block reason code: {other}"))),
        }
    }
}

/// Code plus human-readable detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReason {
    pub code: BlockReasonCode,
    pub detail: String,
}

impl BlockReason {
    pub fn new(code: BlockReasonCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// A row of the domain catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    /// Canonical domain name
    pub name: String,
    pub status: DomainStatus,
    pub block_reason_code: Option<BlockReasonCode>,
    pub block_reason: Option<String>,
    pub first_blocked_at: Option<DateTime<Utc>>,

    // Claim
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub version: i64,

    // Cumulative counters
    pub pages_discovered: i64,
    pub pages_crawled: i64,
    pub images_found: i64,
    pub images_stored: i64,
    pub total_error_count: i64,
    pub consecutive_error_count: i64,

    // Derived signals
    pub image_yield_rate: Option<f64>,
    pub avg_images_per_page: Option<f64>,
    pub error_rate: Option<f64>,
    pub priority_score: i64,
    pub priority_computed_at: Option<DateTime<Utc>>,

    // Provenance
    pub seed_rank: Option<i64>,
    pub source: Option<String>,

    // Lifecycle timestamps
    pub first_seen_at: DateTime<Utc>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub next_crawl_after: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_crawl_run_id: Option<Uuid>,

    // Frontier
    pub frontier_checkpoint_id: Option<String>,
    pub frontier_size: i64,

    /// Per-session page budget for this domain
    pub max_pages_per_run: i64,
}

/// Page budget given to newly inserted domains
pub const DEFAULT_MAX_PAGES_PER_RUN: i64 = 1000;

impl Domain {
    /// Fresh `pending` row for a newly discovered domain
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: DomainStatus::Pending,
            block_reason_code: None,
            block_reason: None,
            first_blocked_at: None,
            claimed_by: None,
            claim_expires_at: None,
            version: 0,
            pages_discovered: 0,
            pages_crawled: 0,
            images_found: 0,
            images_stored: 0,
            total_error_count: 0,
            consecutive_error_count: 0,
            image_yield_rate: None,
            avg_images_per_page: None,
            error_rate: None,
            priority_score: 0,
            priority_computed_at: None,
            seed_rank: None,
            source: None,
            first_seen_at: now,
            last_crawled_at: None,
            next_crawl_after: None,
            updated_at: now,
            last_crawl_run_id: None,
            frontier_checkpoint_id: None,
            frontier_size: 0,
            max_pages_per_run: DEFAULT_MAX_PAGES_PER_RUN,
        }
    }

    /// Whether `worker_id` holds a claim that has not expired at `now`
    pub fn is_claimed_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.claimed_by.as_deref() == Some(worker_id)
            && self.claim_expires_at.is_some_and(|t| t > now)
    }

    /// Whether any worker holds a live claim at `now`
    pub fn has_live_claim(&self, now: DateTime<Utc>) -> bool {
        self.claimed_by.is_some() && self.claim_expires_at.is_some_and(|t| t > now)
    }
}

/// Input for inserting a seed domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDomain {
    /// Already canonical name
    pub name: String,
    pub source: Option<String>,
    pub seed_rank: Option<i64>,
}

/// A row returned by claim acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedDomain {
    /// Row state after the claim was written; `domain.version` is the value
    /// later optimistic checks must assert
    pub domain: Domain,
    /// Version the row had when it was selected
    pub pre_claim_version: i64,
}

/// Running error streak carried in a delta
///
/// `reset` means at least one success happened, so the stored
/// `consecutive_error_count` becomes `trailing`. Otherwise `trailing`
/// failures are added to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStreak {
    pub reset: bool,
    pub trailing: i64,
}

impl ErrorStreak {
    pub fn record_success(&mut self) {
        self.reset = true;
        self.trailing = 0;
    }

    pub fn record_failure(&mut self) {
        self.trailing += 1;
    }

    /// Stored count after applying this streak to `current`
    pub fn apply(&self, current: i64) -> i64 {
        if self.reset {
            self.trailing
        } else {
            current + self.trailing
        }
    }
}

/// Additive progress delta for one domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub pages_discovered: i64,
    pub pages_crawled: i64,
    pub images_found: i64,
    pub images_stored: i64,
    pub errors: i64,
    pub streak: ErrorStreak,
}

impl CounterDelta {
    pub fn is_empty(&self) -> bool {
        self.pages_discovered == 0
            && self.pages_crawled == 0
            && self.images_found == 0
            && self.images_stored == 0
            && self.errors == 0
            && !self.streak.reset
            && self.streak.trailing == 0
    }

    /// Add another delta's counters into this one, chaining the error streaks
    pub fn merge(&mut self, later: &CounterDelta) {
        self.pages_discovered += later.pages_discovered;
        self.pages_crawled += later.pages_crawled;
        self.images_found += later.images_found;
        self.images_stored += later.images_stored;
        self.errors += later.errors;
        if later.streak.reset {
            self.streak = later.streak;
        } else {
            self.streak.trailing += later.streak.trailing;
        }
    }

    /// Apply the counters to a catalog row
    pub fn apply_to(&self, domain: &mut Domain) {
        domain.pages_discovered += self.pages_discovered;
        domain.pages_crawled += self.pages_crawled;
        domain.images_found += self.images_found;
        domain.images_stored += self.images_stored;
        domain.total_error_count += self.errors;
        domain.consecutive_error_count = self.streak.apply(domain.consecutive_error_count);
    }
}

/// What a release does with the domain's frontier reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontierUpdate {
    /// Leave `frontier_checkpoint_id` / `frontier_size` as they are
    #[default]
    Keep,
    /// Point at a newly saved checkpoint
    Set { checkpoint_id: String, size: i64 },
    /// Drop any reference
    Clear,
}

/// Claim-scoped incremental update used for periodic flushes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimedUpdate {
    pub delta: CounterDelta,
    /// Drop the frontier reference after a successful resume
    pub clear_frontier: bool,
}

/// Everything a release writes, conditioned on ownership and version
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRequest {
    pub domain_id: Uuid,
    pub worker_id: String,
    pub expected_version: i64,
    pub final_status: DomainStatus,
    /// Remaining unflushed delta only
    pub delta: CounterDelta,
    pub block_reason: Option<BlockReason>,
    /// Delay before the domain becomes eligible again
    pub cooldown: Option<std::time::Duration>,
    pub frontier: FrontierUpdate,
    pub crawl_run_id: Option<Uuid>,
}

impl ReleaseRequest {
    /// Release with no progress and no status change
    pub fn unchanged(domain: &Domain, worker_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain.id,
            worker_id: worker_id.into(),
            expected_version: domain.version,
            final_status: domain.status,
            delta: CounterDelta::default(),
            block_reason: None,
            cooldown: None,
            frontier: FrontierUpdate::Keep,
            crawl_run_id: None,
        }
    }
}

/// Store-level result of a conditional release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { version: i64 },
    VersionConflict { current: i64 },
    ClaimLost,
    NotFound,
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released { .. })
    }
}

/// Crawl session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::other(format!("unknown run status: {other}"))),
        }
    }
}

/// One worker's crawl session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: Uuid,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub pages_discovered: i64,
    pub pages_crawled: i64,
    pub images_found: i64,
    pub images_stored: i64,
    pub error_count: i64,
    pub domains_released: i64,
    pub error_message: Option<String>,
}

impl CrawlRun {
    pub fn start(worker_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker_id: worker_id.into(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            status: RunStatus::Running,
            pages_discovered: 0,
            pages_crawled: 0,
            images_found: 0,
            images_stored: 0,
            error_count: 0,
            domains_released: 0,
            error_message: None,
        }
    }

    pub fn record(&mut self, delta: &CounterDelta, now: DateTime<Utc>) {
        self.pages_discovered += delta.pages_discovered;
        self.pages_crawled += delta.pages_crawled;
        self.images_found += delta.images_found;
        self.images_stored += delta.images_stored;
        self.error_count += delta.errors;
        self.domains_released += 1;
        self.updated_at = now;
    }
}

/// One pending URL in a frontier checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
}

impl FrontierEntry {
    pub fn new(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            depth,
        }
    }
}

/// Filter for listing catalog rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilter {
    pub status: Option<DomainStatus>,
    pub claimed_by: Option<String>,
    pub limit: Option<usize>,
}

/// Per-status aggregate for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub status: DomainStatus,
    pub count: i64,
    pub avg_pages_crawled: f64,
    pub total_images_stored: i64,
}

/// Live claims held by one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerClaims {
    pub worker_id: String,
    pub count: i64,
    pub earliest_expiry: DateTime<Utc>,
    pub latest_expiry: DateTime<Utc>,
}
