//! Boundary to the external crawl engine
//!
//! The engine fetches pages; the worker only owns scheduling. On `open` it
//! receives the domain and where to start, then reports one [`PageOutcome`]
//! per fetched page. When the worker stops a domain it asks for the
//! discovered-but-unvisited URLs to checkpoint them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{BlockReason, BlockReasonCode, DomainStatus, FrontierEntry};

/// Where a domain crawl begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPoint {
    /// Fresh crawl from the domain root
    Root,
    /// Resume from a consumed checkpoint
    Resume(Vec<FrontierEntry>),
}

impl StartPoint {
    pub fn is_resume(&self) -> bool {
        matches!(self, Self::Resume(_))
    }
}

/// Everything the engine needs to start one domain
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub domain_id: Uuid,
    pub domain: String,
    pub start: StartPoint,
    /// Pages the worker will request before parking the domain
    pub page_budget: u64,
}

/// Failure classes that decide `blocked` vs `unreachable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Dns,
    Connect,
    Timeout,
    /// Non-success HTTP status
    Http(u16),
    /// Page disallowed by robots.txt
    Robots,
    Other,
}

impl FailureKind {
    /// DNS, connect and timeout failures point at connectivity
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Dns | Self::Connect | Self::Timeout)
    }

    /// Status and reason to park a domain with after repeated failures
    pub fn parked_status(&self) -> (DomainStatus, BlockReasonCode) {
        match self {
            k if k.is_connectivity() => (DomainStatus::Unreachable, BlockReasonCode::Connectivity),
            Self::Http(401) | Self::Http(403) => {
                (DomainStatus::Blocked, BlockReasonCode::HttpForbidden)
            }
            Self::Robots => (DomainStatus::Blocked, BlockReasonCode::RobotsDisallowed),
            _ => (DomainStatus::Blocked, BlockReasonCode::ErrorThreshold),
        }
    }
}

/// Result of fetching one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PageResult {
    Success {
        images_found: u64,
        images_stored: u64,
        /// New in-domain URLs added to the frontier
        urls_discovered: u64,
    },
    Failure { kind: FailureKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOutcome {
    pub url: String,
    #[serde(flatten)]
    pub result: PageResult,
}

impl PageOutcome {
    pub fn success(url: impl Into<String>, images_found: u64, images_stored: u64, urls_discovered: u64) -> Self {
        Self {
            url: url.into(),
            result: PageResult::Success {
                images_found,
                images_stored,
                urls_discovered,
            },
        }
    }

    pub fn failure(url: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            url: url.into(),
            result: PageResult::Failure { kind },
        }
    }
}

/// Engine request to stop a domain immediately
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSignal {
    pub reason: BlockReason,
}

impl StopSignal {
    pub fn new(code: BlockReasonCode, detail: impl Into<String>) -> Self {
        Self {
            reason: BlockReason::new(code, detail),
        }
    }

    pub fn status(&self) -> DomainStatus {
        match self.reason.code {
            BlockReasonCode::Connectivity => DomainStatus::Unreachable,
            _ => DomainStatus::Blocked,
        }
    }
}

/// Starts domain crawls
#[async_trait]
pub trait CrawlEngine: Send + Sync {
    async fn open(&self, job: CrawlJob) -> Result<Box<dyn DomainCrawl>>;
}

/// One in-progress domain crawl
#[async_trait]
pub trait DomainCrawl: Send {
    /// Fetch the next page; `None` once the frontier is drained
    async fn next_page(&mut self) -> Result<Option<PageOutcome>>;

    /// Discovered-but-unvisited URLs
    fn pending(&self) -> Vec<FrontierEntry>;

    /// Set when the engine decides the domain must stop (robots, takedown)
    fn stop_signal(&self) -> Option<StopSignal> {
        None
    }
}
