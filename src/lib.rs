//! crawl-lease - domain scheduling and claim coordination for crawl workers
//!
//! Many independent worker processes share one domain catalog. Each worker
//! claims a batch of domains under a time-boxed lease, crawls them through an
//! external engine, flushes progress as additive deltas and releases each
//! domain with its next lifecycle state. Frontier checkpoints let a domain
//! resume where the last session stopped.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`catalog`] - Domain catalog trait, PostgreSQL and in-memory stores
//! - [`claim`] - Lease protocol: claim, renew, release, expire, force-release
//! - [`priority`] - Claim ordering scores
//! - [`frontier`] - Frontier checkpoints (Redis)
//! - [`worker`] - Worker scheduling loop and the crawl engine boundary
//! - [`control`] - Operator HTTP API
//! - [`seeds`] - Seed-file ingestion
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use crawl_lease::prelude::*;
//!
//! # async fn example(engine: Arc<dyn CrawlEngine>) -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let catalog: SharedCatalog = Arc::new(PgCatalog::connect(&config.catalog).await?);
//! let claims = ClaimManager::new(catalog, ClaimSettings::from(&config.claims));
//! let checkpoints = CheckpointManager::from_config(&config.frontier).await;
//!
//! let worker = Worker::new(claims, checkpoints, engine, WorkerSettings::from_config(&config));
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! let report = worker.run(shutdown).await?;
//! println!("released {} domains", report.domains_released);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod claim;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod frontier;
pub mod metrics;
pub mod models;
pub mod priority;
pub mod seeds;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::{DomainCatalog, MemoryCatalog, PgCatalog, SharedCatalog};
    pub use crate::claim::{ClaimManager, ClaimSettings, ForceReleaseScope, ReleaseAttempt};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::frontier::{CheckpointManager, FrontierStore};
    pub use crate::models::{
        BlockReason, BlockReasonCode, CounterDelta, Domain, DomainStatus, FrontierEntry,
        ReleaseRequest,
    };
    pub use crate::priority::PriorityCalculator;
    pub use crate::worker::{
        CrawlEngine, CrawlJob, DomainCrawl, PageOutcome, Worker, WorkerReport, WorkerSettings,
    };
}

pub use error::{Error, Result};
pub use models::{Domain, DomainStatus};
