//! Configuration management for crawl-lease
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables. Every section has a `Default`, so a TOML file
//! only needs the keys it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Domain catalog (PostgreSQL)
    pub catalog: CatalogConfig,

    /// Frontier checkpoint store (Redis)
    pub frontier: FrontierConfig,

    /// Lease protocol
    pub claims: ClaimConfig,

    /// Worker scheduling loop
    pub worker: WorkerConfig,

    /// Blocking and cooldown policy
    pub policy: PolicyConfig,

    /// Operator HTTP surface
    pub control: ControlConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub postgres_url: String,
    pub pool_size: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            postgres_url: String::from("postgres://localhost/crawl_lease"),
            pool_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    /// Run without checkpoints when false
    pub enabled: bool,
    pub redis_url: String,
    pub pool_size: usize,
    /// Optional key prefix shared by a deployment
    pub namespace: String,
    /// Retention for unconsumed checkpoints
    pub checkpoint_ttl_secs: u64,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: String::from("redis://127.0.0.1:6379"),
            pool_size: 4,
            namespace: String::new(),
            checkpoint_ttl_secs: 86_400 * 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    pub lease_secs: u64,
    pub renew_interval_secs: u64,
    /// Release attempts before abandoning to lease expiry
    pub release_attempts: u32,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            lease_secs: 1800,
            renew_interval_secs: 600,
            release_attempts: 3,
        }
    }
}

impl ClaimConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Derived from `HOSTNAME` and the process id when unset
    pub worker_id: Option<String>,
    pub batch_size: usize,
    /// Pages between claim-scoped progress flushes; 0 disables
    pub flush_interval_pages: u64,
    pub max_pages_per_run: u64,
    /// Keep claiming after the first batch
    pub continuous: bool,
    pub idle_poll_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Expire stale claims and requeue cooled-down domains this often
    pub maintenance_interval_secs: u64,
    pub recalculate_after_batch: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            batch_size: 10,
            flush_interval_pages: 100,
            max_pages_per_run: 1000,
            continuous: false,
            idle_poll_secs: 30,
            shutdown_grace_secs: 60,
            maintenance_interval_secs: 300,
            recalculate_after_batch: true,
        }
    }
}

impl WorkerConfig {
    /// Configured id, or `{HOSTNAME}-{pid}`
    pub fn resolved_worker_id(&self) -> String {
        self.worker_id.clone().unwrap_or_else(|| {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("worker"));
            format!("{host}-{}", std::process::id())
        })
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Consecutive page failures in one session before parking the domain
    pub error_threshold: u32,
    pub blocked_cooldown_secs: u64,
    pub unreachable_cooldown_secs: u64,
    /// Delay before an exhausted domain is crawled again; 0 = never
    pub exhausted_refresh_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            error_threshold: 10,
            blocked_cooldown_secs: 86_400 * 7,
            unreachable_cooldown_secs: 86_400,
            exhausted_refresh_secs: 86_400 * 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub bind_address: String,
    pub maintenance_interval_secs: u64,
    /// Periodic priority pass; 0 disables
    pub recalculate_interval_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("127.0.0.1:8088"),
            maintenance_interval_secs: 300,
            recalculate_interval_secs: 3600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("pretty"),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// File (when given) then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(url) = env_string("CRAWL_LEASE_DATABASE_URL").or_else(|| env_string("DATABASE_URL")) {
            self.catalog.postgres_url = url;
        }
        if let Some(size) = env_parse("CRAWL_LEASE_DB_POOL_SIZE") {
            self.catalog.pool_size = size;
        }

        if let Some(url) = env_string("CRAWL_LEASE_REDIS_URL").or_else(|| env_string("REDIS_URL")) {
            self.frontier.redis_url = url;
        }
        if let Some(ns) = env_string("QUEUE_NAMESPACE") {
            self.frontier.namespace = ns;
        }
        if let Some(enabled) = env_parse("CRAWL_LEASE_CHECKPOINTS_ENABLED") {
            self.frontier.enabled = enabled;
        }
        if let Some(ttl) = env_parse("CRAWL_LEASE_CHECKPOINT_TTL_SECS") {
            self.frontier.checkpoint_ttl_secs = ttl;
        }

        if let Some(lease) = env_parse("CRAWL_LEASE_LEASE_SECS") {
            self.claims.lease_secs = lease;
        }
        if let Some(renew) = env_parse("CRAWL_LEASE_RENEW_INTERVAL_SECS") {
            self.claims.renew_interval_secs = renew;
        }

        if let Some(id) = env_string("CRAWL_LEASE_WORKER_ID") {
            self.worker.worker_id = Some(id);
        }
        if let Some(batch) = env_parse("CRAWL_LEASE_BATCH_SIZE") {
            self.worker.batch_size = batch;
        }
        if let Some(flush) = env_parse("CRAWL_LEASE_FLUSH_INTERVAL_PAGES") {
            self.worker.flush_interval_pages = flush;
        }
        if let Some(max) = env_parse("MAX_PAGES_PER_RUN") {
            self.worker.max_pages_per_run = max;
        }
        if let Some(continuous) = env_parse("CRAWL_LEASE_CONTINUOUS") {
            self.worker.continuous = continuous;
        }

        if let Some(bind) = env_string("CRAWL_LEASE_BIND") {
            self.control.bind_address = bind;
        }
        if let Some(level) = env_string("CRAWL_LEASE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_string("CRAWL_LEASE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.catalog.postgres_url.trim().is_empty() {
            anyhow::bail!("catalog.postgres_url must not be empty");
        }
        if self.catalog.pool_size == 0 {
            anyhow::bail!("catalog.pool_size must be greater than 0");
        }
        if self.frontier.enabled && self.frontier.redis_url.trim().is_empty() {
            anyhow::bail!("frontier.redis_url must not be empty when checkpoints are enabled");
        }
        if self.frontier.checkpoint_ttl_secs == 0 {
            anyhow::bail!("frontier.checkpoint_ttl_secs must be greater than 0");
        }
        if self.claims.lease_secs == 0 {
            anyhow::bail!("claims.lease_secs must be greater than 0");
        }
        if self.claims.renew_interval_secs == 0 {
            anyhow::bail!("claims.renew_interval_secs must be greater than 0");
        }
        // one missed renewal must still leave a live lease for the next tick
        if self.claims.renew_interval_secs.saturating_mul(3) > self.claims.lease_secs {
            anyhow::bail!(
                "claims.renew_interval_secs ({}) must be at most a third of claims.lease_secs ({})",
                self.claims.renew_interval_secs,
                self.claims.lease_secs
            );
        }
        if self.claims.release_attempts == 0 {
            anyhow::bail!("claims.release_attempts must be greater than 0");
        }
        if self.worker.batch_size == 0 {
            anyhow::bail!("worker.batch_size must be greater than 0");
        }
        if self.worker.max_pages_per_run == 0 {
            anyhow::bail!("worker.max_pages_per_run must be greater than 0");
        }
        if self.policy.error_threshold == 0 {
            anyhow::bail!("policy.error_threshold must be greater than 0");
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            anyhow::bail!("logging.format must be 'pretty' or 'json'");
        }
        Ok(())
    }
}
