//! Frontier checkpoints: persisted snapshots of a domain's pending URLs
//!
//! A checkpoint is keyed by `(domain, run_id)` and stored as one sorted
//! collection (member = URL, score = discovery depth) with a retention TTL.
//! Resume consumes a checkpoint: it is loaded once and deleted, so it can
//! never be replayed.
//!
//! Checkpoint storage is optional. [`CheckpointManager`] offers strict
//! operations that surface errors, plus `try_save` / `resume`, which log and
//! degrade to "no resume" when the store is unavailable or the data is bad.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::FrontierConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::FrontierEntry;

pub use self::memory::MemoryFrontierStore;
pub use self::redis::RedisFrontierStore;

/// Raw keyed storage for checkpoint entries
#[async_trait]
pub trait FrontierStore: Send + Sync {
    /// Replace whatever is stored under `key` and set its expiry
    async fn save(&self, key: &str, entries: &[FrontierEntry], ttl: Duration) -> Result<()>;

    /// Every `(member, score)` pair under `key`; empty when absent
    async fn load(&self, key: &str) -> Result<Vec<(String, f64)>>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn size(&self, key: &str) -> Result<u64>;

    async fn health_check(&self) -> Result<bool>;
}

/// `{domain}:{run_id}`
pub fn checkpoint_id(domain: &str, run_id: Uuid) -> String {
    format!("{domain}:{run_id}")
}

/// Validate raw store entries
pub fn decode_entries(checkpoint_id: &str, raw: Vec<(String, f64)>) -> Result<Vec<FrontierEntry>> {
    let corrupt = |reason: String| Error::CheckpointCorrupt {
        checkpoint_id: checkpoint_id.to_string(),
        reason,
    };

    raw.into_iter()
        .map(|(url, score)| {
            if url.trim().is_empty() {
                return Err(corrupt("empty url".to_string()));
            }
            if !score.is_finite() || score < 0.0 || score.fract() != 0.0 || score > u32::MAX as f64
            {
                return Err(corrupt(format!("invalid depth {score} for {url}")));
            }
            Ok(FrontierEntry {
                url,
                depth: score as u32,
            })
        })
        .collect()
}

/// Checkpoint operations over an optional store
#[derive(Clone)]
pub struct CheckpointManager {
    store: Option<Arc<dyn FrontierStore>>,
    namespace: String,
    ttl: Duration,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn FrontierStore>, namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store: Some(store),
            namespace: namespace.into(),
            ttl,
        }
    }

    /// Manager with no store: saves are skipped and nothing resumes
    pub fn disabled() -> Self {
        Self {
            store: None,
            namespace: String::new(),
            ttl: Duration::ZERO,
        }
    }

    /// Connect to Redis, or run without checkpoints if that fails
    pub async fn from_config(config: &FrontierConfig) -> Self {
        if !config.enabled {
            tracing::info!("Frontier checkpoints disabled by configuration");
            return Self::disabled();
        }
        match RedisFrontierStore::try_new(config).await {
            Some(store) => Self::new(
                Arc::new(store),
                config.namespace.clone(),
                Duration::from_secs(config.checkpoint_ttl_secs),
            ),
            None => Self::disabled(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store key for a checkpoint id
    pub fn key(&self, checkpoint_id: &str) -> String {
        if self.namespace.is_empty() {
            format!("frontier:{checkpoint_id}")
        } else {
            format!("{}:frontier:{checkpoint_id}", self.namespace)
        }
    }

    fn store(&self) -> Result<&Arc<dyn FrontierStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::frontier_unavailable("checkpoint store not configured"))
    }

    /// Persist the pending URLs for `(domain, run_id)` and return the id
    pub async fn save_checkpoint(
        &self,
        domain: &str,
        run_id: Uuid,
        entries: &[FrontierEntry],
    ) -> Result<String> {
        let store = self.store()?;
        let id = checkpoint_id(domain, run_id);
        match store.save(&self.key(&id), entries, self.ttl).await {
            Ok(()) => {
                metrics::record_checkpoint_op("save", "ok");
                tracing::debug!(checkpoint_id = %id, entries = entries.len(), "Saved checkpoint");
                Ok(id)
            }
            Err(e) => {
                metrics::record_checkpoint_op("save", "unavailable");
                Err(e)
            }
        }
    }

    /// Entries of a checkpoint; `None` when it does not exist
    pub async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Vec<FrontierEntry>>> {
        let store = self.store()?;
        let raw = match store.load(&self.key(checkpoint_id)).await {
            Ok(raw) => raw,
            Err(e) => {
                metrics::record_checkpoint_op("load", "unavailable");
                return Err(e);
            }
        };
        if raw.is_empty() {
            metrics::record_checkpoint_op("load", "missing");
            return Ok(None);
        }
        match decode_entries(checkpoint_id, raw) {
            Ok(entries) => {
                metrics::record_checkpoint_op("load", "ok");
                Ok(Some(entries))
            }
            Err(e) => {
                metrics::record_checkpoint_op("load", "corrupt");
                Err(e)
            }
        }
    }

    /// Idempotent removal
    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
        let store = self.store()?;
        match store.delete(&self.key(checkpoint_id)).await {
            Ok(_) => {
                metrics::record_checkpoint_op("delete", "ok");
                Ok(())
            }
            Err(e) => {
                metrics::record_checkpoint_op("delete", "unavailable");
                Err(e)
            }
        }
    }

    /// Save, logging and returning `None` on failure
    pub async fn try_save(
        &self,
        domain: &str,
        run_id: Uuid,
        entries: &[FrontierEntry],
    ) -> Option<String> {
        if entries.is_empty() || self.store.is_none() {
            return None;
        }
        match self.save_checkpoint(domain, run_id, entries).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(domain, error = %e, "Checkpoint save failed; frontier will not be resumable");
                None
            }
        }
    }

    /// Load and consume a checkpoint for resume
    ///
    /// Any failure means a fresh start from the root: an unavailable store or
    /// a missing key yields `None`, and a corrupt checkpoint is deleted.
    pub async fn resume(&self, checkpoint_id: &str) -> Option<Vec<FrontierEntry>> {
        if self.store.is_none() {
            tracing::debug!(checkpoint_id, "No checkpoint store; starting fresh");
            return None;
        }
        match self.load_checkpoint(checkpoint_id).await {
            Ok(Some(entries)) => {
                if let Err(e) = self.delete_checkpoint(checkpoint_id).await {
                    tracing::warn!(checkpoint_id, error = %e, "Failed to delete consumed checkpoint");
                }
                tracing::info!(checkpoint_id, entries = entries.len(), "Resuming from checkpoint");
                Some(entries)
            }
            Ok(None) => {
                tracing::warn!(checkpoint_id, "Checkpoint not found; starting fresh");
                None
            }
            Err(e @ Error::CheckpointCorrupt { .. }) => {
                tracing::warn!(error = %e, "Discarding corrupt checkpoint; starting fresh");
                let _ = self.delete_checkpoint(checkpoint_id).await;
                None
            }
            Err(e) => {
                tracing::warn!(checkpoint_id, error = %e, "Checkpoint store unavailable; starting fresh");
                None
            }
        }
    }
}
