//! In-process frontier store for tests and single-process embedding
//!
//! Expiry is not enforced; keys live until deleted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::FrontierStore;
use crate::error::{Error, Result};
use crate::models::FrontierEntry;

#[derive(Default)]
pub struct MemoryFrontierStore {
    keys: RwLock<HashMap<String, Vec<(String, f64)>>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryFrontierStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store arbitrary pairs, bypassing validation
    pub async fn insert_raw(&self, key: &str, pairs: Vec<(String, f64)>) {
        self.keys.write().await.insert(key.to_string(), pairs);
    }

    /// Make every call fail as if the store were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::frontier_unavailable("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl FrontierStore for MemoryFrontierStore {
    async fn save(&self, key: &str, entries: &[FrontierEntry], _ttl: Duration) -> Result<()> {
        self.check()?;
        let mut keys = self.keys.write().await;
        if entries.is_empty() {
            keys.remove(key);
            return Ok(());
        }
        // sorted-set semantics: one score per member, last write wins
        let mut members: HashMap<&str, f64> = HashMap::with_capacity(entries.len());
        for entry in entries {
            members.insert(entry.url.as_str(), entry.depth as f64);
        }
        let mut pairs: Vec<(String, f64)> = members
            .into_iter()
            .map(|(url, depth)| (url.to_string(), depth))
            .collect();
        // ZRANGE order: score, then member
        pairs.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        keys.insert(key.to_string(), pairs);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Vec<(String, f64)>> {
        self.check()?;
        Ok(self.keys.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.keys.write().await.remove(key).is_some())
    }

    async fn size(&self, key: &str) -> Result<u64> {
        self.check()?;
        Ok(self
            .keys
            .read()
            .await
            .get(key)
            .map_or(0, |pairs| pairs.len() as u64))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.check().is_ok())
    }
}
