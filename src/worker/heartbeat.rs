//! Lease renewal running beside the crawl loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::claim::ClaimManager;
use crate::metrics;

/// Last known state of a claim this worker holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldDomain {
    pub version: i64,
    /// Set when a renewal failed; the crawl loop must stop on it
    pub lost: bool,
}

impl HeldDomain {
    pub fn new(version: i64) -> Self {
        Self {
            version,
            lost: false,
        }
    }

    /// Versions only grow; keep the newest seen
    pub fn observe(&mut self, version: i64) {
        self.version = self.version.max(version);
    }
}

/// Claims shared between the crawl loop and the renewal task
pub type HeldDomains = Arc<Mutex<HashMap<Uuid, HeldDomain>>>;

/// Handle to the renewal task; aborts it when dropped
pub struct RenewalTask {
    handle: JoinHandle<()>,
}

impl RenewalTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RenewalTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Renew every held claim once per `every`, starting one period from now
pub fn spawn_renewal(
    claims: ClaimManager,
    worker_id: String,
    held: HeldDomains,
    every: Duration,
) -> RenewalTask {
    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            renew_all(&claims, &worker_id, &held).await;
        }
    });
    RenewalTask { handle }
}

/// One renewal pass over a snapshot of the held set
pub async fn renew_all(claims: &ClaimManager, worker_id: &str, held: &HeldDomains) {
    let ids: Vec<Uuid> = {
        let held = held.lock().await;
        held.iter()
            .filter(|(_, h)| !h.lost)
            .map(|(id, _)| *id)
            .collect()
    };
    if ids.is_empty() {
        return;
    }

    let mut renewed = 0usize;
    for id in ids {
        let result = claims.renew_lease(id, worker_id).await;
        let mut held = held.lock().await;
        let Some(entry) = held.get_mut(&id) else {
            continue;
        };
        match result {
            Ok(Some(version)) => {
                entry.observe(version);
                renewed += 1;
            }
            Ok(None) => entry.lost = true,
            Err(e) => {
                tracing::warn!(domain_id = %id, worker_id, error = %e, "Renewal failed; dropping domain");
                entry.lost = true;
            }
        }
    }

    let held_count = held.lock().await.len();
    metrics::update_held_domains(worker_id, held_count);
    tracing::debug!(worker_id, renewed, held = held_count, "Renewal pass complete");
}
