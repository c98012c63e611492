//! Common test utilities
//!
//! An in-memory catalog on a manual clock, a memory frontier store and a
//! scripted crawl engine that replays fixed page outcomes per domain.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Notify};

use crawl_lease::catalog::{DomainCatalog, MemoryCatalog, SharedCatalog};
use crawl_lease::claim::{ClaimManager, ClaimSettings};
use crawl_lease::clock::{Clock, ManualClock};
use crawl_lease::frontier::memory::MemoryFrontierStore;
use crawl_lease::frontier::CheckpointManager;
use crawl_lease::models::{Domain, FrontierEntry, NewDomain};
use crawl_lease::worker::{CrawlEngine, CrawlJob, DomainCrawl, PageOutcome, StopSignal};
use crawl_lease::{Error, Result};

/// Catalog, clock and checkpoint store wired together
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub catalog: Arc<MemoryCatalog>,
    pub frontier: Arc<MemoryFrontierStore>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        Self {
            catalog: Arc::new(MemoryCatalog::with_clock(clock.clone())),
            frontier: Arc::new(MemoryFrontierStore::new()),
            clock,
        }
    }

    pub fn shared(&self) -> SharedCatalog {
        self.catalog.clone()
    }

    pub fn claims(&self) -> ClaimManager {
        ClaimManager::new(self.shared(), ClaimSettings::default())
    }

    pub fn checkpoints(&self) -> CheckpointManager {
        CheckpointManager::new(
            self.frontier.clone(),
            "test",
            std::time::Duration::from_secs(3600),
        )
    }

    /// Seed a `pending` domain the way a seed file would
    pub async fn seed(&self, name: &str, rank: i64) -> Domain {
        self.catalog
            .upsert_domain(&NewDomain {
                name: name.to_string(),
                source: Some("test".to_string()),
                seed_rank: Some(rank),
            })
            .await
            .unwrap();
        self.domain(name).await
    }

    /// Insert a `pending` domain with a fixed priority and page budget
    pub async fn insert(&self, name: &str, priority: i64, max_pages: i64) -> Domain {
        let mut domain = Domain::new(name, self.clock.now());
        domain.priority_score = priority;
        domain.max_pages_per_run = max_pages;
        self.catalog.insert(domain.clone()).await;
        domain
    }

    pub async fn domain(&self, name: &str) -> Domain {
        self.catalog
            .find_by_name(name)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{name} not in catalog"))
    }
}

/// `n` successful pages, each finding 2 images, storing 1 and discovering 2 URLs
pub fn pages(domain: &str, n: usize) -> Vec<PageOutcome> {
    (0..n)
        .map(|i| PageOutcome::success(format!("https://{domain}/page/{i}"), 2, 1, 2))
        .collect()
}

pub fn frontier(domain: &str, n: usize) -> Vec<FrontierEntry> {
    (0..n)
        .map(|i| FrontierEntry::new(format!("https://{domain}/next/{i}"), i as u32 + 1))
        .collect()
}

/// What one `open` of a domain replays
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub pages: Vec<PageOutcome>,
    /// Reported as the unvisited frontier when the worker stops
    pub pending: Vec<FrontierEntry>,
    /// Hang forever once `pages` run out instead of draining
    pub stall: bool,
    /// Wait on the engine gate before serving this page index
    pub pause_at: Option<usize>,
    /// Send shutdown right after serving this page index
    pub shutdown_at: Option<usize>,
    /// Raise this stop signal once the page at the index has been served
    pub stop: Option<(usize, StopSignal)>,
    /// Return an engine error instead of serving this page index
    pub fail_at: Option<usize>,
}

impl Script {
    pub fn drain(pages: Vec<PageOutcome>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }
}

/// Coordination points between a test and running crawls
#[derive(Default)]
pub struct Gate {
    /// Notified when a stalling crawl runs out of pages
    pub stalled: Notify,
    /// Notified when a crawl reaches `pause_at`
    pub paused: Notify,
    /// Lets a paused crawl continue
    pub resume: Notify,
}

#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    jobs: Mutex<Vec<CrawlJob>>,
    shutdown: Mutex<Option<Arc<watch::Sender<bool>>>>,
    pub gate: Arc<Gate>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a script for the next `open` of `domain`
    pub fn script(&self, domain: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(domain.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn shutdown_with(&self, sender: Arc<watch::Sender<bool>>) {
        *self.shutdown.lock().unwrap() = Some(sender);
    }

    pub fn jobs(&self) -> Vec<CrawlJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrawlEngine for ScriptedEngine {
    async fn open(&self, job: CrawlJob) -> Result<Box<dyn DomainCrawl>> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&job.domain)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();
        self.jobs.lock().unwrap().push(job);
        Ok(Box::new(ScriptedCrawl {
            script,
            served: 0,
            paused: false,
            gate: self.gate.clone(),
            shutdown: self.shutdown.lock().unwrap().clone(),
        }))
    }
}

struct ScriptedCrawl {
    script: Script,
    served: usize,
    paused: bool,
    gate: Arc<Gate>,
    shutdown: Option<Arc<watch::Sender<bool>>>,
}

#[async_trait]
impl DomainCrawl for ScriptedCrawl {
    async fn next_page(&mut self) -> Result<Option<PageOutcome>> {
        let idx = self.served;
        if self.script.pause_at == Some(idx) && !self.paused {
            self.paused = true;
            self.gate.paused.notify_one();
            self.gate.resume.notified().await;
        }

        if self.script.fail_at == Some(idx) {
            return Err(Error::other("scripted engine failure"));
        }

        let Some(page) = self.script.pages.get(idx).cloned() else {
            if self.script.stall {
                self.gate.stalled.notify_one();
                std::future::pending::<()>().await;
            }
            return Ok(None);
        };

        self.served += 1;
        if self.script.shutdown_at == Some(idx) {
            if let Some(sender) = &self.shutdown {
                sender.send_replace(true);
            }
        }
        Ok(Some(page))
    }

    fn pending(&self) -> Vec<FrontierEntry> {
        self.script.pending.clone()
    }

    fn stop_signal(&self) -> Option<StopSignal> {
        match &self.script.stop {
            Some((at, signal)) if self.served > *at => Some(signal.clone()),
            _ => None,
        }
    }
}
