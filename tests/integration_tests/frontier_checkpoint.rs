//! Frontier checkpoint lifecycle through the worker loop
//!
//! Covers what happens to a domain's frontier reference when the checkpoint
//! store misbehaves:
//! 1. Missing or corrupt checkpoints fall back to a fresh start
//! 2. An unavailable store parks domains without a resumable frontier
//! 3. Checkpoints are keyed per run and overwritten, not merged

use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use crawl_lease::error::Error;
use crawl_lease::frontier::{checkpoint_id, CheckpointManager, FrontierStore};
use crawl_lease::models::{Domain, DomainStatus, FrontierEntry};
use crawl_lease::worker::{StartPoint, Worker, WorkerSettings};

use crate::common::{frontier, pages, Harness, Script, ScriptedEngine};

fn settings() -> WorkerSettings {
    let mut settings = WorkerSettings::new("w1");
    settings.batch_size = 1;
    settings.maintenance_interval = Duration::ZERO;
    settings
}

/// An `active` row pointing at `checkpoint`
async fn parked_with_checkpoint(h: &Harness, name: &str, checkpoint: &str) -> Domain {
    let mut domain = Domain::new(name, crawl_lease::clock::Clock::now(h.clock.as_ref()));
    domain.status = DomainStatus::Active;
    domain.frontier_checkpoint_id = Some(checkpoint.to_string());
    domain.frontier_size = 2;
    h.catalog.insert(domain.clone()).await;
    domain
}

#[tokio::test]
async fn test_corrupt_checkpoint_restarts_from_root() {
    let h = Harness::new();
    let id = checkpoint_id("broken.test", Uuid::new_v4());
    parked_with_checkpoint(&h, "broken.test", &id).await;

    let key = h.checkpoints().key(&id);
    h.frontier
        .insert_raw(&key, vec![("https://broken.test/a".to_string(), -1.0)])
        .await;

    let engine = ScriptedEngine::new();
    engine.script("broken.test", Script::drain(pages("broken.test", 1)));
    let (_stop, rx) = watch::channel(false);
    let report = Worker::new(h.claims(), h.checkpoints(), engine.clone(), settings())
        .run(rx)
        .await
        .unwrap();
    assert_eq!(report.domains_released, 1);

    assert_eq!(engine.jobs()[0].start, StartPoint::Root);
    assert_eq!(h.frontier.key_count().await, 0, "corrupt key is removed");

    let row = h.domain("broken.test").await;
    assert_eq!(row.frontier_checkpoint_id, None);
    // fresh start counts the root again
    assert_eq!(row.pages_discovered, 1 + 2);
    assert_eq!(row.status, DomainStatus::Exhausted);
}

#[tokio::test]
async fn test_missing_checkpoint_restarts_from_root() {
    let h = Harness::new();
    let id = checkpoint_id("expired.test", Uuid::new_v4());
    parked_with_checkpoint(&h, "expired.test", &id).await;

    let engine = ScriptedEngine::new();
    let (_stop, rx) = watch::channel(false);
    Worker::new(h.claims(), h.checkpoints(), engine.clone(), settings())
        .run(rx)
        .await
        .unwrap();

    assert_eq!(engine.jobs()[0].start, StartPoint::Root);
    assert_eq!(h.domain("expired.test").await.frontier_checkpoint_id, None);
}

#[tokio::test]
async fn test_unavailable_store_parks_without_checkpoint() {
    let h = Harness::new();
    h.insert("budget.test", 0, 2).await;
    h.frontier.set_unavailable(true);

    let engine = ScriptedEngine::new();
    engine.script(
        "budget.test",
        Script {
            pages: pages("budget.test", 5),
            pending: frontier("budget.test", 3),
            ..Default::default()
        },
    );
    let (_stop, rx) = watch::channel(false);
    let report = Worker::new(h.claims(), h.checkpoints(), engine.clone(), settings())
        .run(rx)
        .await
        .unwrap();
    assert_eq!(report.domains_released, 1);

    let row = h.domain("budget.test").await;
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.pages_crawled, 2);
    assert_eq!(row.frontier_checkpoint_id, None);
    assert_eq!(row.frontier_size, 0);
}

#[tokio::test]
async fn test_disabled_checkpoints_still_crawl() {
    let h = Harness::new();
    h.insert("plain.test", 0, 1000).await;

    let engine = ScriptedEngine::new();
    engine.script("plain.test", Script::drain(pages("plain.test", 3)));
    let (_stop, rx) = watch::channel(false);
    let report = Worker::new(h.claims(), CheckpointManager::disabled(), engine.clone(), settings())
        .run(rx)
        .await
        .unwrap();

    assert_eq!(report.pages_crawled, 3);
    assert_eq!(h.domain("plain.test").await.status, DomainStatus::Exhausted);
}

#[tokio::test]
async fn test_save_replaces_previous_entries() {
    let h = Harness::new();
    let checkpoints = h.checkpoints();
    let run_id = Uuid::new_v4();

    let first = checkpoints
        .save_checkpoint("a.test", run_id, &frontier("a.test", 5))
        .await
        .unwrap();
    let second = checkpoints
        .save_checkpoint("a.test", run_id, &[FrontierEntry::new("https://a.test/only", 7)])
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(second, format!("a.test:{run_id}"));

    let key = checkpoints.key(&second);
    assert_eq!(key, format!("test:frontier:a.test:{run_id}"));
    assert_eq!(h.frontier.size(&key).await.unwrap(), 1);

    let loaded = checkpoints.load_checkpoint(&second).await.unwrap().unwrap();
    assert_eq!(loaded, vec![FrontierEntry::new("https://a.test/only", 7)]);

    checkpoints.delete_checkpoint(&second).await.unwrap();
    assert_eq!(checkpoints.load_checkpoint(&second).await.unwrap(), None);
    // deleting twice is fine
    checkpoints.delete_checkpoint(&second).await.unwrap();
}

#[tokio::test]
async fn test_store_errors_surface_from_explicit_operations() {
    let h = Harness::new();
    let checkpoints = h.checkpoints();
    h.frontier.set_unavailable(true);

    let err = checkpoints
        .save_checkpoint("a.test", Uuid::new_v4(), &frontier("a.test", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable { .. }));
    assert!(err.is_recoverable());
    assert!(!h.frontier.health_check().await.unwrap());

    assert_eq!(checkpoints.resume("a.test:whatever").await, None);
}
