//! Worker scheduling loop scenarios
//!
//! Each test drives real `Worker` sessions against the in-memory catalog and
//! a scripted engine:
//! 1. Crash after a mid-crawl flush and recovery by a second worker
//! 2. Graceful shutdown with checkpoint and unstarted releases
//! 3. Page budget, checkpoint and resume
//! 4. Failure thresholds and engine stop signals
//! 5. Lease loss and background renewal

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crawl_lease::catalog::DomainCatalog;
use crawl_lease::claim::ForceReleaseScope;
use crawl_lease::clock::Clock;
use crawl_lease::models::{BlockReasonCode, Domain, DomainStatus, RunStatus};
use crawl_lease::worker::{
    FailureKind, PageOutcome, StartPoint, StopSignal, Worker, WorkerSettings,
};

use crate::common::{frontier, pages, Harness, Script, ScriptedEngine};

fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

fn settings(worker: &str) -> WorkerSettings {
    let mut settings = WorkerSettings::new(worker);
    settings.batch_size = 1;
    settings.flush_interval_pages = 100;
    settings.shutdown_grace = Duration::from_secs(5);
    settings.maintenance_interval = Duration::ZERO;
    settings
}

fn worker(h: &Harness, engine: &Arc<ScriptedEngine>, settings: WorkerSettings) -> Worker {
    Worker::new(h.claims(), h.checkpoints(), engine.clone(), settings)
}

// ============================================================================
// Crash Recovery
// ============================================================================

#[tokio::test]
async fn test_crash_after_flush_keeps_flushed_progress_exactly_once() {
    let h = Harness::new();
    h.seed("example.test", 10).await;

    let engine = ScriptedEngine::new();
    engine.script(
        "example.test",
        Script {
            pages: pages("example.test", 150),
            stall: true,
            ..Default::default()
        },
    );

    let w1 = worker(&h, &engine, settings("w1"));
    let (_stop1, rx1) = watch::channel(false);
    let handle = tokio::spawn(async move { w1.run(rx1).await });

    tokio::time::timeout(Duration::from_secs(5), engine.gate.stalled.notified())
        .await
        .expect("w1 should crawl 150 pages");

    let row = h.domain("example.test").await;
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.claimed_by.as_deref(), Some("w1"));
    assert_eq!(row.pages_crawled, 100);

    // hard stop: no release, no further renewals
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    h.clock.advance(minutes(31));
    assert_eq!(h.claims().expire_stale_claims().await.unwrap(), 1);

    let row = h.domain("example.test").await;
    assert_eq!(row.claimed_by, None);
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.pages_crawled, 100);
    assert_eq!(row.frontier_checkpoint_id, None);

    // w2 re-crawls the 50 unflushed pages and 50 new ones
    engine.script("example.test", Script::drain(pages("example.test", 100)));
    let w2 = worker(&h, &engine, settings("w2"));
    let (_stop2, rx2) = watch::channel(false);
    let report = w2.run(rx2).await.unwrap();

    assert_eq!(report.domains_claimed, 1);
    assert_eq!(report.domains_released, 1);
    assert_eq!(report.pages_crawled, 100);

    let row = h.domain("example.test").await;
    assert_eq!(row.pages_crawled, 200);
    assert_eq!(row.images_stored, 200);
    assert_eq!(row.status, DomainStatus::Exhausted);
    assert_eq!(row.claimed_by, None);
    assert_eq!(row.last_crawl_run_id, report.run_id);

    let jobs = engine.jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1].start, StartPoint::Root);
}

// ============================================================================
// Graceful Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_parks_current_domain_and_releases_the_rest() {
    let h = Harness::new();
    h.insert("first.test", 100, 1000).await;
    h.insert("second.test", 50, 1000).await;

    let (stop, rx) = watch::channel(false);
    let engine = ScriptedEngine::new();
    engine.shutdown_with(Arc::new(stop));
    engine.script(
        "first.test",
        Script {
            pages: pages("first.test", 20),
            pending: frontier("first.test", 3),
            shutdown_at: Some(4),
            ..Default::default()
        },
    );

    let mut settings = settings("w1");
    settings.batch_size = 2;
    let w1 = worker(&h, &engine, settings);
    let report = w1.run(rx).await.unwrap();

    assert!(report.shutdown);
    assert_eq!(report.domains_claimed, 2);
    assert_eq!(report.domains_released, 2);
    assert_eq!(report.domains_abandoned, 0);
    assert_eq!(report.pages_crawled, 5);
    assert!(w1.held_domains().lock().await.is_empty());

    let first = h.domain("first.test").await;
    assert_eq!(first.status, DomainStatus::Active);
    assert_eq!(first.claimed_by, None);
    assert_eq!(first.pages_crawled, 5);
    assert_eq!(first.frontier_size, 3);
    let checkpoint_id = first.frontier_checkpoint_id.expect("checkpoint saved on shutdown");
    let saved = h
        .checkpoints()
        .load_checkpoint(&checkpoint_id)
        .await
        .unwrap()
        .expect("checkpoint present");
    assert_eq!(saved, frontier("first.test", 3));

    let second = h.domain("second.test").await;
    assert_eq!(second.claimed_by, None);
    assert_eq!(second.pages_crawled, 0);
    assert_eq!(second.last_crawl_run_id, None);
    assert_eq!(engine.jobs().len(), 1);

    let runs = h.catalog.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].pages_crawled, 5);
    assert_eq!(runs[0].domains_released, 1);
}

#[tokio::test]
async fn test_continuous_worker_idles_until_shutdown() {
    let h = Harness::new();
    let engine = ScriptedEngine::new();

    let mut settings = settings("w1");
    settings.continuous = true;
    settings.idle_poll = Duration::from_millis(10);
    let w1 = worker(&h, &engine, settings);

    let (stop, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { w1.run(rx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.send(true).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stops after shutdown")
        .unwrap()
        .unwrap();
    assert!(report.shutdown);
    assert_eq!(report.batches, 0);
}

// ============================================================================
// Budget, Checkpoint and Resume
// ============================================================================

#[tokio::test]
async fn test_budget_checkpoint_then_resume() {
    let h = Harness::new();
    h.insert("deep.test", 0, 3).await;

    let engine = ScriptedEngine::new();
    engine.script(
        "deep.test",
        Script {
            pages: pages("deep.test", 10),
            pending: frontier("deep.test", 4),
            ..Default::default()
        },
    );
    engine.script("deep.test", Script::drain(pages("deep.test", 2)));

    let (_stop, rx) = watch::channel(false);
    let report = worker(&h, &engine, settings("w1")).run(rx).await.unwrap();
    assert_eq!(report.pages_crawled, 3);

    let row = h.domain("deep.test").await;
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.pages_crawled, 3);
    // root plus two URLs per page
    assert_eq!(row.pages_discovered, 7);
    assert_eq!(row.frontier_size, 4);
    assert!(row.frontier_checkpoint_id.is_some());
    assert_eq!(h.frontier.key_count().await, 1);

    let (_stop, rx) = watch::channel(false);
    worker(&h, &engine, settings("w2")).run(rx).await.unwrap();

    let jobs = engine.jobs();
    assert_eq!(jobs[0].start, StartPoint::Root);
    assert_eq!(jobs[0].page_budget, 3);
    assert_eq!(jobs[1].start, StartPoint::Resume(frontier("deep.test", 4)));

    let row = h.domain("deep.test").await;
    assert_eq!(row.status, DomainStatus::Exhausted);
    assert_eq!(row.pages_crawled, 5);
    // no root bonus on resume
    assert_eq!(row.pages_discovered, 11);
    assert_eq!(row.frontier_checkpoint_id, None);
    assert_eq!(row.frontier_size, 0);
    assert_eq!(row.next_crawl_after, Some(h.clock.now() + chrono::Duration::days(30)));
    assert_eq!(h.frontier.key_count().await, 0);
}

#[tokio::test]
async fn test_empty_frontier_marks_domain_exhausted() {
    let h = Harness::new();
    h.insert("small.test", 0, 2).await;

    let engine = ScriptedEngine::new();
    engine.script("small.test", Script::drain(pages("small.test", 5)));

    let (_stop, rx) = watch::channel(false);
    worker(&h, &engine, settings("w1")).run(rx).await.unwrap();

    // budget reached, but nothing left to resume
    let row = h.domain("small.test").await;
    assert_eq!(row.pages_crawled, 2);
    assert_eq!(row.status, DomainStatus::Exhausted);
    assert_eq!(h.frontier.key_count().await, 0);
}

// ============================================================================
// Failure Thresholds and Stop Signals
// ============================================================================

#[tokio::test]
async fn test_forbidden_streak_blocks_domain_until_cooldown() {
    let h = Harness::new();
    h.seed("forbidden.test", 1).await;

    let mut script_pages = pages("forbidden.test", 1);
    for i in 0..3 {
        script_pages.push(PageOutcome::failure(
            format!("https://forbidden.test/denied/{i}"),
            FailureKind::Http(403),
        ));
    }
    script_pages.extend(pages("forbidden.test", 5));

    let engine = ScriptedEngine::new();
    engine.script(
        "forbidden.test",
        Script {
            pages: script_pages,
            ..Default::default()
        },
    );

    let mut settings = settings("w1");
    settings.policy.error_threshold = 3;
    let (_stop, rx) = watch::channel(false);
    worker(&h, &engine, settings).run(rx).await.unwrap();

    let row = h.domain("forbidden.test").await;
    assert_eq!(row.status, DomainStatus::Blocked);
    assert_eq!(row.block_reason_code, Some(BlockReasonCode::HttpForbidden));
    assert_eq!(row.pages_crawled, 4);
    assert_eq!(row.total_error_count, 3);
    assert_eq!(row.consecutive_error_count, 3);
    assert!(row.first_blocked_at.is_some());
    assert_eq!(row.next_crawl_after, Some(h.clock.now() + chrono::Duration::days(7)));

    let claims = h.claims();
    assert_eq!(claims.requeue_cooled_down().await.unwrap(), 0);
    h.clock.advance(chrono::Duration::days(7) + minutes(1));
    assert_eq!(claims.requeue_cooled_down().await.unwrap(), 1);
    assert_eq!(h.domain("forbidden.test").await.status, DomainStatus::Pending);
}

#[tokio::test]
async fn test_connectivity_failures_park_domain_unreachable() {
    let h = Harness::new();
    h.seed("down.test", 1).await;

    let failures = (0..4)
        .map(|i| PageOutcome::failure(format!("https://down.test/{i}"), FailureKind::Timeout))
        .collect();
    let engine = ScriptedEngine::new();
    engine.script("down.test", Script::drain(failures));

    let mut settings = settings("w1");
    settings.policy.error_threshold = 2;
    let (_stop, rx) = watch::channel(false);
    worker(&h, &engine, settings).run(rx).await.unwrap();

    let row = h.domain("down.test").await;
    assert_eq!(row.status, DomainStatus::Unreachable);
    assert_eq!(row.block_reason_code, Some(BlockReasonCode::Connectivity));
    assert_eq!(row.pages_crawled, 2);
    assert_eq!(row.next_crawl_after, Some(h.clock.now() + chrono::Duration::days(1)));
}

#[tokio::test]
async fn test_engine_stop_signal_blocks_immediately() {
    let h = Harness::new();
    h.seed("robots.test", 1).await;

    let engine = ScriptedEngine::new();
    engine.script(
        "robots.test",
        Script {
            pages: pages("robots.test", 10),
            stop: Some((
                0,
                StopSignal::new(BlockReasonCode::RobotsDisallowed, "robots.txt disallows /"),
            )),
            ..Default::default()
        },
    );

    let (_stop, rx) = watch::channel(false);
    worker(&h, &engine, settings("w1")).run(rx).await.unwrap();

    let row = h.domain("robots.test").await;
    assert_eq!(row.status, DomainStatus::Blocked);
    assert_eq!(row.block_reason_code, Some(BlockReasonCode::RobotsDisallowed));
    assert_eq!(row.block_reason.as_deref(), Some("robots.txt disallows /"));
    assert_eq!(row.pages_crawled, 1);
}

#[tokio::test]
async fn test_stored_error_streak_counts_toward_threshold() {
    let h = Harness::new();
    let mut flaky = Domain::new("flaky.test", h.clock.now());
    flaky.status = DomainStatus::Active;
    flaky.consecutive_error_count = 2;
    flaky.total_error_count = 2;
    h.catalog.insert(flaky).await;

    let mut script_pages = vec![PageOutcome::failure(
        "https://flaky.test/0",
        FailureKind::Timeout,
    )];
    script_pages.extend(pages("flaky.test", 3));
    let engine = ScriptedEngine::new();
    engine.script("flaky.test", Script::drain(script_pages));

    let mut settings = settings("w2");
    settings.policy.error_threshold = 3;
    let (_stop, rx) = watch::channel(false);
    worker(&h, &engine, settings).run(rx).await.unwrap();

    let row = h.domain("flaky.test").await;
    assert_eq!(row.status, DomainStatus::Unreachable);
    assert_eq!(row.block_reason_code, Some(BlockReasonCode::Connectivity));
    assert_eq!(row.pages_crawled, 1);
    assert_eq!(row.consecutive_error_count, 3);
}

#[tokio::test]
async fn test_engine_failure_keeps_domain_active() {
    let h = Harness::new();
    h.seed("crashy.test", 1).await;

    let engine = ScriptedEngine::new();
    engine.script(
        "crashy.test",
        Script {
            pages: pages("crashy.test", 10),
            fail_at: Some(3),
            ..Default::default()
        },
    );

    let (_stop, rx) = watch::channel(false);
    let report = worker(&h, &engine, settings("w1")).run(rx).await.unwrap();
    assert_eq!(report.domains_released, 1);

    // the frontier is unknown after an engine error, not drained
    let row = h.domain("crashy.test").await;
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.pages_crawled, 3);
    assert_eq!(row.next_crawl_after, None);
    assert_eq!(row.claimed_by, None);

    let again = h.claims().claim_domains("w2", 1).await.unwrap();
    assert_eq!(again[0].domain.name, "crashy.test");
}

// ============================================================================
// Lease Loss and Renewal
// ============================================================================

#[tokio::test]
async fn test_lost_lease_leaves_next_owners_checkpoint_intact() {
    let h = Harness::new();
    let mut first = Domain::new("a.test", h.clock.now());
    first.status = DomainStatus::Active;
    first.priority_score = 10;
    h.catalog.insert(first).await;

    let checkpoint_id = h
        .checkpoints()
        .save_checkpoint("b.test", uuid::Uuid::new_v4(), &frontier("b.test", 3))
        .await
        .unwrap();
    let mut second = Domain::new("b.test", h.clock.now());
    second.status = DomainStatus::Active;
    second.frontier_checkpoint_id = Some(checkpoint_id.clone());
    second.frontier_size = 3;
    h.catalog.insert(second).await;

    let engine = ScriptedEngine::new();
    engine.script(
        "a.test",
        Script {
            pages: pages("a.test", 3),
            pause_at: Some(0),
            ..Default::default()
        },
    );

    let mut w1_settings = settings("w1");
    w1_settings.batch_size = 2;
    let w1 = worker(&h, &engine, w1_settings);
    let (_stop, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { w1.run(rx).await });

    tokio::time::timeout(Duration::from_secs(5), engine.gate.paused.notified())
        .await
        .expect("w1 starts a.test");
    h.claims()
        .force_release_claims(&ForceReleaseScope::Worker("w1".into()), false)
        .await
        .unwrap();
    let taken = h.claims().claim_domains("w2", 2).await.unwrap();
    assert_eq!(taken.len(), 2);
    engine.gate.resume.notify_one();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker finishes")
        .unwrap()
        .unwrap();
    assert_eq!(report.domains_released, 0);
    assert_eq!(report.domains_lost + report.domains_abandoned, 2);

    // w1 never opened b.test and left its frontier to w2
    assert_eq!(engine.jobs().len(), 1);
    let row = h.domain("b.test").await;
    assert_eq!(row.claimed_by.as_deref(), Some("w2"));
    assert_eq!(row.frontier_checkpoint_id, Some(checkpoint_id.clone()));
    let saved = h.checkpoints().load_checkpoint(&checkpoint_id).await.unwrap();
    assert_eq!(saved, Some(frontier("b.test", 3)));
}

#[tokio::test]
async fn test_lost_lease_stops_domain_without_release() {
    let h = Harness::new();
    h.seed("contested.test", 1).await;

    let engine = ScriptedEngine::new();
    engine.script(
        "contested.test",
        Script {
            pages: pages("contested.test", 150),
            pause_at: Some(50),
            ..Default::default()
        },
    );

    let w1 = worker(&h, &engine, settings("w1"));
    let (_stop, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { w1.run(rx).await });

    tokio::time::timeout(Duration::from_secs(5), engine.gate.paused.notified())
        .await
        .expect("crawl reaches page 50");
    let released = h
        .claims()
        .force_release_claims(&ForceReleaseScope::Worker("w1".into()), false)
        .await
        .unwrap();
    assert_eq!(released, 1);
    engine.gate.resume.notify_one();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker finishes")
        .unwrap()
        .unwrap();
    assert_eq!(report.domains_lost, 1);
    assert_eq!(report.domains_released, 0);
    // the flush at page 100 is the first write to notice the loss
    assert_eq!(report.pages_crawled, 100);

    let row = h.domain("contested.test").await;
    assert_eq!(row.claimed_by, None);
    assert_eq!(row.pages_crawled, 0);
    assert_eq!(row.status, DomainStatus::Active);
}

#[tokio::test]
async fn test_background_renewal_keeps_release_valid() {
    let h = Harness::new();
    h.seed("slow.test", 1).await;

    let engine = ScriptedEngine::new();
    engine.script(
        "slow.test",
        Script {
            pages: pages("slow.test", 2),
            pause_at: Some(1),
            ..Default::default()
        },
    );

    let mut settings = settings("w1");
    settings.renew_interval = Duration::from_millis(20);
    let w1 = worker(&h, &engine, settings);
    let held = w1.held_domains();
    let (_stop, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { w1.run(rx).await });

    tokio::time::timeout(Duration::from_secs(5), engine.gate.paused.notified())
        .await
        .expect("crawl pauses");
    let claimed_version = h.domain("slow.test").await.version;

    h.clock.advance(minutes(20));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let row = h.domain("slow.test").await;
    assert!(row.version > claimed_version, "renewal bumps the version");
    assert_eq!(row.claim_expires_at, Some(h.clock.now() + minutes(30)));
    let tracked = held.lock().await.get(&row.id).copied().expect("still held");
    assert!(!tracked.lost);

    engine.gate.resume.notify_one();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker finishes")
        .unwrap()
        .unwrap();
    assert_eq!(report.domains_released, 1);
    assert_eq!(report.domains_abandoned, 0);

    let row = h.domain("slow.test").await;
    assert_eq!(row.status, DomainStatus::Exhausted);
    assert_eq!(row.pages_crawled, 2);
    assert_eq!(row.claimed_by, None);
}
