//! Claim protocol tests
//!
//! Exercises the lease rules through `ClaimManager` over the in-memory
//! catalog:
//! 1. Mutual exclusion under concurrent claims
//! 2. Claim ordering and eligibility
//! 3. Renewal, conditional release and lifecycle enforcement
//! 4. Expiry, force-release and cooldown requeue

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crawl_lease::catalog::DomainCatalog;
use crawl_lease::claim::{ClaimManager, ClaimSettings, ForceReleaseScope, ReleaseAttempt};
use crawl_lease::clock::{Clock, SystemClock};
use crawl_lease::models::{
    BlockReason, BlockReasonCode, CounterDelta, Domain, DomainStatus, ReleaseRequest,
};
use crawl_lease::priority::PriorityCalculator;
use crawl_lease::Error;

use crate::common::Harness;

fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

fn parked(domain: &Domain, worker: &str, status: DomainStatus, code: BlockReasonCode) -> ReleaseRequest {
    ReleaseRequest {
        final_status: status,
        block_reason: Some(BlockReason::new(code, "test")),
        cooldown: Some(Duration::from_secs(3600)),
        ..ReleaseRequest::unchanged(domain, worker)
    }
}

// ============================================================================
// Mutual Exclusion
// ============================================================================

#[tokio::test]
async fn test_concurrent_claims_never_share_a_domain() {
    let h = Harness::new();
    for i in 0..3 {
        h.seed(&format!("site{i}.test"), i + 1).await;
    }
    let claims = h.claims();

    let attempts = (0..8).map(|w| {
        let claims = claims.clone();
        async move {
            let worker = format!("w{w}");
            let batch = claims.claim_domains(&worker, 1).await.unwrap();
            (worker, batch)
        }
    });
    let results = join_all(attempts).await;

    let mut seen = HashSet::new();
    let mut winners = 0;
    for (worker, batch) in &results {
        assert!(batch.len() <= 1);
        for claimed in batch {
            winners += 1;
            assert!(seen.insert(claimed.domain.id), "domain claimed twice");
            let row = h.domain(&claimed.domain.name).await;
            assert_eq!(row.claimed_by.as_deref(), Some(worker.as_str()));
            assert_eq!(row.status, DomainStatus::Active);
        }
    }
    assert_eq!(winners, 3);
}

#[tokio::test]
async fn test_claim_bumps_version_and_reports_pre_claim_version() {
    let h = Harness::new();
    let before = h.seed("example.test", 10).await;

    let batch = h.claims().claim_domains("w1", 1).await.unwrap();
    assert_eq!(batch.len(), 1);
    let claimed = &batch[0];
    assert_eq!(claimed.pre_claim_version, before.version);
    assert!(claimed.domain.version > before.version);
    assert_eq!(claimed.domain.claimed_by.as_deref(), Some("w1"));

    let expiry = claimed.domain.claim_expires_at.unwrap();
    assert_eq!(expiry, h.clock.now() + minutes(30));
}

// ============================================================================
// Ordering and Eligibility
// ============================================================================

#[tokio::test]
async fn test_claim_order_prefers_active_then_priority() {
    let h = Harness::new();
    h.insert("low.test", 10, 1000).await;
    h.insert("high.test", 500, 1000).await;

    let mut parked_active = Domain::new("resume.test", h.clock.now());
    parked_active.status = DomainStatus::Active;
    h.catalog.insert(parked_active).await;

    let mut cooling = Domain::new("later.test", h.clock.now());
    cooling.priority_score = 10_000;
    cooling.next_crawl_after = Some(h.clock.now() + minutes(60));
    h.catalog.insert(cooling).await;

    let mut blocked = Domain::new("blocked.test", h.clock.now());
    blocked.status = DomainStatus::Blocked;
    blocked.priority_score = 10_000;
    h.catalog.insert(blocked).await;

    let batch = h.claims().claim_domains("w1", 10).await.unwrap();
    let names: Vec<&str> = batch.iter().map(|c| c.domain.name.as_str()).collect();
    assert_eq!(names, vec!["resume.test", "high.test", "low.test"]);
}

#[tokio::test]
async fn test_never_crawled_domains_come_first_on_equal_priority() {
    let h = Harness::new();
    let mut crawled = Domain::new("old.test", h.clock.now());
    crawled.last_crawled_at = Some(h.clock.now() - minutes(10));
    h.catalog.insert(crawled).await;
    h.insert("new.test", 0, 1000).await;

    let batch = h.claims().claim_domains("w1", 1).await.unwrap();
    assert_eq!(batch[0].domain.name, "new.test");
}

#[tokio::test]
async fn test_live_claim_is_not_reclaimed() {
    let h = Harness::new();
    h.seed("example.test", 1).await;
    let claims = h.claims();

    assert_eq!(claims.claim_domains("w1", 1).await.unwrap().len(), 1);
    assert!(claims.claim_domains("w2", 1).await.unwrap().is_empty());

    // an expired claim is eligible even before the sweep clears it
    h.clock.advance(minutes(31));
    let batch = claims.claim_domains("w2", 1).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].domain.claimed_by.as_deref(), Some("w2"));
}

// ============================================================================
// Renewal and Release
// ============================================================================

#[tokio::test]
async fn test_renewal_extends_live_lease_only() {
    let h = Harness::new();
    h.seed("example.test", 1).await;
    let claims = h.claims();
    let claimed = claims.claim_domains("w1", 1).await.unwrap().remove(0);

    h.clock.advance(minutes(20));
    let version = claims.renew_lease(claimed.domain.id, "w1").await.unwrap();
    assert_eq!(version, Some(claimed.domain.version + 1));
    let row = h.domain("example.test").await;
    assert_eq!(row.claim_expires_at, Some(h.clock.now() + minutes(30)));

    assert!(!claims.renew_claim(claimed.domain.id, "w2").await.unwrap());

    h.clock.advance(minutes(31));
    assert!(!claims.renew_claim(claimed.domain.id, "w1").await.unwrap());
}

#[tokio::test]
async fn test_stale_version_release_leaves_row_untouched() {
    let h = Harness::new();
    h.seed("example.test", 1).await;
    let claims = h.claims();
    let claimed = claims.claim_domains("w1", 1).await.unwrap().remove(0);
    claims.renew_claim(claimed.domain.id, "w1").await.unwrap();
    let before = h.domain("example.test").await;

    let request = ReleaseRequest {
        final_status: DomainStatus::Exhausted,
        delta: CounterDelta {
            pages_crawled: 5,
            ..Default::default()
        },
        ..ReleaseRequest::unchanged(&claimed.domain, "w1")
    };
    assert!(!claims.release_claim(&request).await.unwrap());
    assert_eq!(h.domain("example.test").await, before);

    // the same request at the current version goes through
    let request = ReleaseRequest {
        expected_version: before.version,
        ..request
    };
    assert!(claims.release_claim(&request).await.unwrap());
    let row = h.domain("example.test").await;
    assert_eq!(row.status, DomainStatus::Exhausted);
    assert_eq!(row.pages_crawled, 5);
    assert_eq!(row.claimed_by, None);
    assert_eq!(row.version, before.version + 1);
}

#[tokio::test]
async fn test_release_by_non_owner_is_rejected() {
    let h = Harness::new();
    h.seed("example.test", 1).await;
    let claims = h.claims();
    let claimed = claims.claim_domains("w1", 1).await.unwrap().remove(0);

    let request = ReleaseRequest::unchanged(&claimed.domain, "w2");
    assert!(!claims.release_claim(&request).await.unwrap());

    let attempt = claims.release_with_retry(request).await.unwrap();
    assert!(matches!(attempt, ReleaseAttempt::Abandoned { .. }));
    assert_eq!(h.domain("example.test").await.claimed_by.as_deref(), Some("w1"));
}

#[tokio::test]
async fn test_invalid_final_status_is_an_error_without_mutation() {
    let h = Harness::new();
    h.seed("example.test", 1).await;
    let claims = h.claims();
    let claimed = claims.claim_domains("w1", 1).await.unwrap().remove(0);
    let before = h.domain("example.test").await;

    let request = ReleaseRequest {
        final_status: DomainStatus::Pending,
        ..ReleaseRequest::unchanged(&claimed.domain, "w1")
    };
    let err = claims.release_claim(&request).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: DomainStatus::Active,
            to: DomainStatus::Pending
        }
    ));
    assert_eq!(h.domain("example.test").await, before);
}

#[tokio::test]
async fn test_checked_transition_asserts_status_and_version() {
    let h = Harness::new();
    h.seed("example.test", 1).await;
    let claims = h.claims();
    let claimed = claims.claim_domains("w1", 1).await.unwrap().remove(0);
    let id = claimed.domain.id;
    let version = claimed.domain.version;

    let stale = claims
        .transition_status(id, DomainStatus::Active, DomainStatus::Unreachable, Some("w1"), version - 1)
        .await
        .unwrap();
    assert!(!stale);

    let wrong_owner = claims
        .transition_status(id, DomainStatus::Active, DomainStatus::Unreachable, Some("w2"), version)
        .await
        .unwrap();
    assert!(!wrong_owner);

    let applied = claims
        .transition_status(id, DomainStatus::Active, DomainStatus::Unreachable, Some("w1"), version)
        .await
        .unwrap();
    assert!(applied);
    assert_eq!(h.domain("example.test").await.status, DomainStatus::Unreachable);

    let illegal = claims
        .transition_status(id, DomainStatus::Unreachable, DomainStatus::Exhausted, None, version + 1)
        .await;
    assert!(matches!(illegal, Err(Error::InvalidTransition { .. })));
}

// ============================================================================
// Expiry, Force-Release and Requeue
// ============================================================================

#[tokio::test]
async fn test_expiry_keeps_flushed_progress_and_status() {
    let h = Harness::new();
    h.seed("example.test", 1).await;
    let claims = h.claims();
    let claimed = claims.claim_domains("w1", 1).await.unwrap().remove(0);
    let delta = CounterDelta {
        pages_crawled: 40,
        images_stored: 12,
        ..Default::default()
    };
    claims
        .flush_progress(claimed.domain.id, "w1", &delta)
        .await
        .unwrap()
        .expect("claim is live");

    assert_eq!(claims.expire_stale_claims().await.unwrap(), 0);
    h.clock.advance(minutes(31));
    assert_eq!(claims.expire_stale_claims().await.unwrap(), 1);

    let row = h.domain("example.test").await;
    assert_eq!(row.claimed_by, None);
    assert_eq!(row.claim_expires_at, None);
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.pages_crawled, 40);
    assert_eq!(row.images_stored, 12);

    // the flush after expiry is refused
    let late = claims.flush_progress(claimed.domain.id, "w1", &delta).await.unwrap();
    assert_eq!(late, None);
}

#[tokio::test]
async fn test_force_release_scopes() {
    let h = Harness::new();
    for i in 0..4 {
        h.seed(&format!("site{i}.test"), i).await;
    }
    let claims = h.claims();
    claims.claim_domains("w1", 2).await.unwrap();
    claims.claim_domains("w2", 2).await.unwrap();

    let released = claims
        .force_release_claims(&ForceReleaseScope::Worker("w1".into()), false)
        .await
        .unwrap();
    assert_eq!(released, 2);

    let err = claims
        .force_release_claims(&ForceReleaseScope::All, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConfirmationRequired(_)));
    let live = h.catalog.active_claims().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].worker_id, "w2");
    assert_eq!(live[0].count, 2);

    let released = claims
        .force_release_claims(&ForceReleaseScope::All, true)
        .await
        .unwrap();
    assert_eq!(released, 2);
    assert!(h.catalog.active_claims().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_requeue_skips_permanent_block_reasons() {
    let h = Harness::new();
    h.seed("forbidden.test", 1).await;
    h.seed("takedown.test", 2).await;
    let claims = h.claims();
    let batch = claims.claim_domains("w1", 2).await.unwrap();

    for claimed in &batch {
        let code = if claimed.domain.name == "takedown.test" {
            BlockReasonCode::LegalTakedown
        } else {
            BlockReasonCode::HttpForbidden
        };
        let request = parked(&claimed.domain, "w1", DomainStatus::Blocked, code);
        assert!(claims.release_claim(&request).await.unwrap());
    }

    assert_eq!(claims.requeue_cooled_down().await.unwrap(), 0);
    h.clock.advance(minutes(61));
    assert_eq!(claims.requeue_cooled_down().await.unwrap(), 1);

    assert_eq!(h.domain("forbidden.test").await.status, DomainStatus::Pending);
    let takedown = h.domain("takedown.test").await;
    assert_eq!(takedown.status, DomainStatus::Blocked);
    assert_eq!(takedown.block_reason_code, Some(BlockReasonCode::LegalTakedown));

    // an operator reset still brings it back
    assert!(claims.reset_to_pending("takedown.test").await.unwrap());
    let takedown = h.domain("takedown.test").await;
    assert_eq!(takedown.status, DomainStatus::Pending);
    assert_eq!(takedown.block_reason_code, None);
}

// ============================================================================
// Priorities
// ============================================================================

#[tokio::test]
async fn test_recalculated_priorities_drive_claim_order() {
    let h = Harness::new();
    let mut productive = Domain::new("productive.test", h.clock.now());
    productive.pages_discovered = 1000;
    productive.pages_crawled = 200;
    productive.images_stored = 150;
    productive.last_crawled_at = Some(h.clock.now() - chrono::Duration::days(3));
    productive.status = DomainStatus::Pending;
    h.catalog.insert(productive).await;

    let mut idle = Domain::new("idle.test", h.clock.now());
    idle.pages_discovered = 10;
    idle.pages_crawled = 10;
    h.catalog.insert(idle).await;

    let calculator = PriorityCalculator::new(h.shared(), h.clock.clone());
    let report = calculator.recalculate().await.unwrap();
    assert_eq!(report.scored, 2);

    let productive = h.domain("productive.test").await;
    let idle = h.domain("idle.test").await;
    assert!(productive.priority_score > idle.priority_score);
    assert!(productive.priority_computed_at.is_some());

    // identical inputs give an identical score
    calculator.recalculate().await.unwrap();
    assert_eq!(h.domain("productive.test").await.priority_score, productive.priority_score);

    let claims = ClaimManager::new(h.shared(), ClaimSettings::default());
    let batch = claims.claim_domains("w1", 1).await.unwrap();
    assert_eq!(batch[0].domain.name, "productive.test");
}

#[tokio::test]
async fn test_system_clock_catalog_claims() {
    let catalog = Arc::new(crawl_lease::catalog::MemoryCatalog::new());
    let mut domain = Domain::new("wall.test", SystemClock.now());
    domain.priority_score = 1;
    catalog.insert(domain).await;

    let claims = ClaimManager::new(catalog, ClaimSettings::default());
    let batch = claims.claim_domains("w1", 5).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert!(batch[0].domain.claim_expires_at.unwrap() > SystemClock.now());
}
