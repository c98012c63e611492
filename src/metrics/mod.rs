//! Prometheus metrics for the claim protocol and scheduling loop
//!
//! This module tracks:
//! - Claims: acquisitions, renewals, releases, expirations, force releases
//! - Worker: progress flushes, held domains
//! - Frontier: checkpoint operations by outcome
//! - Priorities: recalculation duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, CounterVec, Encoder, GaugeVec,
    Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct ClaimMetrics {
    claims_acquired: CounterVec,
    renewals: CounterVec,
    releases: CounterVec,
    flushes: CounterVec,
    stale_expired: CounterVec,
    force_released: CounterVec,
    held_domains: GaugeVec,
}

struct SchedulingMetrics {
    checkpoint_ops: CounterVec,
    priority_recalc: Histogram,
}

static CLAIM_METRICS: OnceLock<ClaimMetrics> = OnceLock::new();

static SCHEDULING_METRICS: OnceLock<SchedulingMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; later calls are no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = crawl_lease::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let claims = ClaimMetrics {
        claims_acquired: register_counter_vec!(
            "crawl_lease_claims_acquired_total",
            "Domains claimed by worker",
            &["worker"]
        )?,
        renewals: register_counter_vec!(
            "crawl_lease_renewals_total",
            "Lease renewal attempts by result",
            &["result"]
        )?,
        releases: register_counter_vec!(
            "crawl_lease_releases_total",
            "Release attempts by result",
            &["result"]
        )?,
        flushes: register_counter_vec!(
            "crawl_lease_progress_flushes_total",
            "Claim-scoped progress flushes by result",
            &["result"]
        )?,
        stale_expired: register_counter_vec!(
            "crawl_lease_stale_claims_expired_total",
            "Claims cleared after lease expiry",
            &["source"]
        )?,
        force_released: register_counter_vec!(
            "crawl_lease_force_released_total",
            "Claims cleared by operator force release",
            &["scope"]
        )?,
        held_domains: register_gauge_vec!(
            "crawl_lease_held_domains",
            "Domains currently held by a worker",
            &["worker"]
        )?,
    };

    let scheduling = SchedulingMetrics {
        checkpoint_ops: register_counter_vec!(
            "crawl_lease_checkpoint_operations_total",
            "Frontier checkpoint operations by operation and result",
            &["operation", "result"]
        )?,
        priority_recalc: register_histogram!(
            "crawl_lease_priority_recalc_duration_seconds",
            "Duration of whole-table priority recalculation",
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
        )?,
    };

    CLAIM_METRICS.set(claims).ok();
    SCHEDULING_METRICS.set(scheduling).ok();

    tracing::debug!("Prometheus metrics registered");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CLAIM_METRICS.get().is_some() && SCHEDULING_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_claims_acquired(worker: &str, count: usize) {
    if let Some(m) = CLAIM_METRICS.get() {
        if count > 0 {
            m.claims_acquired
                .with_label_values(&[worker])
                .inc_by(count as f64);
        }
    }
}

/// `result`: renewed, lost, error
pub fn record_renewal(result: &str) {
    if let Some(m) = CLAIM_METRICS.get() {
        m.renewals.with_label_values(&[result]).inc();
    }
}

/// `result`: released, conflict, lost, abandoned, error
pub fn record_release(result: &str) {
    if let Some(m) = CLAIM_METRICS.get() {
        m.releases.with_label_values(&[result]).inc();
    }
}

/// `result`: applied, lost, error
pub fn record_flush(result: &str) {
    if let Some(m) = CLAIM_METRICS.get() {
        m.flushes.with_label_values(&[result]).inc();
    }
}

pub fn record_stale_claims_expired(source: &str, count: u64) {
    if let Some(m) = CLAIM_METRICS.get() {
        if count > 0 {
            m.stale_expired
                .with_label_values(&[source])
                .inc_by(count as f64);
        }
    }
}

pub fn record_force_release(scope: &str, count: u64) {
    if let Some(m) = CLAIM_METRICS.get() {
        m.force_released
            .with_label_values(&[scope])
            .inc_by(count as f64);
    }
}

pub fn update_held_domains(worker: &str, held: usize) {
    if let Some(m) = CLAIM_METRICS.get() {
        m.held_domains.with_label_values(&[worker]).set(held as f64);
    }
}

/// `operation`: save, load, delete; `result`: ok, missing, corrupt, unavailable
pub fn record_checkpoint_op(operation: &str, result: &str) {
    if let Some(m) = SCHEDULING_METRICS.get() {
        m.checkpoint_ops
            .with_label_values(&[operation, result])
            .inc();
    }
}

pub fn record_priority_recalc(duration_secs: f64) {
    if let Some(m) = SCHEDULING_METRICS.get() {
        m.priority_recalc.observe(duration_secs);
    }
}

// ============================================================================
// Tests
// ============================================================================
