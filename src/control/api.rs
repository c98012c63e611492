//! REST API handlers for the operator control surface

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::canonical::canonicalize_domain;
use crate::claim::ForceReleaseScope;
use crate::error::{Error, ErrorCategory};
use crate::metrics;
use crate::models::{DomainFilter, DomainStatus};

use super::server::AppState;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 10_000;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn fail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::failure(message))).into_response()
}

/// Map a crate error onto an HTTP status
fn error_response(err: Error) -> Response {
    let status = match (&err, err.category()) {
        (Error::DomainNotFound(_), _) => StatusCode::NOT_FOUND,
        (_, ErrorCategory::Input) => StatusCode::BAD_REQUEST,
        (_, ErrorCategory::Storage) => StatusCode::SERVICE_UNAVAILABLE,
        (_, ErrorCategory::Concurrency) | (_, ErrorCategory::Contract) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "Control request failed");
    }
    fail(status, err.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub catalog_reachable: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DomainListQuery {
    pub status: Option<String>,
    pub claimed_by: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ForceReleaseRequest {
    pub worker_id: Option<String>,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct RunCleanupRequest {
    #[serde(default = "default_stale_minutes")]
    pub older_than_minutes: u64,
}

fn default_stale_minutes() -> u64 {
    60
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunCleanupResponse {
    pub failed: Vec<Uuid>,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        // Domains
        .route("/api/domains", get(list_domains))
        .route("/api/domains/summary", get(domain_summary))
        .route("/api/domains/{name}/reset", post(reset_domain))
        // Claims
        .route("/api/claims", get(list_claims))
        .route("/api/claims/expire", post(expire_claims))
        .route("/api/claims/force-release", post(force_release))
        // Priorities and runs
        .route("/api/priorities/recalculate", post(recalculate_priorities))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/cleanup", post(cleanup_runs))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> Response {
    let catalog_reachable = state.claims.catalog().status_summary().await.is_ok();
    let status = if catalog_reachable { "healthy" } else { "degraded" };
    let code = if catalog_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ApiResponse::success(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.start_time.elapsed().as_secs(),
            catalog_reachable,
        })),
    )
        .into_response()
}

// ============================================================================
// Domain Handlers
// ============================================================================

async fn list_domains(
    State(state): State<AppState>,
    Query(query): Query<DomainListQuery>,
) -> Response {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<DomainStatus>() {
            Ok(status) => Some(status),
            Err(_) => return fail(StatusCode::BAD_REQUEST, format!("Invalid status: {raw}")),
        },
        None => None,
    };
    let filter = DomainFilter {
        status,
        claimed_by: query.claimed_by,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)),
    };

    match state.claims.catalog().list_domains(&filter).await {
        Ok(domains) => ok(domains),
        Err(e) => error_response(e),
    }
}

async fn domain_summary(State(state): State<AppState>) -> Response {
    match state.claims.catalog().status_summary().await {
        Ok(summary) => ok(summary),
        Err(e) => error_response(e),
    }
}

async fn reset_domain(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let canonical = match canonicalize_domain(&name) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    match state.claims.reset_to_pending(&canonical).await {
        Ok(true) => match state.claims.catalog().find_by_name(&canonical).await {
            Ok(domain) => ok(domain),
            Err(e) => error_response(e),
        },
        Ok(false) => error_response(Error::DomainNotFound(canonical)),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Claim Handlers
// ============================================================================

async fn list_claims(State(state): State<AppState>) -> Response {
    match state.claims.catalog().active_claims().await {
        Ok(claims) => ok(claims),
        Err(e) => error_response(e),
    }
}

async fn expire_claims(State(state): State<AppState>) -> Response {
    match state.claims.expire_stale_claims().await {
        Ok(count) => ok(CountResponse { count }),
        Err(e) => error_response(e),
    }
}

async fn force_release(
    State(state): State<AppState>,
    Json(request): Json<ForceReleaseRequest>,
) -> Response {
    let scope = match (request.worker_id, request.all) {
        (Some(_), true) => {
            return fail(
                StatusCode::BAD_REQUEST,
                "Specify either worker_id or all, not both",
            )
        }
        (Some(worker_id), false) => ForceReleaseScope::Worker(worker_id),
        (None, true) => ForceReleaseScope::All,
        (None, false) => return fail(StatusCode::BAD_REQUEST, "Specify worker_id or all"),
    };

    match state.claims.force_release_claims(&scope, request.confirm).await {
        Ok(count) => ok(CountResponse { count }),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Priority and Run Handlers
// ============================================================================

async fn recalculate_priorities(State(state): State<AppState>) -> Response {
    match state.priorities.recalculate().await {
        Ok(report) => ok(report),
        Err(e) => error_response(e),
    }
}

async fn list_runs(State(state): State<AppState>, Query(query): Query<RunListQuery>) -> Response {
    let limit = query.limit.unwrap_or(20).min(MAX_LIST_LIMIT);
    match state.claims.catalog().list_runs(limit).await {
        Ok(runs) => ok(runs),
        Err(e) => error_response(e),
    }
}

async fn cleanup_runs(
    State(state): State<AppState>,
    body: Option<Json<RunCleanupRequest>>,
) -> Response {
    let minutes = body.map_or_else(default_stale_minutes, |Json(b)| b.older_than_minutes);
    let older_than = std::time::Duration::from_secs(minutes.saturating_mul(60));
    match state.claims.catalog().fail_stale_runs(older_than).await {
        Ok(failed) => ok(RunCleanupResponse { failed }),
        Err(e) => error_response(e),
    }
}

async fn metrics_text() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
