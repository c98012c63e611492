//! Control server implementation
//!
//! Serves the operator API and runs the periodic maintenance work an
//! operator would otherwise trigger by hand: stale claim expiry, cooldown
//! requeue and priority recalculation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::claim::ClaimManager;
use crate::config::ControlConfig;
use crate::error::{Error, Result};
use crate::priority::PriorityCalculator;

use super::api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub claims: ClaimManager,
    pub priorities: Arc<PriorityCalculator>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(claims: ClaimManager, priorities: PriorityCalculator) -> Self {
        Self {
            claims: claims.with_origin("control"),
            priorities: Arc::new(priorities),
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Control Server
// ============================================================================

pub struct ControlServer {
    config: ControlConfig,
    state: AppState,
}

impl ControlServer {
    pub fn new(config: ControlConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes and layers
    pub fn build_router(&self) -> Router {
        create_router(self.state.clone())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .map_err(|e| Error::config(format!("invalid bind address {}: {e}", self.config.bind_address)))?;

        let router = self.build_router();
        let tasks = self.start_background_tasks();

        tracing::info!(%addr, "Starting control server");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await;

        for task in tasks {
            task.abort();
        }
        served?;

        tracing::info!("Control server shutdown complete");
        Ok(())
    }

    /// Start periodic maintenance and priority passes
    fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if self.config.maintenance_interval_secs > 0 {
            let claims = self.state.claims.clone();
            let period = Duration::from_secs(self.config.maintenance_interval_secs);
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if let Err(e) = claims.expire_stale_claims().await {
                        tracing::warn!(error = %e, "Stale claim sweep failed");
                    }
                    if let Err(e) = claims.requeue_cooled_down().await {
                        tracing::warn!(error = %e, "Cooldown requeue failed");
                    }
                }
            }));
        }

        if self.config.recalculate_interval_secs > 0 {
            let priorities = self.state.priorities.clone();
            let period = Duration::from_secs(self.config.recalculate_interval_secs);
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if let Err(e) = priorities.recalculate().await {
                        tracing::warn!(error = %e, "Scheduled priority recalculation failed");
                    }
                }
            }));
        }

        tracing::info!(count = tasks.len(), "Background tasks started");
        tasks
    }
}
