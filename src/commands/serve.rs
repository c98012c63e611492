use std::sync::Arc;

use anyhow::{Context, Result};

use crawl_lease::claim::{ClaimManager, ClaimSettings};
use crawl_lease::clock::SystemClock;
use crawl_lease::config::Config;
use crawl_lease::control::{AppState, ControlServer};
use crawl_lease::metrics;
use crawl_lease::priority::PriorityCalculator;

use super::open_catalog;

pub async fn serve(config: Config) -> Result<()> {
    let control = config.control.clone();

    println!("Starting Control Server");
    println!("=======================");
    println!("  Bind: {}", control.bind_address);
    println!("  Lease: {}s", config.claims.lease_secs);
    println!(
        "  Maintenance: {}",
        interval_label(control.maintenance_interval_secs)
    );
    println!(
        "  Priority recalculation: {}",
        interval_label(control.recalculate_interval_secs)
    );
    println!();

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics registration failed; /metrics will be empty");
    }

    let catalog = open_catalog(&config).await?;
    let claims = ClaimManager::new(catalog.clone(), ClaimSettings::from(&config.claims));
    let priorities = PriorityCalculator::new(catalog, Arc::new(SystemClock));
    let server = ControlServer::new(control.clone(), AppState::new(claims, priorities));

    println!("Endpoints:");
    println!("  GET  /api/health");
    println!("  GET  /api/domains?status=&limit=");
    println!("  GET  /api/domains/summary");
    println!("  POST /api/domains/{{name}}/reset");
    println!("  GET  /api/claims");
    println!("  POST /api/claims/expire");
    println!("  POST /api/claims/force-release");
    println!("  POST /api/priorities/recalculate");
    println!("  GET  /api/runs");
    println!("  POST /api/runs/cleanup");
    println!("  GET  /metrics");
    println!();
    println!("Press Ctrl+C to stop");

    server
        .start_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Control server failed")?;

    println!("Control server stopped");
    Ok(())
}

fn interval_label(secs: u64) -> String {
    if secs == 0 {
        "disabled".to_string()
    } else {
        format!("every {secs}s")
    }
}
