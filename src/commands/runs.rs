use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;

use crawl_lease::catalog::DomainCatalog;
use crawl_lease::clock::SystemClock;
use crawl_lease::config::Config;
use crawl_lease::models::RunStatus;
use crawl_lease::priority::PriorityCalculator;

use super::{format_time, open_catalog};

/// Upper bound on rows scanned for a cleanup dry run
const DRY_RUN_SCAN: usize = 10_000;

#[derive(Subcommand)]
pub enum PrioritiesCommand {
    /// Rescore every domain now
    Recalculate,
}

#[derive(Subcommand)]
pub enum RunsCommand {
    /// Recent crawl runs, newest first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Mark running sessions with no recent activity as failed
    Cleanup {
        /// Inactivity cutoff
        #[arg(long, default_value = "60")]
        older_than_minutes: u64,

        /// Show what would be failed without changing anything
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn priorities(config: &Config, action: PrioritiesCommand) -> Result<()> {
    let catalog = open_catalog(config).await?;

    match action {
        PrioritiesCommand::Recalculate => {
            let calculator = PriorityCalculator::new(catalog, Arc::new(SystemClock));
            let report = calculator.recalculate().await?;
            println!(
                "Scored {} domain(s), updated {} in {}ms",
                report.scored, report.updated, report.duration_ms
            );
        }
    }

    Ok(())
}

pub async fn runs(config: &Config, action: RunsCommand) -> Result<()> {
    let catalog = open_catalog(config).await?;

    match action {
        RunsCommand::List { limit } => {
            let runs = catalog.list_runs(limit).await?;
            println!(
                "{:<36} {:<28} {:<10} {:<19} {:>8} {:>8} {:>7}",
                "RUN", "WORKER", "STATUS", "STARTED", "CRAWLED", "IMAGES", "ERRORS"
            );
            for run in &runs {
                println!(
                    "{:<36} {:<28} {:<10} {:<19} {:>8} {:>8} {:>7}",
                    run.id,
                    run.worker_id,
                    run.status,
                    format_time(Some(run.started_at)),
                    run.pages_crawled,
                    run.images_stored,
                    run.error_count,
                );
            }
            println!("\n{} run(s)", runs.len());
        }

        RunsCommand::Cleanup {
            older_than_minutes,
            dry_run,
        } => {
            let older_than = Duration::from_secs(older_than_minutes.saturating_mul(60));

            if dry_run {
                let cutoff = chrono::Duration::from_std(older_than)
                    .ok()
                    .and_then(|age| Utc::now().checked_sub_signed(age));
                let stale: Vec<_> = catalog
                    .list_runs(DRY_RUN_SCAN)
                    .await?
                    .into_iter()
                    .filter(|r| {
                        r.status == RunStatus::Running && cutoff.is_some_and(|c| r.updated_at < c)
                    })
                    .collect();
                println!("Dry run: {} run(s) would be marked failed", stale.len());
                for run in &stale {
                    println!(
                        "  {} ({}, last activity {})",
                        run.id,
                        run.worker_id,
                        format_time(Some(run.updated_at))
                    );
                }
                return Ok(());
            }

            let failed = catalog.fail_stale_runs(older_than).await?;
            println!("Marked {} stale run(s) failed", failed.len());
        }
    }

    Ok(())
}
