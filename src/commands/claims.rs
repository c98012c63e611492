use anyhow::Result;
use clap::Subcommand;

use crawl_lease::catalog::DomainCatalog;
use crawl_lease::claim::{ClaimManager, ClaimSettings, ForceReleaseScope};
use crawl_lease::config::Config;
use crawl_lease::models::DomainFilter;

use super::{format_time, open_catalog};

#[derive(Subcommand)]
pub enum ClaimsCommand {
    /// Live claims per worker
    List,

    /// Clear leases whose expiry has passed
    Expire,

    /// Drop claims regardless of expiry
    Release {
        /// Release claims held by this worker
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        worker_id: Option<String>,

        /// Release every claim in the catalog (requires --confirm)
        #[arg(long)]
        all: bool,

        /// Confirm a global release
        #[arg(long)]
        confirm: bool,

        /// Show what would be released without changing anything
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn claims(config: &Config, action: ClaimsCommand) -> Result<()> {
    let catalog = open_catalog(config).await?;
    let manager =
        ClaimManager::new(catalog.clone(), ClaimSettings::from(&config.claims)).with_origin("cli");

    match action {
        ClaimsCommand::List => {
            let claims = catalog.active_claims().await?;
            println!(
                "{:<32} {:>8} {:<19} {:<19}",
                "WORKER", "DOMAINS", "EARLIEST EXPIRY", "LATEST EXPIRY"
            );
            for c in &claims {
                println!(
                    "{:<32} {:>8} {:<19} {:<19}",
                    c.worker_id,
                    c.count,
                    format_time(Some(c.earliest_expiry)),
                    format_time(Some(c.latest_expiry)),
                );
            }
            if claims.is_empty() {
                println!("No live claims");
            }
        }

        ClaimsCommand::Expire => {
            let cleared = manager.expire_stale_claims().await?;
            println!("Cleared {cleared} expired claim(s)");
        }

        ClaimsCommand::Release {
            worker_id,
            all,
            confirm,
            dry_run,
        } => {
            let scope = match worker_id {
                Some(worker_id) => ForceReleaseScope::Worker(worker_id),
                None if all => ForceReleaseScope::All,
                None => anyhow::bail!("Specify --worker-id or --all"),
            };
            if scope == ForceReleaseScope::All && !confirm {
                anyhow::bail!("Releasing every claim requires --confirm");
            }

            if dry_run {
                let claimed_by = match &scope {
                    ForceReleaseScope::Worker(worker_id) => Some(worker_id.clone()),
                    ForceReleaseScope::All => None,
                };
                let held = catalog
                    .list_domains(&DomainFilter {
                        status: None,
                        claimed_by: claimed_by.clone(),
                        limit: None,
                    })
                    .await?
                    .into_iter()
                    .filter(|d| d.claimed_by.is_some())
                    .collect::<Vec<_>>();

                println!("Dry run: {} claim(s) would be released", held.len());
                for d in &held {
                    println!(
                        "  {} (held by {}, expires {})",
                        d.name,
                        d.claimed_by.as_deref().unwrap_or("-"),
                        format_time(d.claim_expires_at)
                    );
                }
                return Ok(());
            }

            let released = manager.force_release_claims(&scope, confirm).await?;
            println!("Released {released} claim(s)");
        }
    }

    Ok(())
}
