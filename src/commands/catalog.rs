use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use crawl_lease::catalog::canonical::canonicalize_domain;
use crawl_lease::catalog::{DomainCatalog, PgCatalog};
use crawl_lease::claim::{ClaimManager, ClaimSettings};
use crawl_lease::config::Config;
use crawl_lease::models::{DomainFilter, DomainStatus};
use crawl_lease::seeds::{self, SeedOptions};

use super::{format_time, open_catalog};

#[derive(Subcommand)]
pub enum DomainsCommand {
    /// List catalog rows, highest priority first
    List {
        /// Only rows in this status
        #[arg(long)]
        status: Option<String>,

        /// Maximum rows to show
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Per-status counts
    Summary,

    /// Put a domain back to `pending`, clearing its claim and block reason
    Reset {
        /// Domain name (canonicalized before lookup)
        name: String,
    },
}

pub async fn migrate(config: &Config) -> Result<()> {
    let catalog = PgCatalog::connect(&config.catalog)
        .await
        .context("Failed to connect to the domain catalog")?;
    catalog.migrate().await.context("Migration failed")?;
    println!("Catalog schema is up to date");
    Ok(())
}

pub async fn seed(
    config: &Config,
    file: PathBuf,
    source: String,
    limit: Option<usize>,
    offset: usize,
) -> Result<()> {
    let catalog = open_catalog(config).await?;
    let options = SeedOptions {
        source,
        offset,
        limit,
    };

    println!("Loading seeds from {}", file.display());
    let report = seeds::load_file(&catalog, &file, &options)
        .await
        .with_context(|| format!("Failed to load seed file {}", file.display()))?;

    println!("\nSeed Summary");
    println!("============");
    println!("Rows read: {}", report.read);
    println!("Inserted: {}", report.inserted);
    println!("Duplicates: {}", report.duplicates);
    println!("Invalid: {}", report.invalid);
    Ok(())
}

pub async fn domains(config: &Config, action: DomainsCommand) -> Result<()> {
    let catalog = open_catalog(config).await?;

    match action {
        DomainsCommand::List { status, limit } => {
            let status = status
                .map(|s| s.parse::<DomainStatus>())
                .transpose()
                .context("Invalid --status")?;
            let filter = DomainFilter {
                status,
                claimed_by: None,
                limit: Some(limit),
            };
            let rows = catalog.list_domains(&filter).await?;

            println!(
                "{:<40} {:<12} {:>9} {:>8} {:>8} {:<24} {:<19}",
                "DOMAIN", "STATUS", "PRIORITY", "CRAWLED", "IMAGES", "CLAIMED BY", "LAST CRAWLED"
            );
            for d in &rows {
                println!(
                    "{:<40} {:<12} {:>9} {:>8} {:>8} {:<24} {:<19}",
                    d.name,
                    d.status,
                    d.priority_score,
                    d.pages_crawled,
                    d.images_stored,
                    d.claimed_by.as_deref().unwrap_or("-"),
                    format_time(d.last_crawled_at),
                );
            }
            println!("\n{} domain(s)", rows.len());
        }

        DomainsCommand::Summary => {
            let summary = catalog.status_summary().await?;
            println!("Domain Status Summary");
            println!("=====================");
            println!(
                "{:<12} {:>10} {:>14} {:>14}",
                "STATUS", "COUNT", "AVG CRAWLED", "IMAGES"
            );
            let mut total = 0;
            for row in &summary {
                total += row.count;
                println!(
                    "{:<12} {:>10} {:>14.1} {:>14}",
                    row.status, row.count, row.avg_pages_crawled, row.total_images_stored
                );
            }
            println!("{:<12} {:>10}", "total", total);
        }

        DomainsCommand::Reset { name } => {
            let canonical = canonicalize_domain(&name)?;
            let claims = ClaimManager::new(catalog, ClaimSettings::from(&config.claims))
                .with_origin("cli");
            if claims.reset_to_pending(&canonical).await? {
                println!("{canonical} reset to pending");
            } else {
                anyhow::bail!("Domain not found: {canonical}");
            }
        }
    }

    Ok(())
}
