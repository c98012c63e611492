pub mod catalog;
pub mod claims;
pub mod runs;
pub mod serve;

use std::sync::Arc;

use anyhow::{Context, Result};

use crawl_lease::catalog::{PgCatalog, SharedCatalog};
use crawl_lease::config::Config;

pub use catalog::{domains, migrate, seed, DomainsCommand};
pub use claims::{claims, ClaimsCommand};
pub use runs::{priorities, runs, PrioritiesCommand, RunsCommand};
pub use serve::serve;

/// Connect to the configured catalog
pub async fn open_catalog(config: &Config) -> Result<SharedCatalog> {
    let catalog = PgCatalog::connect(&config.catalog)
        .await
        .context("Failed to connect to the domain catalog")?;
    Ok(Arc::new(catalog))
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
