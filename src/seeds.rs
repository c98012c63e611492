//! Seed-file ingestion
//!
//! One domain per line, either `domain` or `rank,domain` (Tranco-style).
//! Blank lines and `#` comments are skipped. Without an explicit rank the
//! row's position among data rows (1-based) is used.

use std::path::Path;

use serde::Serialize;

use crate::catalog::canonical::canonicalize_domain;
use crate::catalog::SharedCatalog;
use crate::error::Result;
use crate::models::NewDomain;

/// Default provenance label
pub const DEFAULT_SOURCE: &str = "seed_file";

/// One data row of a seed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRow {
    pub line: usize,
    pub rank: i64,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub source: String,
    /// Data rows to skip
    pub offset: usize,
    /// Maximum rows to insert
    pub limit: Option<usize>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            offset: 0,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub read: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

/// Split seed text into data rows
pub fn parse_seeds(content: &str) -> Vec<SeedRow> {
    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let position = rows.len() as i64 + 1;
        let (rank, raw) = match line.split_once(',') {
            Some((first, rest)) => match first.trim().parse::<i64>() {
                Ok(rank) => (rank, rest.trim()),
                // header rows such as `rank,domain`
                Err(_) if first.trim().eq_ignore_ascii_case("rank") => continue,
                Err(_) => (position, first.trim()),
            },
            None => (position, line),
        };
        rows.push(SeedRow {
            line: idx + 1,
            rank,
            raw: raw.to_string(),
        });
    }
    rows
}

/// Canonicalize and insert rows into the catalog
pub async fn load_rows(
    catalog: &SharedCatalog,
    rows: &[SeedRow],
    options: &SeedOptions,
) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let limit = options.limit.unwrap_or(usize::MAX);

    for row in rows.iter().skip(options.offset) {
        if report.inserted >= limit {
            break;
        }
        report.read += 1;

        let name = match canonicalize_domain(&row.raw) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(line = row.line, input = %row.raw, error = %e, "Skipping invalid seed");
                report.invalid += 1;
                continue;
            }
        };

        let inserted = catalog
            .upsert_domain(&NewDomain {
                name,
                source: Some(options.source.clone()),
                seed_rank: Some(row.rank),
            })
            .await?;
        if inserted {
            report.inserted += 1;
        } else {
            report.duplicates += 1;
        }
        if report.read % 1000 == 0 {
            tracing::info!(read = report.read, inserted = report.inserted, "Seed load progress");
        }
    }

    tracing::info!(
        source = %options.source,
        read = report.read,
        inserted = report.inserted,
        duplicates = report.duplicates,
        invalid = report.invalid,
        "Seed load complete"
    );
    Ok(report)
}

/// Read a seed file and load it
pub async fn load_file(
    catalog: &SharedCatalog,
    path: &Path,
    options: &SeedOptions,
) -> Result<SeedReport> {
    let content = tokio::fs::read_to_string(path).await?;
    let rows = parse_seeds(&content);
    load_rows(catalog, &rows, options).await
}
