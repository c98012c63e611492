use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crawl_lease::config::Config;

mod commands;

use commands::{ClaimsCommand, DomainsCommand, PrioritiesCommand, RunsCommand};

#[derive(Parser)]
#[command(
    name = "crawl-lease",
    version,
    about = "Domain scheduling and lease coordination for distributed crawl workers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (pretty, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the catalog schema
    Migrate,

    /// Load domains from a seed file
    Seed {
        /// Seed file: `rank,domain` or `domain` per line
        file: PathBuf,

        /// Provenance label stored on inserted rows
        #[arg(long, default_value = crawl_lease::seeds::DEFAULT_SOURCE)]
        source: String,

        /// Maximum rows to insert
        #[arg(long)]
        limit: Option<usize>,

        /// Data rows to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Inspect and override catalog rows
    Domains {
        #[command(subcommand)]
        action: DomainsCommand,
    },

    /// Inspect and clear leases
    Claims {
        #[command(subcommand)]
        action: ClaimsCommand,
    },

    /// Priority scoring
    Priorities {
        #[command(subcommand)]
        action: PrioritiesCommand,
    },

    /// Crawl run bookkeeping
    Runs {
        #[command(subcommand)]
        action: RunsCommand,
    },

    /// Run the operator HTTP API with periodic maintenance
    Serve {
        /// Bind address, overrides the configured one
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Migrate => {
            tracing::info!("Starting migrate command");
            commands::migrate(&config).await?;
        }

        Commands::Seed {
            file,
            source,
            limit,
            offset,
        } => {
            tracing::info!(
                file = %file.display(),
                source = %source,
                limit = ?limit,
                offset = %offset,
                "Starting seed command"
            );
            commands::seed(&config, file, source, limit, offset).await?;
        }

        Commands::Domains { action } => commands::domains(&config, action).await?,
        Commands::Claims { action } => commands::claims(&config, action).await?,
        Commands::Priorities { action } => commands::priorities(&config, action).await?,
        Commands::Runs { action } => commands::runs(&config, action).await?,

        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.control.bind_address = bind;
            }
            commands::serve(config).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => tracing_subscriber::EnvFilter::new("crawl_lease=debug,info"),
        Err(_) => tracing_subscriber::EnvFilter::new(format!("crawl_lease={level},warn")),
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
