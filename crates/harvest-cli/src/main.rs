use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use harvest_core::config::EngineConfig;
use harvest_core::posting::SearchParams;
use harvest_scrape::build_aggregator;

#[derive(Parser)]
#[command(name = "harvest", version, about = "Job posting aggregation engine")]
struct Cli {
    /// Path to the engine configuration file (JSON). Built-in defaults
    /// apply when omitted.
    #[arg(short, long, global = true, env = "HARVEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one aggregation batch across all configured sources
    Run {
        /// Search term, repeatable (e.g. --term "rust engineer" --term sre)
        #[arg(short, long = "term", required = true, num_args = 1..)]
        terms: Vec<String>,

        /// Location filter
        #[arg(short, long)]
        location: Option<String>,

        /// Only remote positions
        #[arg(long, default_value_t = false)]
        remote: bool,

        /// Write the full report as JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run selector health checks and print the report
    Health {
        /// Search term used for the verification pages
        #[arg(short, long, default_value = "software engineer")]
        term: String,
    },

    /// Delete all cached responses
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            terms,
            location,
            remote,
            output,
        } => {
            let mut params = SearchParams::new(terms);
            if let Some(location) = location {
                params = params.with_location(location);
            }
            params.remote_only = remote;
            cmd_run(&config, &params, output.as_deref()).await?;
        }
        Commands::Health { term } => {
            cmd_health(&config, &term).await?;
        }
        Commands::ClearCache => {
            cmd_clear_cache(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

async fn cmd_run(
    config: &EngineConfig,
    params: &SearchParams,
    output: Option<&Path>,
) -> Result<()> {
    let service = build_aggregator(config).map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(
        scrapers = service.scraper_count(),
        connectors = service.connector_count(),
        terms = params.terms.len(),
        "Starting aggregation"
    );

    let report = service.aggregate(params).await;

    tracing::info!(
        jobs = report.postings.len(),
        succeeded = report.sources_succeeded,
        failed = report.sources_failed,
        "Done"
    );
    for error in &report.errors {
        tracing::warn!(source = %error.source, "{}", error.message);
    }

    let json = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            tracing::info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_health(config: &EngineConfig, term: &str) -> Result<()> {
    let service = build_aggregator(config).map_err(|e| anyhow::anyhow!(e))?;
    let params = SearchParams::new(vec![term.to_string()]);

    let report = service.run_health_checks(&params).await;
    for entry in &report {
        if entry.alert {
            tracing::warn!(
                site = %entry.site,
                purpose = %entry.purpose,
                rate = entry.success_rate,
                "Selector below health threshold"
            );
        }
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_clear_cache(config: &EngineConfig) -> Result<()> {
    if !config.cache_dir.exists() {
        tracing::info!(dir = %config.cache_dir.display(), "Cache directory does not exist");
        return Ok(());
    }
    std::fs::remove_dir_all(&config.cache_dir).with_context(|| {
        format!("Failed to remove cache dir {}", config.cache_dir.display())
    })?;
    tracing::info!(dir = %config.cache_dir.display(), "Cache cleared");
    Ok(())
}
