mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use compass_core::{CompassConfig, DateRange, SyncProcessor};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "compass")]
#[command(about = "Apply event changes and keep recurring series in sync with your calendar provider")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON file of change requests
    Process {
        /// Path to a JSON array of `{payload, applyTo, status}` items
        file: PathBuf,

        /// Print the change summaries as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored events
    Events {
        /// Calendar id (defaults to the first configured calendar)
        #[arg(short, long)]
        calendar: Option<String>,

        /// Show events from this date (YYYY-MM-DD, or "start" for all past events)
        #[arg(long)]
        from: Option<String>,

        /// Show events until this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Show unscheduled someday events instead
        #[arg(long)]
        someday: bool,
    },
    /// Import changes made on the provider
    Pull {
        /// Calendar id (defaults to the first configured calendar)
        #[arg(short, long)]
        calendar: Option<String>,

        /// Pull events from this date (YYYY-MM-DD, or "start" for all past events)
        #[arg(long)]
        from: Option<String>,

        /// Pull events until this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("COMPASS_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CompassConfig::load()?;

    match cli.command {
        Commands::Process { file, json } => {
            let processor = processor(&config)?;
            commands::process::run(&processor, &file, json).await
        }
        Commands::Events {
            calendar,
            from,
            to,
            someday,
        } => {
            let calendar = resolve_calendar(&config, calendar)?;
            let range = DateRange::from_args(from.as_deref(), to.as_deref(), config.sync_days)
                .map_err(|e| anyhow::anyhow!(e))?;
            commands::events::run(&processor(&config)?, &calendar, &range, someday).await
        }
        Commands::Pull { calendar, from, to } => {
            if config.provider.is_none() {
                anyhow::bail!(
                    "No provider configured.\n\n\
                    Set one in {}:\n  \
                    provider = \"google\"",
                    CompassConfig::config_path()?.display()
                );
            }
            let calendar = resolve_calendar(&config, calendar)?;
            let range = DateRange::from_args(from.as_deref(), to.as_deref(), config.sync_days)
                .map_err(|e| anyhow::anyhow!(e))?;
            commands::pull::run(&processor(&config)?, &calendar, &range).await
        }
    }
}

fn processor(config: &CompassConfig) -> Result<SyncProcessor> {
    let processor = SyncProcessor::new(Arc::new(config.store()), config.resolver());

    Ok(match config.provider_sync()? {
        Some(sync) => {
            tracing::debug!(provider = ?config.provider, timeout = ?sync.timeout(), "provider attached");
            processor.with_provider(sync)
        }
        None => processor,
    })
}

fn resolve_calendar(config: &CompassConfig, calendar: Option<String>) -> Result<String> {
    match calendar {
        Some(id) => Ok(id),
        None => match config.calendars.first() {
            Some(id) => Ok(id.clone()),
            None => anyhow::bail!(
                "No calendar given.\n\n\
                Pass one with --calendar, or list yours in {}:\n  \
                calendars = [\"primary\"]",
                CompassConfig::config_path()?.display()
            ),
        },
    }
}
