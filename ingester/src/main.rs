mod app;
mod backfill;
mod batch;
mod cache;
mod catalog;
mod checkpoint;
mod model;
mod pipeline;
mod sink;
mod source;

#[cfg(test)]
mod testing;

use app::CatalogSource;
use clap::{ArgGroup, Parser, Subcommand};
use ingester_core::{telemetry, Config, Error};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, warn};

#[derive(Parser)]
#[clap(name = "ingester")]
#[clap(about = "Incremental Steam review ingester", version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the checkpoint table
    Migrate,

    /// Fetch new reviews for every app in the catalog
    #[clap(group(
        ArgGroup::new("catalog_source")
            .required(true)
            .args(["catalog", "steam_app_list"])
    ))]
    Run {
        /// JSON file of {game_id, game_name} objects
        #[clap(long, env = "CATALOG_FILE")]
        catalog: Option<PathBuf>,

        /// Use the full Steam app list as the catalog
        #[clap(long)]
        steam_app_list: bool,

        /// Only process the first N apps
        #[clap(long)]
        limit: Option<usize>,
    },

    /// Seed checkpoints from Parquet files already written
    Backfill {
        /// Local directory to scan; defaults to the configured output backend
        #[clap(long, env = "BACKFILL_PARQUET_DIR")]
        parquet_dir: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().map_err(|e| Error::Config(e.to_string()))?;

    telemetry::init(&config.telemetry)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            info!("Running database migrations");
            app::migrate(&config).await?;
            info!("Migrations completed successfully");
        }

        Commands::Run {
            catalog,
            steam_app_list: _,
            limit,
        } => {
            let source = match catalog {
                Some(path) => CatalogSource::File(path),
                None => CatalogSource::SteamAppList,
            };

            let app = app::App::new(config).await?;
            let items = app.load_catalog(&source, limit).await?;
            if items.is_empty() {
                warn!(source = ?source, "Catalog is empty, nothing to do");
            }

            let summary = app.run_ingestion(&items).await?;
            if summary.records_unpersisted > 0 {
                anyhow::bail!(
                    "{} records could not be persisted",
                    summary.records_unpersisted
                );
            }
        }

        Commands::Backfill { parquet_dir } => {
            info!(directory = ?parquet_dir, "Starting checkpoint backfill");
            let app = app::App::new(config).await?;
            let updated = app.run_backfill(parquet_dir).await?;
            info!(updated, "Checkpoint backfill finished");
        }
    }

    telemetry::shutdown();
    Ok(())
}
