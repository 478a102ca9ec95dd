mod deliverability;
mod location;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use shopgeo_core::{AppConfig, FileStore, KeyValueStore};
use tracing_subscriber::EnvFilter;

use crate::deliverability::DeliverabilityCommands;
use crate::location::LocationCommands;

#[derive(Debug, Parser)]
#[command(name = "shopgeo")]
#[command(about = "Shop geolocation and deliverability command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Inspect or change the stored current location
    Location {
        #[command(subcommand)]
        command: LocationCommands,
    },
    /// Check and manage cached deliverability verdicts
    Deliverability {
        #[command(subcommand)]
        command: DeliverabilityCommands,
    },
}

/// Opens the durable store shared by the location and deliverability
/// commands.
fn open_storage(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    tracing::debug!(path = %config.storage_path.display(), "opening durable store");
    Arc::new(FileStore::new(config.storage_path.clone()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = shopgeo_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let storage = open_storage(&config);

    match cli.command {
        Some(Commands::Location { command }) => match command {
            LocationCommands::Show => location::run_location_show(&config, storage),
            LocationCommands::Set {
                lat,
                lon,
                accuracy,
            } => location::run_location_set(&config, storage, lat, lon, accuracy).await?,
            LocationCommands::Clear => location::run_location_clear(&config, storage),
        },
        Some(Commands::Deliverability { command }) => match command {
            DeliverabilityCommands::Check {
                product,
                lat,
                lon,
                max_age_ms,
            } => {
                deliverability::run_deliverability_check(
                    &config, storage, product, lat, lon, max_age_ms,
                )
                .await?;
            }
            DeliverabilityCommands::Invalidate { product, lat, lon } => {
                deliverability::run_deliverability_invalidate(&config, storage, product, lat, lon)?;
            }
            DeliverabilityCommands::Clear => {
                deliverability::run_deliverability_clear(&config, storage)?;
            }
            DeliverabilityCommands::Purge { max_age_ms } => {
                deliverability::run_deliverability_purge(&config, storage, max_age_ms)?;
            }
        },
        None => println!("shopgeo: pass --help to list commands"),
    }

    Ok(())
}
