//! Deliverability command handlers for the CLI.

use std::sync::Arc;

use clap::Subcommand;
use shopgeo_core::{AppConfig, Coordinate, KeyValueStore};
use shopgeo_delivery::{DeliverabilityCache, DeliverabilityClient};
use shopgeo_location::{LocationStore, PositionAcquirer, StoreConfig};

/// Sub-commands available under `deliverability`.
#[derive(Debug, Subcommand)]
pub enum DeliverabilityCommands {
    /// Check whether a product ships to a location (cached)
    Check {
        /// Product id
        #[arg(long)]
        product: i64,
        /// Latitude; defaults to the stored location
        #[arg(long, allow_hyphen_values = true, requires = "lon")]
        lat: Option<f64>,
        /// Longitude; defaults to the stored location
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,
        /// Override the cache TTL in milliseconds
        #[arg(long)]
        max_age_ms: Option<i64>,
    },
    /// Drop the cached verdict for a product at a location
    Invalidate {
        #[arg(long)]
        product: i64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
    /// Drop every cached verdict
    Clear,
    /// Remove expired verdicts
    Purge {
        /// TTL in milliseconds; defaults to SHOPGEO_DELIVERABILITY_MAX_AGE_MS
        #[arg(long)]
        max_age_ms: Option<i64>,
    },
}

fn build_cache(
    config: &AppConfig,
    storage: Arc<dyn KeyValueStore>,
) -> anyhow::Result<DeliverabilityCache> {
    let client = DeliverabilityClient::with_base_url(&config.api_base_url, config.http_timeout_secs)?;
    Ok(DeliverabilityCache::new(storage, Arc::new(client))
        .with_max_age(config.deliverability_max_age_ms))
}

/// Point given on the command line, or else the stored current location.
fn resolve_coordinate(
    config: &AppConfig,
    storage: &Arc<dyn KeyValueStore>,
    lat: Option<f64>,
    lon: Option<f64>,
) -> anyhow::Result<Coordinate> {
    if let (Some(lat), Some(lon)) = (lat, lon) {
        return Ok(Coordinate::new(lat, lon, chrono::Utc::now().timestamp_millis()));
    }
    let store = LocationStore::builder(PositionAcquirer::unsupported(), Arc::clone(storage))
        .config(StoreConfig {
            auto_refresh: false,
            ..StoreConfig::from_app_config(config)
        })
        .build();
    store.restore_from_storage();
    store.current().map(|s| s.coordinate).ok_or_else(|| {
        anyhow::anyhow!("no fresh stored location; pass --lat/--lon or run `location set` first")
    })
}

/// Print the verdict for a product at a location.
///
/// # Errors
///
/// Returns an error if no location is available or the check fails.
pub(crate) async fn run_deliverability_check(
    config: &AppConfig,
    storage: Arc<dyn KeyValueStore>,
    product: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    max_age_ms: Option<i64>,
) -> anyhow::Result<()> {
    let coordinate = resolve_coordinate(config, &storage, lat, lon)?;
    let cache = build_cache(config, storage)?;
    let max_age = max_age_ms.unwrap_or_else(|| cache.max_age_ms());

    let verdict = match cache.check_with_max_age(product, &coordinate, max_age).await {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::debug!(error = ?e, "deliverability check failed");
            anyhow::bail!("{} ({e})", e.kind());
        }
    };

    println!("Product:    {product}");
    println!("Cell:       {}", coordinate.cell());
    println!(
        "Deliverable: {}",
        if verdict.deliverable { "yes" } else { "no" }
    );
    if let Some(reason) = &verdict.reason {
        println!("Reason:     {reason}");
    }
    if let Some(days) = verdict.estimated_days {
        println!("ETA:        {days} day(s)");
    }
    if let Some(cost) = verdict.shipping_cost {
        println!("Shipping:   {cost}");
    }
    if let Some(zone) = &verdict.zone {
        println!("Zone:       {zone}");
    }
    Ok(())
}

pub(crate) fn run_deliverability_invalidate(
    config: &AppConfig,
    storage: Arc<dyn KeyValueStore>,
    product: i64,
    lat: f64,
    lon: f64,
) -> anyhow::Result<()> {
    let cache = build_cache(config, storage)?;
    let coordinate = Coordinate::new(lat, lon, chrono::Utc::now().timestamp_millis());
    if cache.invalidate(product, &coordinate) {
        println!("invalidated product {product} at {}", coordinate.cell());
    } else {
        println!("no cached verdict for product {product} at {}", coordinate.cell());
    }
    Ok(())
}

pub(crate) fn run_deliverability_clear(
    config: &AppConfig,
    storage: Arc<dyn KeyValueStore>,
) -> anyhow::Result<()> {
    let cache = build_cache(config, storage)?;
    let count = cache.len();
    cache.clear_all();
    println!("cleared {count} cached verdict(s)");
    Ok(())
}

pub(crate) fn run_deliverability_purge(
    config: &AppConfig,
    storage: Arc<dyn KeyValueStore>,
    max_age_ms: Option<i64>,
) -> anyhow::Result<()> {
    let cache = build_cache(config, storage)?;
    let removed = cache.purge_expired(max_age_ms.unwrap_or_else(|| cache.max_age_ms()));
    println!("purged {removed} expired verdict(s); {} remain", cache.len());
    Ok(())
}
