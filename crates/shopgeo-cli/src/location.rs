//! Location command handlers for the CLI.
//!
//! The CLI has no device sensor: `set` feeds the given point through a
//! fixed position source so it goes through the same validation and
//! persistence path as a real fix.

use std::sync::Arc;

use clap::Subcommand;
use shopgeo_core::{AppConfig, KeyValueStore};
use shopgeo_location::{
    FixedPlatform, LocationApiClient, LocationReport, LocationState, LocationStore,
    PositionAcquirer, RestoreOutcome, StoreConfig,
};

/// Sub-commands available under `location`.
#[derive(Debug, Subcommand)]
pub enum LocationCommands {
    /// Show the stored location and permission state
    Show,
    /// Record a location manually
    Set {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Accuracy radius in metres
        #[arg(long, default_value = "10")]
        accuracy: f64,
    },
    /// Forget the stored location and permission history
    Clear,
}

/// One-shot commands never keep a refresh watch open.
fn store_config(config: &AppConfig) -> StoreConfig {
    StoreConfig {
        auto_refresh: false,
        ..StoreConfig::from_app_config(config)
    }
}

fn build_store(
    config: &AppConfig,
    storage: Arc<dyn KeyValueStore>,
    acquirer: PositionAcquirer,
) -> LocationStore {
    LocationStore::builder(acquirer, storage)
        .config(store_config(config))
        .build()
}

fn fmt_epoch_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms).map_or_else(
        || format!("{ms} ms"),
        |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

fn print_state(state: &LocationState) {
    match &state.current {
        Some(snapshot) => {
            let c = snapshot.coordinate;
            println!("Location:   {:.6}, {:.6}", c.latitude, c.longitude);
            println!("Cell:       {}", c.cell());
            if let Some(acc) = c.accuracy_meters {
                println!("Accuracy:   {acc:.0} m");
            }
            println!("Captured:   {}", fmt_epoch_ms(c.captured_at_epoch_ms));
            println!("Source:     {:?}", snapshot.provenance);
        }
        None => println!("Location:   (none)"),
    }
    println!("Permission: {}", state.permission);
    if let Some(err) = state.last_error {
        println!("Error:      {err}");
    }
}

/// Show the persisted location, if it is still fresh.
pub(crate) fn run_location_show(config: &AppConfig, storage: Arc<dyn KeyValueStore>) {
    let store = build_store(config, storage, PositionAcquirer::unsupported());
    let outcome = store.restore_from_storage();
    print_state(&store.snapshot());
    match outcome {
        RestoreOutcome::Stale => {
            println!("(stored location was older than the staleness limit and has been removed)");
        }
        RestoreOutcome::Missing if store.permission_previously_requested() => {
            println!("(location permission was requested before; run `location set` to record one)");
        }
        RestoreOutcome::Missing | RestoreOutcome::Restored => {}
    }
}

/// Record a manual location, then report it to the backend if a token is
/// configured.
///
/// # Errors
///
/// Returns an error if the coordinate is rejected. A failed report is
/// printed but does not fail the command.
pub(crate) async fn run_location_set(
    config: &AppConfig,
    storage: Arc<dyn KeyValueStore>,
    lat: f64,
    lon: f64,
    accuracy: f64,
) -> anyhow::Result<()> {
    let platform = Arc::new(FixedPlatform::new(lat, lon, accuracy));
    let store = build_store(config, storage, PositionAcquirer::new(platform));

    if !store.request_permission().await {
        let reason = store
            .last_error()
            .map_or("unknown failure", shopgeo_core::LocationError::message);
        anyhow::bail!("location rejected: {reason}");
    }
    print_state(&store.snapshot());

    let Some(token) = config.api_token.as_deref() else {
        tracing::debug!("no SHOPGEO_API_TOKEN; skipping location report");
        return Ok(());
    };
    let Some(snapshot) = store.current() else {
        return Ok(());
    };

    let client = LocationApiClient::with_base_url(&config.api_base_url, config.http_timeout_secs)?;
    let session_id = config
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let report = LocationReport {
        latitude: snapshot.coordinate.latitude,
        longitude: snapshot.coordinate.longitude,
        accuracy_meters: snapshot.coordinate.accuracy_meters,
        session_id: Some(session_id),
    };
    match client.record_location(token, &report).await {
        Ok(stored) => match stored.id {
            Some(id) => println!("Reported:   record {id}"),
            None => println!("Reported:   ok"),
        },
        Err(e) => {
            tracing::warn!(error = %e, endpoint = %client.endpoint(), "location report failed");
            println!("Reported:   failed ({e})");
        }
    }
    Ok(())
}

pub(crate) fn run_location_clear(config: &AppConfig, storage: Arc<dyn KeyValueStore>) {
    let store = build_store(config, storage, PositionAcquirer::unsupported());
    store.clear_location();
    println!("location cleared");
}
