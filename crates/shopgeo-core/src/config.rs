use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so it can be tested with a `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        match or_default(var, default).to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(var, format!("expected a boolean, got \"{other}\""))),
        }
    };

    let env = parse_environment(&or_default("SHOPGEO_ENV", "development"))?;
    let log_level = or_default("SHOPGEO_LOG_LEVEL", "info");

    // Production must point at a real backend rather than the local default.
    let api_base_url = match lookup("SHOPGEO_API_BASE_URL") {
        Ok(url) => url,
        Err(_) if env == Environment::Production => {
            return Err(ConfigError::MissingEnvVar(
                "SHOPGEO_API_BASE_URL".to_string(),
            ))
        }
        Err(_) => DEFAULT_API_BASE_URL.to_string(),
    };
    if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
        return Err(invalid(
            "SHOPGEO_API_BASE_URL",
            format!("\"{api_base_url}\" is not an http(s) URL"),
        ));
    }

    let api_token = lookup("SHOPGEO_API_TOKEN").ok().filter(|t| !t.is_empty());
    let session_id = lookup("SHOPGEO_SESSION_ID").ok().filter(|s| !s.is_empty());
    let storage_path = PathBuf::from(or_default(
        "SHOPGEO_STORAGE_PATH",
        "./.shopgeo/storage.json",
    ));

    let http_timeout_secs = parse_u64("SHOPGEO_HTTP_TIMEOUT_SECS", "30")?;
    let geo_max_retries = parse_u32("SHOPGEO_GEO_MAX_RETRIES", "3")?;
    if geo_max_retries == 0 {
        return Err(invalid(
            "SHOPGEO_GEO_MAX_RETRIES",
            "must allow at least one attempt".to_string(),
        ));
    }
    let geo_retry_base_delay_ms = parse_u64("SHOPGEO_GEO_RETRY_BASE_DELAY_MS", "1000")?;
    let geo_attempt_timeout_ms = parse_u64("SHOPGEO_GEO_ATTEMPT_TIMEOUT_MS", "9000")?;
    let watch_min_interval_ms = parse_u64("SHOPGEO_WATCH_MIN_INTERVAL_MS", "45000")?;
    let auto_refresh = parse_bool("SHOPGEO_AUTO_REFRESH", "true")?;
    let deliverability_max_age_ms = or_default("SHOPGEO_DELIVERABILITY_MAX_AGE_MS", "600000")
        .parse::<i64>()
        .map_err(|e| invalid("SHOPGEO_DELIVERABILITY_MAX_AGE_MS", e.to_string()))
        .and_then(|ms| {
            if ms < 0 {
                Err(invalid(
                    "SHOPGEO_DELIVERABILITY_MAX_AGE_MS",
                    "must not be negative".to_string(),
                ))
            } else {
                Ok(ms)
            }
        })?;

    Ok(AppConfig {
        env,
        log_level,
        api_base_url,
        api_token,
        session_id,
        storage_path,
        http_timeout_secs,
        geo_max_retries,
        geo_retry_base_delay_ms,
        geo_attempt_timeout_ms,
        watch_min_interval_ms,
        auto_refresh,
        deliverability_max_age_ms,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] for anything other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "SHOPGEO_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
