pub mod app_config;
pub mod clock;
pub mod config;
pub mod error;
pub mod geo;
pub mod storage;

pub use app_config::{AppConfig, Environment};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_app_config, load_app_config_from_env};
pub use error::LocationError;
pub use geo::{Coordinate, InvalidCoordinate};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
