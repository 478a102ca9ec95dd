//! Shared location failure taxonomy.
//!
//! Each variant's `Display` text is the fixed, user-facing message for that
//! failure. UI code renders these strings verbatim, so they must not vary by
//! call site.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationError {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    BrowserUnsupported,
    InvalidCoordinates,
    StaleLocation,
    NetworkError,
    Unknown,
}

impl std::fmt::Display for LocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for LocationError {}

impl LocationError {
    /// The fixed user-facing message for this failure.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Location access was denied. Enable location permissions in your browser settings to see delivery options for your area."
            }
            Self::PositionUnavailable => {
                "Your location could not be determined. Check that location services are turned on and try again."
            }
            Self::Timeout => "Finding your location took too long. Please try again.",
            Self::BrowserUnsupported => {
                "Location services are not supported by this browser or device."
            }
            Self::InvalidCoordinates => "The location received was invalid. Please try again.",
            Self::StaleLocation => {
                "Your saved location is out of date. Please refresh your location."
            }
            Self::NetworkError => {
                "Could not reach the server. Check your internet connection and try again."
            }
            Self::Unknown => "Something went wrong while getting your location. Please try again.",
        }
    }

    /// Whether a fresh attempt may succeed. Permission denial and missing
    /// platform support are terminal.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::PositionUnavailable | Self::Timeout)
    }
}
