//! Coordinate model and pure validation helpers.
//!
//! Everything here is side-effect free: range checks, accuracy and staleness
//! predicates, great-circle distance, and the cell quantization used as the
//! deliverability cache key.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius used by the haversine formula.
const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Accuracy (metres) at or below which a fix is considered usable.
pub const DEFAULT_ACCURACY_THRESHOLD_M: f64 = 100.0;

/// Age after which a captured coordinate is considered stale (10 minutes).
pub const DEFAULT_MAX_AGE_MS: i64 = 600_000;

/// Distance under which two fixes are treated as the same place.
pub const DEFAULT_SAME_LOCATION_TOLERANCE_M: f64 = 50.0;

/// Decimal places kept when quantizing a coordinate into a cache cell.
/// Four places is roughly 11 m of latitude.
pub const DEFAULT_CELL_DECIMALS: u32 = 4;

/// A latitude/longitude fix with optional accuracy and its capture time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    pub captured_at_epoch_ms: i64,
}

impl Coordinate {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, captured_at_epoch_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: None,
            captured_at_epoch_ms,
        }
    }

    #[must_use]
    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    /// Checks the range of both axes and that any reported accuracy is a
    /// finite, non-negative number.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvalidCoordinate`] reason found.
    pub fn validate(&self) -> Result<(), InvalidCoordinate> {
        validate(self.latitude, self.longitude)?;
        if let Some(acc) = self.accuracy_meters {
            if !acc.is_finite() || acc < 0.0 {
                return Err(InvalidCoordinate::Accuracy(acc));
            }
        }
        Ok(())
    }

    /// Cache cell for this coordinate at the default precision.
    #[must_use]
    pub fn cell(&self) -> String {
        quantize_cell(self.latitude, self.longitude, DEFAULT_CELL_DECIMALS)
    }
}

/// Why a coordinate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InvalidCoordinate {
    #[error("latitude is not a finite number")]
    LatitudeNotFinite,

    #[error("longitude is not a finite number")]
    LongitudeNotFinite,

    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("accuracy {0} must be a finite, non-negative number of metres")]
    Accuracy(f64),
}

/// Validates a latitude/longitude pair.
///
/// # Errors
///
/// Returns [`InvalidCoordinate`] when either value is NaN/infinite or lies
/// outside `[-90, 90]` / `[-180, 180]`.
pub fn validate(lat: f64, lon: f64) -> Result<(), InvalidCoordinate> {
    if !lat.is_finite() {
        return Err(InvalidCoordinate::LatitudeNotFinite);
    }
    if !lon.is_finite() {
        return Err(InvalidCoordinate::LongitudeNotFinite);
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(InvalidCoordinate::LatitudeOutOfRange(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(InvalidCoordinate::LongitudeOutOfRange(lon));
    }
    Ok(())
}

/// Unknown accuracy counts as acceptable.
#[must_use]
pub fn is_accurate(accuracy_meters: Option<f64>, threshold_m: f64) -> bool {
    accuracy_meters.is_none_or(|acc| acc <= threshold_m)
}

/// `true` when more than `max_age_ms` has passed between capture and `now_ms`.
#[must_use]
pub fn is_stale(captured_at_epoch_ms: i64, now_ms: i64, max_age_ms: i64) -> bool {
    now_ms.saturating_sub(captured_at_epoch_ms) > max_age_ms
}

/// Great-circle distance in kilometres (haversine).
#[must_use]
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Clamp guards asin against rounding pushing `a` fractionally past 1.
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

#[must_use]
pub fn same_location(lat1: f64, lon1: f64, lat2: f64, lon2: f64, tolerance_m: f64) -> bool {
    distance_km(lat1, lon1, lat2, lon2) * 1_000.0 <= tolerance_m
}

/// Quantizes a coordinate into a stable `"lat,lon"` cell key.
///
/// Values are rounded (not truncated) to `decimals` places, and negative
/// zero is folded into zero so points straddling the equator or prime
/// meridian at cell resolution share a key.
#[must_use]
pub fn quantize_cell(lat: f64, lon: f64, decimals: u32) -> String {
    let places = decimals as usize;
    format!(
        "{:.places$},{:.places$}",
        round_to(lat, decimals),
        round_to(lon, decimals)
    )
}

fn round_to(value: f64, decimals: u32) -> f64 {
    #[allow(clippy::cast_possible_wrap)]
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn validate_accepts_range_edges() {
        for (lat, lon) in [
            (0.0, 0.0),
            (90.0, 180.0),
            (-90.0, -180.0),
            (45.5, -122.6),
            (-33.86, 151.2),
        ] {
            assert!(validate(lat, lon).is_ok(), "({lat}, {lon}) should be valid");
        }
    }

    #[test]
    fn validate_rejects_out_of_range() {
        assert_eq!(
            validate(90.000_1, 0.0),
            Err(InvalidCoordinate::LatitudeOutOfRange(90.000_1))
        );
        assert_eq!(
            validate(0.0, -180.5),
            Err(InvalidCoordinate::LongitudeOutOfRange(-180.5))
        );
        assert!(matches!(
            validate(200.0, 0.0),
            Err(InvalidCoordinate::LatitudeOutOfRange(_))
        ));
    }

    #[test]
    fn validate_rejects_non_finite() {
        assert_eq!(
            validate(f64::NAN, 0.0),
            Err(InvalidCoordinate::LatitudeNotFinite)
        );
        assert_eq!(
            validate(0.0, f64::INFINITY),
            Err(InvalidCoordinate::LongitudeNotFinite)
        );
    }

    #[test]
    fn coordinate_validate_rejects_negative_accuracy() {
        let c = Coordinate::new(10.0, 10.0, 0).with_accuracy(-1.0);
        assert_eq!(c.validate(), Err(InvalidCoordinate::Accuracy(-1.0)));
    }

    #[test]
    fn unknown_accuracy_is_acceptable() {
        assert!(is_accurate(None, DEFAULT_ACCURACY_THRESHOLD_M));
        assert!(is_accurate(Some(100.0), DEFAULT_ACCURACY_THRESHOLD_M));
        assert!(!is_accurate(Some(100.1), DEFAULT_ACCURACY_THRESHOLD_M));
    }

    #[test]
    fn staleness_boundary_is_exclusive() {
        assert!(!is_stale(0, DEFAULT_MAX_AGE_MS, DEFAULT_MAX_AGE_MS));
        assert!(is_stale(0, DEFAULT_MAX_AGE_MS + 1, DEFAULT_MAX_AGE_MS));
        assert!(!is_stale(1_000, 500, DEFAULT_MAX_AGE_MS));
    }

    #[test]
    fn distance_is_zero_for_identical_points() {
        for (lat, lon) in [(0.0, 0.0), (51.5074, -0.1278), (-89.9, 179.9)] {
            assert!(distance_km(lat, lon, lat, lon).abs() < EPS);
        }
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            ((40.7128, -74.0060), (34.0522, -118.2437)),
            ((-33.8688, 151.2093), (51.5074, -0.1278)),
            ((0.0, 179.9), (0.0, -179.9)),
        ];
        for ((a_lat, a_lon), (b_lat, b_lon)) in pairs {
            let ab = distance_km(a_lat, a_lon, b_lat, b_lon);
            let ba = distance_km(b_lat, b_lon, a_lat, a_lon);
            assert!((ab - ba).abs() < EPS, "{ab} != {ba}");
        }
    }

    #[test]
    fn distance_new_york_to_los_angeles_is_about_3936_km() {
        let d = distance_km(40.7128, -74.0060, 34.0522, -118.2437);
        assert!((d - 3_936.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn same_location_is_reflexive() {
        assert!(same_location(
            12.34,
            56.78,
            12.34,
            56.78,
            DEFAULT_SAME_LOCATION_TOLERANCE_M
        ));
    }

    #[test]
    fn same_location_tolerates_ten_metres() {
        // 0.00009 degrees of latitude is ~10 m.
        assert!(same_location(
            40.0,
            -74.0,
            40.000_09,
            -74.0,
            DEFAULT_SAME_LOCATION_TOLERANCE_M
        ));
    }

    #[test]
    fn same_location_rejects_ten_kilometres() {
        // 0.09 degrees of latitude is ~10 km.
        assert!(!same_location(
            40.0,
            -74.0,
            40.09,
            -74.0,
            DEFAULT_SAME_LOCATION_TOLERANCE_M
        ));
    }

    #[test]
    fn quantize_cell_collapses_nearby_points() {
        let a = quantize_cell(40.712_81, -74.006_02, 4);
        let b = quantize_cell(40.712_84, -74.005_98, 4);
        assert_eq!(a, "40.7128,-74.0060");
        assert_eq!(a, b);
    }

    #[test]
    fn quantize_cell_separates_distant_points() {
        assert_ne!(
            quantize_cell(40.7128, -74.0060, 4),
            quantize_cell(40.7138, -74.0060, 4)
        );
    }

    #[test]
    fn quantize_cell_folds_negative_zero() {
        assert_eq!(quantize_cell(-0.000_01, 0.000_01, 4), "0.0000,0.0000");
    }

    #[test]
    fn coordinate_serializes_camel_case() {
        let c = Coordinate::new(1.5, 2.5, 1_700_000_000_000).with_accuracy(12.0);
        let json = serde_json::to_value(c).unwrap();
        assert_eq!(json["latitude"], 1.5);
        assert_eq!(json["accuracyMeters"], 12.0);
        assert_eq!(json["capturedAtEpochMs"], 1_700_000_000_000_i64);
    }
}
