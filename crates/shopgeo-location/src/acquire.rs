//! One-shot position acquisition with per-attempt timeout and retry.
//!
//! [`PositionAcquirer::acquire_once`] races each platform request against a
//! timer, classifies failures into [`LocationError`], and retries transient
//! failures with a linear back-off:
//!
//! | Attempt | Sleep before next attempt |
//! |---------|---------------------------|
//! | 1       | `base_delay × 1`          |
//! | 2       | `base_delay × 2`          |
//! | n       | `base_delay × n`          |
//!
//! Permission denial aborts immediately; it is not a transient condition.

use std::sync::Arc;
use std::time::Duration;

use shopgeo_core::{Coordinate, LocationError};

use crate::platform::{GeolocationPlatform, PlatformError, PositionOptions};

/// Retry and timeout policy for [`PositionAcquirer::acquire_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            attempt_timeout: Duration::from_millis(9_000),
        }
    }
}

/// Maps a platform error code onto the shared taxonomy.
#[must_use]
pub fn classify(err: &PlatformError) -> LocationError {
    match err.code {
        PlatformError::PERMISSION_DENIED => LocationError::PermissionDenied,
        PlatformError::POSITION_UNAVAILABLE => LocationError::PositionUnavailable,
        PlatformError::TIMEOUT => LocationError::Timeout,
        _ => LocationError::Unknown,
    }
}

/// Obtains fixes from a [`GeolocationPlatform`].
///
/// Constructed without a platform, every operation fails with
/// [`LocationError::BrowserUnsupported`].
#[derive(Clone)]
pub struct PositionAcquirer {
    pub(crate) platform: Option<Arc<dyn GeolocationPlatform>>,
}

impl std::fmt::Debug for PositionAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionAcquirer")
            .field("supported", &self.is_supported())
            .finish()
    }
}

impl PositionAcquirer {
    #[must_use]
    pub fn new(platform: Arc<dyn GeolocationPlatform>) -> Self {
        Self {
            platform: Some(platform),
        }
    }

    /// An acquirer for a device with no geolocation capability.
    #[must_use]
    pub fn unsupported() -> Self {
        Self { platform: None }
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.platform.is_some()
    }

    /// Requests one fix, retrying transient failures.
    ///
    /// The returned coordinate is exactly what the platform reported; range
    /// and staleness checks are the caller's job.
    ///
    /// # Errors
    ///
    /// - [`LocationError::BrowserUnsupported`] without a platform (no attempt made).
    /// - [`LocationError::PermissionDenied`] as soon as the platform denies access.
    /// - Otherwise the classification of the last failed attempt once all
    ///   attempts are used.
    pub async fn acquire_once(&self, options: AcquireOptions) -> Result<Coordinate, LocationError> {
        let Some(platform) = &self.platform else {
            return Err(LocationError::BrowserUnsupported);
        };

        let max_attempts = options.max_retries.max(1);
        let request = PositionOptions::one_shot(options.attempt_timeout);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            // Dropping the platform future on timeout cancels that attempt only.
            let outcome =
                tokio::time::timeout(options.attempt_timeout, platform.current_position(request))
                    .await;

            let err = match outcome {
                Ok(Ok(raw)) => {
                    tracing::debug!(
                        attempt,
                        lat = raw.latitude,
                        lon = raw.longitude,
                        accuracy_m = raw.accuracy,
                        "position acquired"
                    );
                    return Ok(raw.into());
                }
                Ok(Err(platform_err)) => {
                    let kind = classify(&platform_err);
                    tracing::debug!(attempt, error = %platform_err, ?kind, "platform reported error");
                    kind
                }
                Err(_elapsed) => LocationError::Timeout,
            };
            last_error = Some(err);

            if err == LocationError::PermissionDenied {
                tracing::warn!(attempt, "location permission denied; not retrying");
                return Err(err);
            }

            if attempt < max_attempts {
                let delay = options.base_delay.saturating_mul(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = ?err,
                    "position acquisition failed; retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let err = last_error.unwrap_or(LocationError::Unknown);
        tracing::warn!(max_attempts, error = ?err, "position acquisition exhausted all attempts");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{RawPosition, ScriptedPlatform, ScriptedResponse};

    fn fix() -> RawPosition {
        RawPosition {
            latitude: 40.7128,
            longitude: -74.006,
            accuracy: 15.0,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    fn acquirer(platform: &Arc<ScriptedPlatform>) -> PositionAcquirer {
        PositionAcquirer::new(Arc::clone(platform) as Arc<dyn GeolocationPlatform>)
    }

    #[test]
    fn classify_maps_w3c_codes() {
        assert_eq!(
            classify(&PlatformError::permission_denied()),
            LocationError::PermissionDenied
        );
        assert_eq!(
            classify(&PlatformError::position_unavailable()),
            LocationError::PositionUnavailable
        );
        assert_eq!(classify(&PlatformError::timeout()), LocationError::Timeout);
        assert_eq!(
            classify(&PlatformError::new(42, "weird")),
            LocationError::Unknown
        );
    }

    #[tokio::test]
    async fn unsupported_platform_fails_without_attempting() {
        let result = PositionAcquirer::unsupported()
            .acquire_once(AcquireOptions::default())
            .await;
        assert_eq!(result, Err(LocationError::BrowserUnsupported));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_try() {
        let platform = Arc::new(ScriptedPlatform::always(ScriptedResponse::Fix(fix())));
        let coord = acquirer(&platform)
            .acquire_once(AcquireOptions::default())
            .await
            .unwrap();
        assert_eq!(coord, Coordinate::from(fix()));
        assert_eq!(platform.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_not_retried() {
        let platform = Arc::new(ScriptedPlatform::always(ScriptedResponse::Fail(
            PlatformError::permission_denied(),
        )));
        let result = acquirer(&platform)
            .acquire_once(AcquireOptions::default())
            .await;
        assert_eq!(result, Err(LocationError::PermissionDenied));
        assert_eq!(
            platform.call_count(),
            1,
            "PermissionDenied must not be retried"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_timeouts_with_linear_backoff_then_succeeds() {
        let platform = Arc::new(ScriptedPlatform::with_responses([
            ScriptedResponse::Fail(PlatformError::timeout()),
            ScriptedResponse::Fail(PlatformError::timeout()),
            ScriptedResponse::Fix(fix()),
        ]));
        let start = tokio::time::Instant::now();
        let coord = acquirer(&platform)
            .acquire_once(AcquireOptions::default())
            .await
            .unwrap();

        assert_eq!(coord.latitude, 40.7128);
        let times = platform.call_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0] - start, Duration::ZERO);
        assert_eq!(times[1] - times[0], Duration::from_millis(1_000));
        assert_eq!(times[2] - times[1], Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_returns_last_error() {
        let platform = Arc::new(ScriptedPlatform::with_responses([
            ScriptedResponse::Fail(PlatformError::timeout()),
            ScriptedResponse::Fail(PlatformError::timeout()),
            ScriptedResponse::Fail(PlatformError::position_unavailable()),
        ]));
        let result = acquirer(&platform)
            .acquire_once(AcquireOptions::default())
            .await;
        assert_eq!(result, Err(LocationError::PositionUnavailable));
        assert_eq!(platform.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_platform_times_out_each_attempt() {
        let platform = Arc::new(ScriptedPlatform::always(ScriptedResponse::Hang));
        let options = AcquireOptions {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            attempt_timeout: Duration::from_millis(500),
        };
        let start = tokio::time::Instant::now();
        let result = acquirer(&platform).acquire_once(options).await;

        assert_eq!(result, Err(LocationError::Timeout));
        assert_eq!(platform.call_count(), 2);
        // 500 (timeout) + 100 (back-off) + 500 (timeout)
        assert_eq!(start.elapsed(), Duration::from_millis(1_100));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_still_makes_one_attempt() {
        let platform = Arc::new(ScriptedPlatform::always(ScriptedResponse::Fail(
            PlatformError::position_unavailable(),
        )));
        let options = AcquireOptions {
            max_retries: 0,
            ..AcquireOptions::default()
        };
        let result = acquirer(&platform).acquire_once(options).await;
        assert_eq!(result, Err(LocationError::PositionUnavailable));
        assert_eq!(platform.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_platform_code_is_retried() {
        let platform = Arc::new(ScriptedPlatform::with_responses([
            ScriptedResponse::Fail(PlatformError::new(99, "driver glitch")),
            ScriptedResponse::Fix(fix()),
        ]));
        let result = acquirer(&platform)
            .acquire_once(AcquireOptions::default())
            .await;
        assert!(result.is_ok());
        assert_eq!(platform.call_count(), 2);
    }
}
