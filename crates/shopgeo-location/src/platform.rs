//! Device geolocation capability.
//!
//! [`GeolocationPlatform`] is the seam between the acquisition logic and
//! whatever actually produces fixes (a browser bridge, a GPS daemon, a
//! fixed reference point). One-shot requests are futures; continuous
//! tracking is a stream that stops the underlying watch when dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::channel::mpsc;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use shopgeo_core::Coordinate;
use tokio::time::Instant;

/// Stream of fixes or platform failures from a continuous watch.
pub type PositionStream = BoxStream<'static, Result<RawPosition, PlatformError>>;

/// Unvalidated fix as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy radius in metres.
    pub accuracy: f64,
    pub timestamp_ms: i64,
}

impl From<RawPosition> for Coordinate {
    fn from(raw: RawPosition) -> Self {
        Coordinate {
            latitude: raw.latitude,
            longitude: raw.longitude,
            accuracy_meters: Some(raw.accuracy),
            captured_at_epoch_ms: raw.timestamp_ms,
        }
    }
}

/// A failure reported by the platform, using the W3C numeric codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("geolocation platform error {code}: {message}")]
pub struct PlatformError {
    pub code: u16,
    pub message: String,
}

impl PlatformError {
    pub const PERMISSION_DENIED: u16 = 1;
    pub const POSITION_UNAVAILABLE: u16 = 2;
    pub const TIMEOUT: u16 = 3;

    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn permission_denied() -> Self {
        Self::new(Self::PERMISSION_DENIED, "User denied Geolocation")
    }

    #[must_use]
    pub fn position_unavailable() -> Self {
        Self::new(Self::POSITION_UNAVAILABLE, "Position unavailable")
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(Self::TIMEOUT, "Timeout expired")
    }
}

/// Options passed through to the platform with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the platform may return instead of a fresh one.
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// High accuracy and no cached fixes, as used for one-shot acquisition.
    #[must_use]
    pub fn one_shot(timeout: Duration) -> Self {
        Self {
            enable_high_accuracy: true,
            timeout,
            maximum_age: Duration::ZERO,
        }
    }

    /// High accuracy with a short cache tolerance, as used for watches.
    #[must_use]
    pub fn continuous() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(30),
            maximum_age: Duration::from_secs(5),
        }
    }
}

pub trait GeolocationPlatform: Send + Sync {
    /// Requests a single fix.
    fn current_position(
        &self,
        options: PositionOptions,
    ) -> BoxFuture<'_, Result<RawPosition, PlatformError>>;

    /// Starts continuous tracking. Dropping the returned stream stops it.
    fn watch_position(&self, options: PositionOptions) -> PositionStream;
}

/// Platform that always reports the same point, stamped with the current
/// time. Used for manual ("I am here") locations.
#[derive(Debug, Clone, Copy)]
pub struct FixedPlatform {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
}

impl FixedPlatform {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
        }
    }

    fn fix(&self) -> RawPosition {
        RawPosition {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl GeolocationPlatform for FixedPlatform {
    fn current_position(
        &self,
        _options: PositionOptions,
    ) -> BoxFuture<'_, Result<RawPosition, PlatformError>> {
        future::ready(Ok(self.fix())).boxed()
    }

    fn watch_position(&self, _options: PositionOptions) -> PositionStream {
        // A fixed point never moves: emit once, then stay open.
        stream::once(future::ready(Ok(self.fix())))
            .chain(stream::pending())
            .boxed()
    }
}

/// One scripted response to `current_position`.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Fix(RawPosition),
    Fail(PlatformError),
    /// Never resolves; only a timeout ends the attempt.
    Hang,
}

/// Test double that plays back scripted one-shot responses and lets the
/// caller push events into every open watch stream.
#[derive(Debug, Default)]
pub struct ScriptedPlatform {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    fallback: Mutex<Option<ScriptedResponse>>,
    calls: Mutex<Vec<Instant>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<Result<RawPosition, PlatformError>>>>,
    watch_opens: AtomicUsize,
}

impl ScriptedPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every one-shot request receives `response`.
    #[must_use]
    pub fn always(response: ScriptedResponse) -> Self {
        let platform = Self::default();
        platform.set_fallback(response);
        platform
    }

    /// Queues responses consumed in order; the fallback applies afterwards.
    #[must_use]
    pub fn with_responses(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        let platform = Self::default();
        if let Ok(mut queue) = platform.responses.lock() {
            queue.extend(responses);
        }
        platform
    }

    pub fn push_response(&self, response: ScriptedResponse) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    pub fn set_fallback(&self, response: ScriptedResponse) {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = Some(response);
        }
    }

    /// Number of `current_position` calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Instants at which each `current_position` call was made.
    #[must_use]
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Sends an event to every open watch stream. Returns how many streams
    /// received it.
    pub fn emit(&self, event: Result<RawPosition, PlatformError>) -> usize {
        let Ok(mut watchers) = self.watchers.lock() else {
            return 0;
        };
        watchers.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
        watchers.len()
    }

    /// Watch streams that are still held by a consumer.
    #[must_use]
    pub fn active_watches(&self) -> usize {
        let Ok(mut watchers) = self.watchers.lock() else {
            return 0;
        };
        watchers.retain(|tx| !tx.is_closed());
        watchers.len()
    }

    /// Total number of watch streams ever opened.
    #[must_use]
    pub fn watch_opens(&self) -> usize {
        self.watch_opens.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> ScriptedResponse {
        let queued = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        queued
            .or_else(|| self.fallback.lock().ok().and_then(|f| f.clone()))
            .unwrap_or_else(|| ScriptedResponse::Fail(PlatformError::position_unavailable()))
    }
}

impl GeolocationPlatform for ScriptedPlatform {
    fn current_position(
        &self,
        _options: PositionOptions,
    ) -> BoxFuture<'_, Result<RawPosition, PlatformError>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Instant::now());
        }
        match self.next_response() {
            ScriptedResponse::Fix(raw) => future::ready(Ok(raw)).boxed(),
            ScriptedResponse::Fail(err) => future::ready(Err(err)).boxed(),
            ScriptedResponse::Hang => future::pending().boxed(),
        }
    }

    fn watch_position(&self, _options: PositionOptions) -> PositionStream {
        let (tx, rx) = mpsc::unbounded();
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.push(tx);
        }
        self.watch_opens.fetch_add(1, Ordering::SeqCst);
        rx.boxed()
    }
}
