//! Throttling and batching policies for continuous location updates.
//!
//! [`RateLimiter`] gates how often updates propagate; [`Batcher`] groups
//! points for consumers that upload in bulk. Neither does any I/O.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Admits at most one update per `min_interval`.
///
/// The first call to [`RateLimiter::should_update`] always succeeds.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Returns `true` and restarts the interval if enough time has passed
    /// since the last admitted update.
    pub fn should_update(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forgets the last admitted update; the next call is admitted.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Time since the last admitted update, or `None` if nothing has been
    /// admitted since construction or the last reset.
    #[must_use]
    pub fn time_since_last(&self) -> Option<Duration> {
        self.last.map(|last| last.elapsed())
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// A point queued for a batched upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchedPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at_epoch_ms: i64,
}

/// FIFO buffer that signals when `batch_size` points are waiting.
#[derive(Debug, Clone)]
pub struct Batcher {
    batch_size: usize,
    points: VecDeque<BatchedPoint>,
}

impl Batcher {
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            points: VecDeque::new(),
        }
    }

    /// Appends a point stamped with the current time. Returns `true` once
    /// the buffer holds at least a full batch.
    pub fn add(&mut self, latitude: f64, longitude: f64) -> bool {
        self.points.push_back(BatchedPoint {
            latitude,
            longitude,
            recorded_at_epoch_ms: chrono::Utc::now().timestamp_millis(),
        });
        self.points.len() >= self.batch_size
    }

    /// Removes and returns up to `batch_size` of the oldest points.
    pub fn drain(&mut self) -> Vec<BatchedPoint> {
        let n = self.batch_size.min(self.points.len());
        self.points.drain(..n).collect()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}
