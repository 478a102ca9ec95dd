//! Continuous tracking with a minimum interval between delivered updates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use futures::StreamExt;
use shopgeo_core::{Coordinate, LocationError};
use tokio::task::JoinHandle;

use crate::acquire::{classify, PositionAcquirer};
use crate::platform::PositionOptions;
use crate::rate_limit::RateLimiter;

type UpdateHandler = Box<dyn FnMut(Coordinate) + Send>;
type ErrorHandler = Box<dyn FnMut(LocationError) + Send>;

struct Handlers {
    on_update: UpdateHandler,
    on_error: ErrorHandler,
}

/// Handle to an open watch. Dropping it cancels the watch.
pub struct WatchSubscription {
    cancelled: Arc<AtomicBool>,
    handlers: Arc<Mutex<Option<Handlers>>>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl WatchSubscription {
    /// Stops the watch. Safe to call any number of times, including from
    /// inside one of the watch's own callbacks.
    ///
    /// No callback starts after this returns. A callback already running on
    /// another thread is allowed to finish.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // The driver holds this lock while a callback runs, so WouldBlock
        // means a callback is in flight; it re-checks the flag before the
        // next one.
        match self.handlers.try_lock() {
            Ok(mut handlers) => {
                handlers.take();
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().take();
            }
            Err(TryLockError::WouldBlock) => {}
        }
        self.task.abort();
        tracing::debug!("location watch cancelled");
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl PositionAcquirer {
    /// Subscribes to continuous platform updates.
    ///
    /// `on_update` receives at most one fix per `min_interval`; fixes arriving
    /// sooner are dropped, not queued. Platform errors are classified and
    /// passed to `on_error` without ending the watch.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::BrowserUnsupported`] if there is no platform.
    pub fn watch<U, E>(
        &self,
        min_interval: Duration,
        on_update: U,
        on_error: E,
    ) -> Result<WatchSubscription, LocationError>
    where
        U: FnMut(Coordinate) + Send + 'static,
        E: FnMut(LocationError) + Send + 'static,
    {
        let Some(platform) = &self.platform else {
            return Err(LocationError::BrowserUnsupported);
        };

        let mut stream = platform.watch_position(PositionOptions::continuous());
        let cancelled = Arc::new(AtomicBool::new(false));
        let handlers = Arc::new(Mutex::new(Some(Handlers {
            on_update: Box::new(on_update),
            on_error: Box::new(on_error),
        })));

        let task_cancelled = Arc::clone(&cancelled);
        let task_handlers = Arc::clone(&handlers);
        let task = tokio::spawn(async move {
            let mut limiter = RateLimiter::new(min_interval);
            while let Some(event) = stream.next().await {
                let mut guard = match task_handlers.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if task_cancelled.load(Ordering::SeqCst) {
                    break;
                }
                let Some(handlers) = guard.as_mut() else {
                    break;
                };
                match event {
                    Ok(raw) => {
                        if limiter.should_update() {
                            (handlers.on_update)(raw.into());
                        } else {
                            tracing::trace!(
                                lat = raw.latitude,
                                lon = raw.longitude,
                                "watch update dropped by rate limiter"
                            );
                        }
                    }
                    Err(err) => {
                        let kind = classify(&err);
                        tracing::debug!(error = %err, ?kind, "watch reported error");
                        (handlers.on_error)(kind);
                    }
                }
            }
            tracing::debug!("location watch stream ended");
        });

        tracing::debug!(
            min_interval_ms = u64::try_from(min_interval.as_millis()).unwrap_or(u64::MAX),
            "location watch opened"
        );

        Ok(WatchSubscription {
            cancelled,
            handlers,
            task,
        })
    }
}
