//! Process-wide current location.
//!
//! [`LocationStore`] owns the single current [`LocationSnapshot`] together
//! with loading, error, and permission state. Consumers read it through
//! [`LocationStore::snapshot`] or a [`tokio::sync::watch`] receiver from
//! [`LocationStore::subscribe`]; every mutation goes through the store's own
//! operations and is published as one whole [`LocationState`], so observers
//! never see a half-applied update.
//!
//! Permission state machine:
//!
//! ```text
//! NotRequested --request_permission--> Pending
//! Pending --fix acquired--> Granted
//! Pending --PermissionDenied--> Denied
//! Pending --other failure--> Pending (last_error set)
//! any --clear_location--> NotRequested
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shopgeo_core::geo::{self, DEFAULT_ACCURACY_THRESHOLD_M, DEFAULT_MAX_AGE_MS};
use shopgeo_core::storage::{read_json, remove_quietly, write_json};
use shopgeo_core::{Clock, Coordinate, KeyValueStore, LocationError, SystemClock};
use tokio::sync::watch;

use crate::acquire::{AcquireOptions, PositionAcquirer};
use crate::report::{LocationReport, LocationReporter};
use crate::watch::WatchSubscription;

const SNAPSHOT_KEY: &str = "shopgeo.location.snapshot";
const PERMISSION_REQUESTED_KEY: &str = "shopgeo.location.permission_requested";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    NotRequested,
    Pending,
    Granted,
    Denied,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::NotRequested => write!(f, "not requested"),
            PermissionState::Pending => write!(f, "pending"),
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
        }
    }
}

/// Where the current snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Fresh,
    Restored,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub coordinate: Coordinate,
    pub provenance: Provenance,
}

/// Everything a consumer can observe, published atomically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocationState {
    pub current: Option<LocationSnapshot>,
    pub loading: bool,
    pub last_error: Option<LocationError>,
    pub permission: PermissionState,
}

/// Result of [`LocationStore::restore_from_storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    Missing,
    /// A snapshot existed but was past the staleness ceiling and was purged.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreConfig {
    pub acquire: AcquireOptions,
    pub watch_min_interval: Duration,
    pub auto_refresh: bool,
    /// Snapshots older than this are neither restored nor recorded.
    pub max_age_ms: i64,
    /// Fixes less accurate than this are accepted but logged.
    pub accuracy_threshold_m: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            acquire: AcquireOptions::default(),
            watch_min_interval: Duration::from_millis(45_000),
            auto_refresh: true,
            max_age_ms: DEFAULT_MAX_AGE_MS,
            accuracy_threshold_m: DEFAULT_ACCURACY_THRESHOLD_M,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn from_app_config(config: &shopgeo_core::AppConfig) -> Self {
        Self {
            acquire: AcquireOptions {
                max_retries: config.geo_max_retries,
                base_delay: Duration::from_millis(config.geo_retry_base_delay_ms),
                attempt_timeout: Duration::from_millis(config.geo_attempt_timeout_ms),
            },
            watch_min_interval: Duration::from_millis(config.watch_min_interval_ms),
            auto_refresh: config.auto_refresh,
            ..Self::default()
        }
    }
}

struct ReportTarget {
    reporter: Arc<dyn LocationReporter>,
    session_id: Option<String>,
}

/// Bookkeeping for in-flight acquisitions. Both fields change together so
/// a concurrent `clear_location` cannot strand the in-flight count.
#[derive(Debug, Default)]
struct RequestBook {
    /// Bumped by `clear_location`; results from older requests are dropped.
    generation: u64,
    in_flight: usize,
}

struct Inner {
    acquirer: PositionAcquirer,
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    report_target: Option<ReportTarget>,
    auth_token: Mutex<Option<String>>,
    state: watch::Sender<LocationState>,
    auto_refresh: AtomicBool,
    /// Sequence number of the newest `request_permission` call.
    latest_permission_request: AtomicU64,
    requests: Mutex<RequestBook>,
    subscription: Mutex<Option<WatchSubscription>>,
}

/// Builder for [`LocationStore`].
pub struct LocationStoreBuilder {
    acquirer: PositionAcquirer,
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    report_target: Option<ReportTarget>,
    auth_token: Option<String>,
}

impl LocationStoreBuilder {
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enables background reporting of recorded locations.
    #[must_use]
    pub fn reporter(
        mut self,
        reporter: Arc<dyn LocationReporter>,
        session_id: Option<String>,
    ) -> Self {
        self.report_target = Some(ReportTarget {
            reporter,
            session_id,
        });
        self
    }

    #[must_use]
    pub fn auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    #[must_use]
    pub fn build(self) -> LocationStore {
        let (state, _) = watch::channel(LocationState::default());
        LocationStore {
            inner: Arc::new(Inner {
                acquirer: self.acquirer,
                storage: self.storage,
                clock: self.clock,
                auto_refresh: AtomicBool::new(self.config.auto_refresh),
                config: self.config,
                report_target: self.report_target,
                auth_token: Mutex::new(self.auth_token),
                state,
                latest_permission_request: AtomicU64::new(0),
                requests: Mutex::new(RequestBook::default()),
                subscription: Mutex::new(None),
            }),
        }
    }
}

/// Shared handle to the current location. Cloning is cheap; all clones see
/// the same state.
#[derive(Clone)]
pub struct LocationStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationStore")
            .field("state", &*self.inner.state.borrow())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// How a finished acquisition should affect permission state.
#[derive(Debug, Clone, Copy)]
enum RequestKind {
    Permission { seq: u64 },
    Refresh,
}

impl LocationStore {
    #[must_use]
    pub fn builder(
        acquirer: PositionAcquirer,
        storage: Arc<dyn KeyValueStore>,
    ) -> LocationStoreBuilder {
        LocationStoreBuilder {
            acquirer,
            storage,
            clock: Arc::new(SystemClock),
            config: StoreConfig::default(),
            report_target: None,
            auth_token: None,
        }
    }

    // ---------------------------------------------------------------------
    // Read side
    // ---------------------------------------------------------------------

    /// A copy of the full current state.
    #[must_use]
    pub fn snapshot(&self) -> LocationState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LocationState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> Option<LocationSnapshot> {
        self.inner.state.borrow().current
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    #[must_use]
    pub fn last_error(&self) -> Option<LocationError> {
        self.inner.state.borrow().last_error
    }

    #[must_use]
    pub fn permission(&self) -> PermissionState {
        self.inner.state.borrow().permission
    }

    /// Whether permission has ever been requested on this device, even if
    /// the request failed. Lets prompts avoid re-asking after a reload.
    #[must_use]
    pub fn permission_previously_requested(&self) -> bool {
        read_json::<bool>(&*self.inner.storage, PERMISSION_REQUESTED_KEY).unwrap_or(false)
    }

    #[must_use]
    pub fn auto_refresh_enabled(&self) -> bool {
        self.inner.auto_refresh.load(Ordering::SeqCst)
    }

    /// Whether a continuous-refresh watch is currently open.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.lock_subscription()
            .as_ref()
            .is_some_and(WatchSubscription::is_active)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Adopts a persisted snapshot if one exists and is fresh.
    ///
    /// A fresh snapshot becomes `current` with `permission = Granted`
    /// without touching the platform. A stale one is purged from storage.
    pub fn restore_from_storage(&self) -> RestoreOutcome {
        let Some(coordinate) = read_json::<Coordinate>(&*self.inner.storage, SNAPSHOT_KEY) else {
            return RestoreOutcome::Missing;
        };

        let now = self.inner.clock.now_ms();
        if coordinate.validate().is_err()
            || geo::is_stale(coordinate.captured_at_epoch_ms, now, self.inner.config.max_age_ms)
        {
            tracing::info!(
                captured_at_ms = coordinate.captured_at_epoch_ms,
                "persisted location is stale or invalid; purging"
            );
            remove_quietly(&*self.inner.storage, SNAPSHOT_KEY);
            return RestoreOutcome::Stale;
        }

        self.inner.state.send_modify(|s| {
            s.current = Some(LocationSnapshot {
                coordinate,
                provenance: Provenance::Restored,
            });
            s.permission = PermissionState::Granted;
        });
        tracing::debug!(
            lat = coordinate.latitude,
            lon = coordinate.longitude,
            "restored persisted location"
        );
        self.sync_watch();
        RestoreOutcome::Restored
    }

    /// Restores from storage, then fetches a fresh fix if the stored one had
    /// gone stale and the user had already been asked for permission.
    ///
    /// The refresh counts as a permission request, so a successful fix
    /// restores `Granted` and reopens continuous refresh. The "already asked"
    /// flag is left as it is.
    pub async fn start(&self) -> RestoreOutcome {
        let outcome = self.restore_from_storage();
        if outcome == RestoreOutcome::Stale && self.permission_previously_requested() {
            tracing::info!("refreshing stale persisted location");
            let seq = self.next_permission_seq();
            self.acquire(RequestKind::Permission { seq }).await;
            if self.current().is_none() && self.last_error().is_none() {
                self.inner
                    .state
                    .send_modify(|s| s.last_error = Some(LocationError::StaleLocation));
            }
        }
        outcome
    }

    /// Enables or disables continuous refresh while permission is granted.
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.inner.auto_refresh.store(enabled, Ordering::SeqCst);
        self.sync_watch();
    }

    /// Provides or removes the credential used for background reporting.
    pub fn set_auth_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.inner.auth_token.lock() {
            *slot = token;
        }
    }

    /// Closes any open watch. The store remains usable.
    pub fn shutdown(&self) {
        self.lock_subscription().take();
    }

    // ---------------------------------------------------------------------
    // Write side
    // ---------------------------------------------------------------------

    /// Asks the platform for a fix, moving permission through the state
    /// machine. Returns `true` if a valid location was recorded.
    pub async fn request_permission(&self) -> bool {
        let seq = self.next_permission_seq();
        write_json(&*self.inner.storage, PERMISSION_REQUESTED_KEY, &true);
        self.acquire(RequestKind::Permission { seq }).await
    }

    /// Manual refresh for an already-permitted user. Leaves permission
    /// state unchanged.
    pub async fn update_location(&self) {
        self.acquire(RequestKind::Refresh).await;
    }

    /// Validates and adopts a coordinate.
    ///
    /// Out-of-range values set `last_error = InvalidCoordinates` and
    /// fixes older than the staleness ceiling set `StaleLocation`; neither
    /// is persisted. Accepted fixes overwrite the persisted snapshot and
    /// are reported to the backend in the background when a token is set.
    ///
    /// # Errors
    ///
    /// Returns the [`LocationError`] that was also written to `last_error`.
    pub fn record_location(&self, coordinate: Coordinate) -> Result<(), LocationError> {
        match self.check_fix(&coordinate) {
            Ok(()) => {
                self.persist(&coordinate);
                self.inner.state.send_modify(|s| {
                    s.current = Some(LocationSnapshot {
                        coordinate,
                        provenance: Provenance::Fresh,
                    });
                    s.last_error = None;
                });
                self.report_in_background(coordinate);
                Ok(())
            }
            Err(err) => {
                self.inner.state.send_modify(|s| s.last_error = Some(err));
                Err(err)
            }
        }
    }

    /// Forgets everything: persisted snapshot, the "already asked" flag, and
    /// in-memory state. Requests still in flight are discarded when they
    /// finish.
    pub fn clear_location(&self) {
        {
            let mut book = self.lock_requests();
            book.generation += 1;
            book.in_flight = 0;
        }
        remove_quietly(&*self.inner.storage, SNAPSHOT_KEY);
        remove_quietly(&*self.inner.storage, PERMISSION_REQUESTED_KEY);
        self.inner
            .state
            .send_replace(LocationState::default());
        self.sync_watch();
        tracing::info!("location cleared");
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn next_permission_seq(&self) -> u64 {
        self.inner
            .latest_permission_request
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    fn lock_requests(&self) -> MutexGuard<'_, RequestBook> {
        match self.inner.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn acquire(&self, kind: RequestKind) -> bool {
        let generation = {
            let mut book = self.lock_requests();
            book.in_flight += 1;
            book.generation
        };
        self.inner.state.send_modify(|s| {
            s.loading = true;
            if matches!(kind, RequestKind::Permission { .. }) {
                s.permission = PermissionState::Pending;
            }
        });

        let result = self
            .inner
            .acquirer
            .acquire_once(self.inner.config.acquire)
            .await
            .and_then(|coordinate| self.check_fix(&coordinate).map(|()| coordinate));

        let remaining = {
            let mut book = self.lock_requests();
            if book.generation != generation {
                drop(book);
                tracing::debug!("location cleared while request was in flight; discarding result");
                return false;
            }
            book.in_flight = book.in_flight.saturating_sub(1);
            book.in_flight
        };

        let superseded = match kind {
            RequestKind::Permission { seq } => {
                seq != self.inner.latest_permission_request.load(Ordering::SeqCst)
            }
            RequestKind::Refresh => false,
        };

        let recorded = match result {
            Ok(coordinate) => {
                self.persist(&coordinate);
                self.inner.state.send_modify(|s| {
                    s.current = Some(LocationSnapshot {
                        coordinate,
                        provenance: Provenance::Fresh,
                    });
                    s.last_error = None;
                    s.loading = remaining > 0;
                    if let RequestKind::Permission { .. } = kind {
                        // A superseded success may only complete a pending
                        // request; it never overrides a newer verdict.
                        if !superseded || s.permission == PermissionState::Pending {
                            s.permission = PermissionState::Granted;
                        }
                    }
                });
                self.report_in_background(coordinate);
                true
            }
            Err(err) => {
                tracing::info!(error = ?err, superseded, "location request failed");
                self.inner.state.send_modify(|s| {
                    s.loading = remaining > 0;
                    if !superseded {
                        s.last_error = Some(err);
                        if err == LocationError::PermissionDenied
                            && matches!(kind, RequestKind::Permission { .. })
                        {
                            s.permission = PermissionState::Denied;
                        }
                    }
                });
                false
            }
        };

        self.sync_watch();
        recorded
    }

    fn check_fix(&self, coordinate: &Coordinate) -> Result<(), LocationError> {
        if let Err(reason) = coordinate.validate() {
            tracing::warn!(
                lat = coordinate.latitude,
                lon = coordinate.longitude,
                %reason,
                "rejecting invalid coordinate"
            );
            return Err(LocationError::InvalidCoordinates);
        }
        let now = self.inner.clock.now_ms();
        if geo::is_stale(
            coordinate.captured_at_epoch_ms,
            now,
            self.inner.config.max_age_ms,
        ) {
            tracing::warn!(
                captured_at_ms = coordinate.captured_at_epoch_ms,
                now_ms = now,
                "rejecting stale coordinate"
            );
            return Err(LocationError::StaleLocation);
        }
        if !geo::is_accurate(
            coordinate.accuracy_meters,
            self.inner.config.accuracy_threshold_m,
        ) {
            tracing::warn!(
                accuracy_m = coordinate.accuracy_meters,
                threshold_m = self.inner.config.accuracy_threshold_m,
                "accepting low-accuracy coordinate"
            );
        }
        Ok(())
    }

    fn persist(&self, coordinate: &Coordinate) {
        write_json(&*self.inner.storage, SNAPSHOT_KEY, coordinate);
    }

    fn report_in_background(&self, coordinate: Coordinate) {
        let Some(target) = &self.inner.report_target else {
            return;
        };
        let Some(token) = self.inner.auth_token.lock().ok().and_then(|t| t.clone()) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime; skipping location report");
            return;
        };

        let reporter = Arc::clone(&target.reporter);
        let report = LocationReport {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            accuracy_meters: coordinate.accuracy_meters,
            session_id: target.session_id.clone(),
        };
        // Detached: the caller never waits on or sees the outcome.
        runtime.spawn(async move {
            match reporter.report(&token, &report).await {
                Ok(stored) => tracing::debug!(id = ?stored.id, "location reported"),
                Err(e) => tracing::warn!(error = %e, "location report failed"),
            }
        });
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<WatchSubscription>> {
        match self.inner.subscription.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Opens or closes the refresh watch so that exactly one is open while
    /// auto-refresh is on and permission is granted, and none otherwise.
    fn sync_watch(&self) {
        let wanted = self.auto_refresh_enabled() && self.permission() == PermissionState::Granted;
        let mut slot = self.lock_subscription();

        if !wanted {
            if slot.take().is_some() {
                tracing::debug!("closing location refresh watch");
            }
            return;
        }
        if slot.as_ref().is_some_and(WatchSubscription::is_active) {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("no async runtime; continuous location refresh not started");
            return;
        }

        let on_update = {
            let weak = Arc::downgrade(&self.inner);
            move |coordinate: Coordinate| {
                if let Some(store) = upgrade(&weak) {
                    // Rejections are already surfaced through last_error.
                    let _ = store.record_location(coordinate);
                }
            }
        };
        let on_error = {
            let weak = Arc::downgrade(&self.inner);
            move |err: LocationError| {
                if let Some(store) = upgrade(&weak) {
                    store.handle_watch_error(err);
                }
            }
        };

        match self.inner.acquirer.watch(
            self.inner.config.watch_min_interval,
            on_update,
            on_error,
        ) {
            Ok(subscription) => *slot = Some(subscription),
            Err(err) => {
                tracing::warn!(error = ?err, "could not open location refresh watch");
            }
        }
    }

    fn handle_watch_error(&self, err: LocationError) {
        self.inner.state.send_modify(|s| {
            s.last_error = Some(err);
            if err == LocationError::PermissionDenied {
                s.permission = PermissionState::Denied;
            }
        });
        if err == LocationError::PermissionDenied {
            tracing::warn!("permission revoked during refresh watch");
            self.sync_watch();
        }
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<LocationStore> {
    weak.upgrade().map(|inner| LocationStore { inner })
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
