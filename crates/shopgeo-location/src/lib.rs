pub mod acquire;
pub mod platform;
pub mod rate_limit;
pub mod report;
pub mod store;
pub mod watch;

pub use acquire::{classify, AcquireOptions, PositionAcquirer};
pub use platform::{
    FixedPlatform, GeolocationPlatform, PlatformError, PositionOptions, PositionStream,
    RawPosition, ScriptedPlatform, ScriptedResponse,
};
pub use rate_limit::{BatchedPoint, Batcher, RateLimiter};
pub use report::{LocationApiClient, LocationReport, LocationReporter, ReportError, StoredLocation};
pub use store::{
    LocationSnapshot, LocationState, LocationStore, LocationStoreBuilder, PermissionState,
    Provenance, RestoreOutcome, StoreConfig,
};
pub use watch::WatchSubscription;
