use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use shopgeo_core::{ManualClock, MemoryStore, StorageError};

use super::*;

const NOW: i64 = 1_700_000_000_000;
const TEN_MINUTES: i64 = 600_000;

/// Backend that counts calls and plays back queued results, defaulting to a
/// deliverable verdict.
#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
    requests: Mutex<Vec<DeliverabilityRequest>>,
    queued: Mutex<VecDeque<Result<DeliverabilityVerdict, DeliverabilityError>>>,
}

impl CountingBackend {
    fn push(&self, result: Result<DeliverabilityVerdict, DeliverabilityError>) {
        self.queued.lock().unwrap().push_back(result);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeliverabilityBackend for CountingBackend {
    fn check<'a>(
        &'a self,
        request: &'a DeliverabilityRequest,
    ) -> BoxFuture<'a, Result<DeliverabilityVerdict, DeliverabilityError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let result = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DeliverabilityVerdict::deliverable()));
        future::ready(result).boxed()
    }
}

struct Harness {
    backend: Arc<CountingBackend>,
    storage: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    cache: DeliverabilityCache,
}

fn harness() -> Harness {
    let backend = Arc::new(CountingBackend::default());
    let storage = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let cache = DeliverabilityCache::new(
        Arc::clone(&storage) as Arc<dyn KeyValueStore>,
        Arc::clone(&backend) as Arc<dyn DeliverabilityBackend>,
    )
    .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
    Harness {
        backend,
        storage,
        clock,
        cache,
    }
}

fn nyc() -> Coordinate {
    Coordinate::new(40.7128, -74.0060, NOW)
}

fn stored_entries(storage: &MemoryStore) -> Entries {
    serde_json::from_str(&storage.get(CACHE_KEY).unwrap().unwrap()).unwrap()
}

#[tokio::test]
async fn second_check_within_ttl_is_a_hit() {
    let h = harness();

    let first = h.cache.check(5, &nyc()).await.unwrap();
    h.clock.advance(TEN_MINUTES - 1);
    let second = h.cache.check(5, &nyc()).await.unwrap();

    assert_eq!(h.backend.calls(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn check_at_exact_ttl_is_still_a_hit() {
    let h = harness();
    h.cache.check(5, &nyc()).await.unwrap();
    h.clock.advance(TEN_MINUTES);
    h.cache.check(5, &nyc()).await.unwrap();
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test]
async fn expired_entry_is_refetched_and_overwritten() {
    let h = harness();
    h.backend.push(Ok(DeliverabilityVerdict::deliverable()));
    h.backend
        .push(Ok(DeliverabilityVerdict::undeliverable("zone closed")));

    h.cache.check(5, &nyc()).await.unwrap();
    h.clock.advance(TEN_MINUTES + 1);
    let verdict = h.cache.check(5, &nyc()).await.unwrap();

    assert_eq!(h.backend.calls(), 2);
    assert!(!verdict.deliverable);

    let entries = stored_entries(&h.storage);
    assert_eq!(entries.len(), 1, "exactly one entry per key");
    let entry = entries.values().next().unwrap();
    assert_eq!(entry.cached_at_epoch_ms, NOW + TEN_MINUTES + 1);
    assert_eq!(entry.verdict.reason.as_deref(), Some("zone closed"));
}

#[tokio::test]
async fn nearby_coordinates_share_a_cell() {
    let h = harness();
    h.cache.check(5, &nyc()).await.unwrap();
    h.cache
        .check(5, &Coordinate::new(40.712_84, -74.006_04, NOW))
        .await
        .unwrap();
    assert_eq!(h.backend.calls(), 1);

    h.cache
        .check(5, &Coordinate::new(40.7138, -74.0060, NOW))
        .await
        .unwrap();
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn entities_are_cached_independently() {
    let h = harness();
    h.cache.check(1, &nyc()).await.unwrap();
    h.cache.check(2, &nyc()).await.unwrap();
    h.cache.check(1, &nyc()).await.unwrap();

    assert_eq!(h.backend.calls(), 2);
    assert_eq!(h.cache.len(), 2);
    let keys: Vec<String> = stored_entries(&h.storage).into_keys().collect();
    assert_eq!(keys, vec!["1:40.7128,-74.0060", "2:40.7128,-74.0060"]);
}

#[tokio::test]
async fn backend_receives_raw_coordinates() {
    let h = harness();
    let point = Coordinate::new(40.712_84, -74.006_04, NOW);
    h.cache.check(9, &point).await.unwrap();

    let requests = h.backend.requests.lock().unwrap();
    assert_eq!(
        requests[0],
        DeliverabilityRequest {
            product_id: 9,
            latitude: 40.712_84,
            longitude: -74.006_04,
        }
    );
}

#[tokio::test]
async fn failures_are_not_cached() {
    let h = harness();
    h.backend.push(Err(DeliverabilityError::UnexpectedStatus {
        status: 503,
        url: "http://backend/".to_owned(),
    }));

    let err = h.cache.check(5, &nyc()).await.unwrap_err();
    assert_eq!(err.kind(), shopgeo_core::LocationError::NetworkError);
    assert!(h.cache.is_empty());

    h.cache.check(5, &nyc()).await.unwrap();
    assert_eq!(h.backend.calls(), 2);
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn expired_entry_is_not_a_fallback_for_failure() {
    let h = harness();
    h.cache.check(5, &nyc()).await.unwrap();
    h.clock.advance(TEN_MINUTES + 1);
    h.backend
        .push(Err(DeliverabilityError::ProductNotFound { product_id: 5 }));

    let err = h.cache.check(5, &nyc()).await.unwrap_err();
    assert!(matches!(err, DeliverabilityError::ProductNotFound { product_id: 5 }));
    assert!(h.cache.entry(5, &nyc()).is_none(), "expired entry was purged");
}

#[tokio::test]
async fn invalid_coordinates_fail_without_request() {
    let h = harness();
    let err = h
        .cache
        .check(5, &Coordinate::new(91.0, 0.0, NOW))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliverabilityError::InvalidCoordinates));
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test]
async fn per_call_max_age_overrides_default() {
    let h = harness();
    h.cache.check(5, &nyc()).await.unwrap();
    h.clock.advance(1_000);

    h.cache.check_with_max_age(5, &nyc(), 60_000).await.unwrap();
    assert_eq!(h.backend.calls(), 1);
    h.cache.check_with_max_age(5, &nyc(), 500).await.unwrap();
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn invalidate_forces_refetch() {
    let h = harness();
    h.cache.check(5, &nyc()).await.unwrap();

    assert!(h.cache.invalidate(5, &nyc()));
    assert!(!h.cache.invalidate(5, &nyc()));
    h.cache.check(5, &nyc()).await.unwrap();
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn clear_all_removes_blob() {
    let h = harness();
    h.cache.check(1, &nyc()).await.unwrap();
    h.cache.check(2, &nyc()).await.unwrap();

    h.cache.clear_all();

    assert_eq!(h.storage.get(CACHE_KEY).unwrap(), None);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn writing_a_verdict_sweeps_expired_entries() {
    let h = harness();
    h.cache.check(1, &nyc()).await.unwrap();
    h.cache.check(2, &nyc()).await.unwrap();
    h.clock.advance(TEN_MINUTES + 1);

    h.cache.check(3, &nyc()).await.unwrap();

    let keys: Vec<String> = stored_entries(&h.storage).into_keys().collect();
    assert_eq!(keys, vec!["3:40.7128,-74.0060"]);
}

#[tokio::test]
async fn sweep_on_write_keeps_entries_within_ttl() {
    let h = harness();
    h.cache.check(1, &nyc()).await.unwrap();
    h.clock.advance(TEN_MINUTES);

    h.cache.check(2, &nyc()).await.unwrap();

    assert_eq!(h.cache.len(), 2);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn purge_expired_sweeps_only_old_entries() {
    let h = harness();
    h.cache.check(1, &nyc()).await.unwrap();
    h.clock.advance(TEN_MINUTES);
    h.cache.check(2, &nyc()).await.unwrap();
    h.clock.advance(1);

    assert_eq!(h.cache.purge_expired(TEN_MINUTES), 1);
    assert_eq!(h.cache.len(), 1);
    assert!(h.cache.entry(2, &nyc()).is_some());
    assert_eq!(h.cache.purge_expired(TEN_MINUTES), 0);
}

#[tokio::test]
async fn corrupt_blob_is_treated_as_empty() {
    let h = harness();
    h.storage.set(CACHE_KEY, "not json").unwrap();

    h.cache.check(5, &nyc()).await.unwrap();

    assert_eq!(h.backend.calls(), 1);
    assert_eq!(stored_entries(&h.storage).len(), 1);
}

struct BrokenStore;

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Poisoned)
    }
    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Poisoned)
    }
    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Poisoned)
    }
}

#[tokio::test]
async fn broken_storage_degrades_to_pass_through() {
    let backend = Arc::new(CountingBackend::default());
    let cache = DeliverabilityCache::new(Arc::new(BrokenStore), Arc::clone(&backend) as _)
        .with_clock(Arc::new(ManualClock::new(NOW)));

    assert!(cache.check(5, &nyc()).await.unwrap().deliverable);
    assert!(cache.check(5, &nyc()).await.unwrap().deliverable);
    assert_eq!(backend.calls(), 2);
    assert_eq!(cache.purge_expired(0), 0);
}
