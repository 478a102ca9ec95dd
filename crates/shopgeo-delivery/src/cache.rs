//! Read-through TTL cache in front of the deliverability check.
//!
//! Verdicts are keyed by `(entity id, location cell)`, where the cell is the
//! coordinate quantized to four decimal places (roughly 11 m), so nearby
//! fixes share an entry. All entries live in one JSON object under
//! [`CACHE_KEY`] in the durable store. Expired entries are purged lazily when
//! their key is looked up, swept whenever a fresh verdict is written, or
//! removed in bulk via [`DeliverabilityCache::purge_expired`].
//!
//! Concurrent misses for the same key are not coalesced: both reach the
//! backend and the later write wins. Storage still holds one entry per key.

use std::collections::BTreeMap;
use std::sync::Arc;

use shopgeo_core::geo::DEFAULT_MAX_AGE_MS;
use shopgeo_core::storage::{read_json, remove_quietly, write_json};
use shopgeo_core::{Clock, Coordinate, KeyValueStore, SystemClock};

use crate::client::{DeliverabilityBackend, DeliverabilityError};
use crate::types::{DeliverabilityEntry, DeliverabilityRequest, DeliverabilityVerdict};

/// Durable-store key holding the whole cache.
pub const CACHE_KEY: &str = "shopgeo.deliverability.cache";

type Entries = BTreeMap<String, DeliverabilityEntry>;

pub struct DeliverabilityCache {
    storage: Arc<dyn KeyValueStore>,
    backend: Arc<dyn DeliverabilityBackend>,
    clock: Arc<dyn Clock>,
    max_age_ms: i64,
}

impl std::fmt::Debug for DeliverabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverabilityCache")
            .field("max_age_ms", &self.max_age_ms)
            .finish_non_exhaustive()
    }
}

impl DeliverabilityCache {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>, backend: Arc<dyn DeliverabilityBackend>) -> Self {
        Self {
            storage,
            backend,
            clock: Arc::new(SystemClock),
            max_age_ms: DEFAULT_MAX_AGE_MS,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default TTL used by [`check`](Self::check).
    #[must_use]
    pub fn with_max_age(mut self, max_age_ms: i64) -> Self {
        self.max_age_ms = max_age_ms;
        self
    }

    #[must_use]
    pub fn max_age_ms(&self) -> i64 {
        self.max_age_ms
    }

    /// [`check_with_max_age`](Self::check_with_max_age) using the configured TTL.
    ///
    /// # Errors
    ///
    /// See [`check_with_max_age`](Self::check_with_max_age).
    pub async fn check(
        &self,
        entity_id: i64,
        coordinate: &Coordinate,
    ) -> Result<DeliverabilityVerdict, DeliverabilityError> {
        self.check_with_max_age(entity_id, coordinate, self.max_age_ms)
            .await
    }

    /// Returns the cached verdict for this entity and cell if it is no older
    /// than `max_age_ms`; otherwise asks the backend and caches its answer.
    ///
    /// Failures are never cached and an expired entry is never returned in
    /// place of a failure.
    ///
    /// # Errors
    ///
    /// - [`DeliverabilityError::InvalidCoordinates`] if the coordinate is out
    ///   of range (checked locally, no request is made) or the backend rejects it.
    /// - Any other [`DeliverabilityError`] from the backend.
    pub async fn check_with_max_age(
        &self,
        entity_id: i64,
        coordinate: &Coordinate,
        max_age_ms: i64,
    ) -> Result<DeliverabilityVerdict, DeliverabilityError> {
        if coordinate.validate().is_err() {
            return Err(DeliverabilityError::InvalidCoordinates);
        }
        let cell = coordinate.cell();
        let key = DeliverabilityEntry::key_for(entity_id, &cell);
        let now = self.clock.now_ms();

        let mut entries = self.load();
        if let Some(entry) = entries.get(&key) {
            if entry.is_fresh(now, max_age_ms) {
                tracing::debug!(product_id = entity_id, %cell, "deliverability cache hit");
                return Ok(entry.verdict.clone());
            }
            tracing::debug!(
                product_id = entity_id,
                %cell,
                age_ms = now.saturating_sub(entry.cached_at_epoch_ms),
                "deliverability cache entry expired; purging"
            );
            entries.remove(&key);
            self.save(&entries);
        } else {
            tracing::debug!(product_id = entity_id, %cell, "deliverability cache miss");
        }

        let request = DeliverabilityRequest {
            product_id: entity_id,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
        };
        let verdict = match self.backend.check(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(product_id = entity_id, %cell, error = %e, "deliverability check failed");
                return Err(e);
            }
        };

        // Re-read so entries written while the request was in flight survive.
        let mut entries = self.load();
        let written_at = self.clock.now_ms();
        let sweep_age = self.max_age_ms.max(max_age_ms);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(written_at, sweep_age));
        let swept = before - entries.len();
        if swept > 0 {
            tracing::debug!(swept, "swept expired deliverability entries on write");
        }
        entries.insert(
            key,
            DeliverabilityEntry {
                entity_id,
                cell_key: cell,
                verdict: verdict.clone(),
                cached_at_epoch_ms: written_at,
            },
        );
        self.save(&entries);
        Ok(verdict)
    }

    /// The stored entry for this entity and cell, fresh or not.
    #[must_use]
    pub fn entry(&self, entity_id: i64, coordinate: &Coordinate) -> Option<DeliverabilityEntry> {
        let key = DeliverabilityEntry::key_for(entity_id, &coordinate.cell());
        self.load().remove(&key)
    }

    /// Drops the entry for this entity and cell. Returns whether one existed.
    pub fn invalidate(&self, entity_id: i64, coordinate: &Coordinate) -> bool {
        let key = DeliverabilityEntry::key_for(entity_id, &coordinate.cell());
        let mut entries = self.load();
        if entries.remove(&key).is_none() {
            return false;
        }
        self.save(&entries);
        tracing::debug!(product_id = entity_id, cell = %coordinate.cell(), "deliverability entry invalidated");
        true
    }

    /// Drops every cached verdict.
    pub fn clear_all(&self) {
        remove_quietly(&*self.storage, CACHE_KEY);
        tracing::info!("deliverability cache cleared");
    }

    /// Removes every entry older than `max_age_ms` and returns how many went.
    pub fn purge_expired(&self, max_age_ms: i64) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now, max_age_ms));
        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries);
            tracing::info!(removed, remaining = entries.len(), "purged expired deliverability entries");
        }
        removed
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self) -> Entries {
        read_json(&*self.storage, CACHE_KEY).unwrap_or_default()
    }

    fn save(&self, entries: &Entries) {
        if entries.is_empty() {
            remove_quietly(&*self.storage, CACHE_KEY);
        } else {
            write_json(&*self.storage, CACHE_KEY, entries);
        }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
