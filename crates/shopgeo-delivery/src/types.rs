//! Wire and storage types for deliverability checks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Body of a deliverability check request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliverabilityRequest {
    pub product_id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Whether a product can be delivered to a location, as decided by the
/// backend. The same shape is used on the wire and in the durable cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverabilityVerdict {
    #[serde(rename = "is_deliverable")]
    pub deliverable: bool,
    #[serde(default)]
    pub reason: Option<String>,
    /// Backends may send fractional days (e.g. `2.5`).
    #[serde(default)]
    pub estimated_days: Option<f64>,
    /// Decimal string on the wire (e.g. `"4.99"`).
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub zone: Option<String>,
}

impl DeliverabilityVerdict {
    #[must_use]
    pub fn deliverable() -> Self {
        Self {
            deliverable: true,
            reason: None,
            estimated_days: None,
            shipping_cost: None,
            zone: None,
        }
    }

    #[must_use]
    pub fn undeliverable(reason: impl Into<String>) -> Self {
        Self {
            deliverable: false,
            reason: Some(reason.into()),
            ..Self::deliverable()
        }
    }
}

/// One cached verdict for an (entity, cell) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverabilityEntry {
    pub entity_id: i64,
    pub cell_key: String,
    pub verdict: DeliverabilityVerdict,
    pub cached_at_epoch_ms: i64,
}

impl DeliverabilityEntry {
    /// Composite storage key for an entity and cell.
    #[must_use]
    pub fn key_for(entity_id: i64, cell_key: &str) -> String {
        format!("{entity_id}:{cell_key}")
    }

    #[must_use]
    pub fn key(&self) -> String {
        Self::key_for(self.entity_id, &self.cell_key)
    }

    /// Fresh while `now - cached_at <= max_age`.
    #[must_use]
    pub fn is_fresh(&self, now_ms: i64, max_age_ms: i64) -> bool {
        now_ms.saturating_sub(self.cached_at_epoch_ms) <= max_age_ms
    }
}
