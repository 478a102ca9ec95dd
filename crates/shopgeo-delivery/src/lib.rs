pub mod cache;
pub mod client;
pub mod types;

pub use cache::{DeliverabilityCache, CACHE_KEY};
pub use client::{DeliverabilityBackend, DeliverabilityClient, DeliverabilityError};
pub use types::{DeliverabilityEntry, DeliverabilityRequest, DeliverabilityVerdict};
