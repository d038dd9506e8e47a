//! Offline response cache.
//!
//! This module provides the request-level caching used by the site:
//! - Versioned static and dynamic partitions in a durable store
//! - Cache-first, network-first and stale-while-revalidate strategies
//! - Install seeding and activation cleanup of partition generations

mod layer;
mod lifecycle;
mod manifest;
mod partition;
mod store;
mod strategy;
mod traits;

pub use layer::CacheLayer;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use manifest::StaticManifest;
pub use partition::Generation;
pub use store::ContentCache;
pub use strategy::StrategySelector;
pub use traits::Cacheable;
