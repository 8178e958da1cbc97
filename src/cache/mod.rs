//! Two-tier cache for decoded images.
//!
//! The memory tier holds decoded renditions keyed by sized content keys;
//! the disk tier holds original encoded bytes keyed by source keys, in a
//! journal-backed LRU store that survives process restarts. Lifecycle of
//! both tiers is governed by [`CacheService`].

mod disk;
mod memory;
mod service;
mod stats;
mod types;

pub use disk::{DiskStore, Editor, Snapshot};
pub use memory::MemoryStore;
pub use service::{CacheService, LifecycleState};
pub use stats::CacheStats;
pub use types::{CacheConfig, CacheError, DiskConfig, MemoryConfig};
