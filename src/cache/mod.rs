//! Versioned, partitioned response cache.
//!
//! This module provides the storage side of the agent:
//! - Named partitions holding request → response snapshots
//! - Atomic batch population (all assets or none)
//! - Cross-partition lookup where the most recent write wins
//! - Partition enumeration and deletion for version migration

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::SqliteStorage;
pub use traits::CacheStorage;
