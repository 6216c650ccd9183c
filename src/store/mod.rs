//! Backplane store
//!
//! The backplane keeps its queues and indexes in a Redis-compatible store that
//! may be a single node or a cluster. [`StoreBackend`] is the read surface the
//! rest of the crate depends on; [`UnifiedStore`] serves it over either
//! topology through one interface.

pub mod memory;
pub mod unified;

pub use memory::MemoryStore;
pub use unified::{parse_cluster_shards, StoreMode, UnifiedStore};

use crate::error::StoreError;
use crate::types::SlotRange;
use async_trait::async_trait;

/// Slot ranges owned by one shard of a clustered store.
pub type ShardSlots = Vec<SlotRange>;

/// Read operations against the backplane store.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Length of the list at `key`; zero if absent.
    async fn llen(&self, key: &str) -> Result<i64, StoreError>;

    /// Cardinality of the sorted set at `key`; zero if absent.
    async fn zcard(&self, key: &str) -> Result<i64, StoreError>;

    /// Number of fields in the hash at `key`; zero if absent.
    async fn hlen(&self, key: &str) -> Result<i64, StoreError>;

    /// List elements in the inclusive index range `[start, stop]`.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// Sorted set members in the inclusive rank range `[start, stop]`.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// One page of an incremental hash scan.
    ///
    /// Returns the flattened `[field, value, field, value, ...]` page and the
    /// cursor for the next call; a returned cursor of zero ends the scan.
    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> Result<(Vec<String>, u64), StoreError>;

    /// Slot ownership per shard. Fails on a store that is not clustered.
    async fn cluster_shards(&self) -> Result<Vec<ShardSlots>, StoreError>;
}
