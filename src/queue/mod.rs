//! Sharded queues
//!
//! A logical backplane queue is spread over one physical key per store shard.
//! Each key embeds a hash tag chosen so the key lands in its shard's slot
//! ranges. Keys ending in `_priority` are sorted sets whose members are
//! `<priority>:<entry>`; all other keys are lists.

pub mod entry;
pub mod slot;

pub use entry::{EntryKind, ExecuteEntry, QueueEntry, QueuedOperation};
pub use slot::{key_slot, name_hash, with_hash_tag};

use crate::error::{QueueError, StoreError};
use crate::store::StoreBackend;
use crate::types::{SlotRange, CLUSTER_SLOTS};
use tracing::{debug, trace};

const PRIORITY_SUFFIX: &str = "_priority";

/// One shard's physical key for a logical queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub slot_ranges: Vec<SlotRange>,
    pub queue_key: String,
}

impl ShardDescriptor {
    pub fn is_sorted_set(&self) -> bool {
        self.queue_key.ends_with(PRIORITY_SUFFIX)
    }
}

/// Find the first tagged variant of `name` whose slot falls in `ranges`.
pub fn shard_key(name: &str, ranges: &[SlotRange]) -> Result<String, QueueError> {
    let stem = name_hash(name);
    for n in 0..CLUSTER_SLOTS {
        let key = with_hash_tag(name, &format!("{}:{}", stem, n));
        let slot = key_slot(&key);
        if ranges.iter().any(|range| range.contains(slot)) {
            trace!(queue = name, key = %key, slot, "Resolved shard key");
            return Ok(key);
        }
    }
    Err(QueueError::SlotUnreachable {
        name: name.to_string(),
        ranges: ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
    })
}

/// A logical queue and its per-shard physical keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardedQueue {
    name: String,
    shards: Vec<ShardDescriptor>,
}

impl ShardedQueue {
    /// Resolve keys against the store's topology, or use `name` itself when
    /// the store reports none.
    pub async fn discover(store: &dyn StoreBackend, name: &str) -> Result<Self, QueueError> {
        match store.cluster_shards().await {
            Ok(topology) if !topology.is_empty() => Self::with_topology(name, &topology),
            Ok(_) => Ok(Self::single(name)),
            Err(e) => {
                debug!(queue = name, error = %e, "No shard topology, using a single key");
                Ok(Self::single(name))
            }
        }
    }

    pub fn with_topology(name: &str, topology: &[Vec<SlotRange>]) -> Result<Self, QueueError> {
        let shards = topology
            .iter()
            .map(|ranges| {
                Ok(ShardDescriptor {
                    queue_key: shard_key(name, ranges)?,
                    slot_ranges: ranges.clone(),
                })
            })
            .collect::<Result<Vec<_>, QueueError>>()?;
        Ok(Self {
            name: name.to_string(),
            shards,
        })
    }

    /// Unsharded queue stored under `name`.
    pub fn single(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shards: vec![ShardDescriptor {
                slot_ranges: vec![SlotRange::full()],
                queue_key: name.to_string(),
            }],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shards(&self) -> &[ShardDescriptor] {
        &self.shards
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.shards.iter().map(|shard| shard.queue_key.as_str())
    }

    /// Total entries across all shards.
    pub async fn length(&self, store: &dyn StoreBackend) -> Result<i64, QueueError> {
        let mut total = 0;
        for shard in &self.shards {
            total += if shard.is_sorted_set() {
                store.zcard(&shard.queue_key).await?
            } else {
                store.llen(&shard.queue_key).await?
            };
        }
        Ok(total)
    }

    /// Decode up to `stop - start + 1` entries, walking shards in order.
    ///
    /// Each later shard is read with its `stop` reduced by what earlier shards
    /// already yielded. A decode failure fails the whole call.
    pub async fn slice<T, F>(
        &self,
        store: &dyn StoreBackend,
        start: i64,
        stop: i64,
        decode: F,
    ) -> Result<Vec<T>, QueueError>
    where
        F: Fn(&str) -> Result<T, QueueError>,
    {
        let wanted = usize::try_from(stop - start + 1).unwrap_or(0);
        let mut collected = Vec::new();
        if wanted == 0 {
            return Ok(collected);
        }

        for shard in &self.shards {
            let remaining_stop = stop - collected.len() as i64;
            if remaining_stop < start {
                break;
            }
            for raw in read_range(store, shard, start, remaining_stop).await? {
                collected.push(decode(raw.as_str())?);
            }
            if collected.len() >= wanted {
                collected.truncate(wanted);
                break;
            }
        }
        Ok(collected)
    }
}

async fn read_range(
    store: &dyn StoreBackend,
    shard: &ShardDescriptor,
    start: i64,
    stop: i64,
) -> Result<Vec<String>, StoreError> {
    if shard.is_sorted_set() {
        let members = store.zrange(&shard.queue_key, start, stop).await?;
        Ok(members
            .into_iter()
            .map(|member| match member.split_once(':') {
                Some((_, entry)) => entry.to_string(),
                None => member,
            })
            .collect())
    } else {
        store.lrange(&shard.queue_key, start, stop).await
    }
}

/// Field names from an incremental scan of the hash at `key`.
///
/// Pages until `limit` names are gathered or the cursor returns to zero.
pub async fn scan_hash_fields(
    store: &dyn StoreBackend,
    key: &str,
    limit: usize,
    page_size: usize,
) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    let mut cursor = 0;
    loop {
        let (page, next) = store.hscan(key, cursor, None, page_size).await?;
        names.extend(page.into_iter().step_by(2));
        cursor = next;
        if names.len() >= limit || cursor == 0 {
            break;
        }
    }
    names.truncate(limit);
    Ok(names)
}
