//! In-process store backend
//!
//! Holds lists, sorted sets and hashes in memory with Redis range semantics.
//! Used for offline runs and tests.

use super::{ShardSlots, StoreBackend};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct Contents {
    lists: HashMap<String, Vec<String>>,
    sorted_sets: HashMap<String, Vec<(f64, String)>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    topology: Option<Vec<ShardSlots>>,
}

/// Store backend kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    contents: RwLock<Contents>,
}

impl MemoryStore {
    /// A non-clustered empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store reporting the given cluster topology.
    pub fn clustered(topology: Vec<ShardSlots>) -> Self {
        let store = Self::new();
        store.contents.write().topology = Some(topology);
        store
    }

    /// Append to the tail of a list.
    pub fn rpush(&self, key: &str, values: impl IntoIterator<Item = impl Into<String>>) {
        self.contents
            .write()
            .lists
            .entry(key.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// Add or rescore a sorted-set member.
    pub fn zadd(&self, key: &str, score: f64, member: impl Into<String>) {
        let member = member.into();
        let mut contents = self.contents.write();
        let set = contents.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(_, existing)| *existing != member);
        let position = set
            .iter()
            .position(|(s, m)| (*s, m.as_str()) > (score, member.as_str()))
            .unwrap_or(set.len());
        set.insert(position, (score, member));
    }

    pub fn hset(&self, key: &str, field: impl Into<String>, value: impl Into<String>) {
        self.contents
            .write()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.into(), value.into());
    }
}

/// Resolve Redis-style inclusive, possibly negative, bounds against `len`.
fn window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn slice<T: Clone>(items: &[T], start: i64, stop: i64) -> Vec<T> {
    match window(items.len(), start, stop) {
        Some((from, to)) => items[from..=to].to_vec(),
        None => Vec::new(),
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn llen(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.contents.read().lists.get(key).map_or(0, |l| l.len() as i64))
    }

    async fn zcard(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self
            .contents
            .read()
            .sorted_sets
            .get(key)
            .map_or(0, |s| s.len() as i64))
    }

    async fn hlen(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.contents.read().hashes.get(key).map_or(0, |h| h.len() as i64))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .contents
            .read()
            .lists
            .get(key)
            .map(|list| slice(list, start, stop))
            .unwrap_or_default())
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .contents
            .read()
            .sorted_sets
            .get(key)
            .map(|set| {
                slice(set, start, stop)
                    .into_iter()
                    .map(|(_, member)| member)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> Result<(Vec<String>, u64), StoreError> {
        let contents = self.contents.read();
        let Some(hash) = contents.hashes.get(key) else {
            return Ok((Vec::new(), 0));
        };
        let prefix = pattern.map(|p| p.trim_end_matches('*'));
        let count = count.max(1);
        let from = cursor as usize;
        let mut page = Vec::new();
        for (field, value) in hash.iter().skip(from).take(count) {
            if prefix.map_or(true, |p| field.starts_with(p)) {
                page.push(field.clone());
                page.push(value.clone());
            }
        }
        let next = from + count;
        let next = if next >= hash.len() { 0 } else { next as u64 };
        Ok((page, next))
    }

    async fn cluster_shards(&self) -> Result<Vec<ShardSlots>, StoreError> {
        self.contents
            .read()
            .topology
            .clone()
            .ok_or_else(|| StoreError::Topology("store is not clustered".to_string()))
    }
}
