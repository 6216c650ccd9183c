//! Shared operation state
//!
//! The summary cache, the per-name request metadata and the tool-invocation
//! index live in one struct behind one mutex, so every operation is recorded
//! or evicted across all three at once.

use super::cache::LruCache;
use super::OperationSummary;
use crate::proto::remote_execution::RequestMetadata;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Handle shared by the poller and readers.
pub type SharedOperationIndex = Arc<Mutex<OperationIndex>>;

/// Decoded operations plus lookups derived from them.
///
/// Every name in the metadata and invocation indexes is also in the cache.
#[derive(Debug)]
pub struct OperationIndex {
    cache: LruCache<String, OperationSummary>,
    metadata: HashMap<String, RequestMetadata>,
    invocations: HashMap<String, Vec<String>>,
}

impl OperationIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(capacity),
            metadata: HashMap::new(),
            invocations: HashMap::new(),
        }
    }

    pub fn shared(capacity: usize) -> SharedOperationIndex {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cache.contains(&name.to_string())
    }

    /// Cached summary, marking it recently used.
    pub fn get(&mut self, name: &str) -> Option<&OperationSummary> {
        self.cache.get(&name.to_string())
    }

    /// Cached summary without touching recency.
    pub fn peek(&self, name: &str) -> Option<&OperationSummary> {
        self.cache.peek(&name.to_string())
    }

    pub fn metadata(&self, name: &str) -> Option<&RequestMetadata> {
        self.metadata.get(name)
    }

    /// Cached operations issued by one tool invocation, oldest first.
    pub fn invocation(&self, tool_invocation_id: &str) -> &[String] {
        self.invocations
            .get(tool_invocation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Record a decoded operation and the request metadata seen for it.
    pub fn record(&mut self, summary: OperationSummary, metadata: Option<RequestMetadata>) {
        let name = summary.name.clone();
        if let Some(previous) = self.metadata.remove(&name) {
            self.unlink_invocation(&name, &previous.tool_invocation_id);
        }

        if let Some((evicted, _)) = self.cache.insert(name.clone(), summary) {
            trace!(operation = %evicted, "Evicted from operation cache");
            if let Some(previous) = self.metadata.remove(&evicted) {
                self.unlink_invocation(&evicted, &previous.tool_invocation_id);
            }
        }

        if let Some(metadata) = metadata {
            if !metadata.tool_invocation_id.is_empty() {
                self.invocations
                    .entry(metadata.tool_invocation_id.clone())
                    .or_default()
                    .push(name.clone());
            }
            self.metadata.insert(name, metadata);
        }
    }

    fn unlink_invocation(&mut self, name: &str, tool_invocation_id: &str) {
        if let Some(names) = self.invocations.get_mut(tool_invocation_id) {
            names.retain(|n| n != name);
            if names.is_empty() {
                self.invocations.remove(tool_invocation_id);
            }
        }
    }
}
