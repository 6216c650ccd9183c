//! Operation polling
//!
//! [`OperationPoller`] keeps one listing current. Each call to
//! [`OperationPoller::poll`] either skips (the listing has been quiet and is
//! backing off) or lists every page, decodes what changed into the shared
//! [`OperationIndex`](crate::operation::OperationIndex), and compares the
//! listed names with the previous cycle to adjust the backoff.
//!
//! Listings come from the operations registry, from sharded queues in the
//! backplane store, or from the dispatched-operations hash. The latter two
//! only yield names; uncached names are fetched individually in a bounded
//! fan-out.

use crate::concurrency::TaskGroup;
use crate::config::PollerConfig;
use crate::error::{PollError, RpcError};
use crate::operation::{
    decode_metadata, OperationIndex, OperationSummary, SharedOperationIndex,
};
use crate::proto::longrunning::{ListOperationsRequest, ListOperationsResponse, Operation};
use crate::proto::remote_execution::RequestMetadata;
use crate::queue::{scan_hash_fields, EntryKind, QueuedOperation, ShardedQueue};
use crate::rpc::Operations;
use crate::store::StoreBackend;
use crate::types::PageToken;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a listing's names come from.
#[derive(Debug, Clone)]
pub enum ListingSource {
    /// `ListOperations` against `<instance>/<resource>` with a filter.
    Registry { resource: String, filter: String },
    /// The head of each queue, in order, decoded with `kind`.
    Queues {
        queues: Vec<ShardedQueue>,
        kind: EntryKind,
    },
    /// Field names of the dispatched-operations hash.
    Dispatched { key: String },
}

impl ListingSource {
    pub fn registry(resource: impl Into<String>, filter: impl Into<String>) -> Self {
        ListingSource::Registry {
            resource: resource.into(),
            filter: filter.into(),
        }
    }

    /// Key under which this listing's cursor is kept.
    pub fn filter(&self) -> String {
        match self {
            ListingSource::Registry { resource, filter } => format!("{}?{}", resource, filter),
            ListingSource::Queues { queues, kind } => {
                let names: Vec<&str> = queues.iter().map(ShardedQueue::name).collect();
                format!("{}:{}", kind.label(), names.join(","))
            }
            ListingSource::Dispatched { key } => format!("dispatched:{}", key),
        }
    }
}

/// Listing progress within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingState {
    #[default]
    Idle,
    Fetching,
    Retry {
        attempt: u32,
    },
    Settled,
}

#[derive(Debug, Clone)]
enum Listed {
    Full(Operation),
    Named(QueuedOperation),
}

impl Listed {
    fn name(&self) -> &str {
        match self {
            Listed::Full(operation) => &operation.name,
            Listed::Named(queued) => &queued.name,
        }
    }
}

/// Resumable position and backoff state of one listing.
///
/// A cycle that fails part way keeps its page token and the operations
/// gathered so far, so the next poll resumes from the failed page.
#[derive(Debug, Clone)]
pub struct PollCursor {
    filter: String,
    page_token: PageToken,
    stall_counter: u32,
    stall_ceiling: u32,
    previous_membership: Option<HashSet<String>>,
    partial: Vec<Listed>,
    state: ListingState,
}

impl PollCursor {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            page_token: PageToken::Initial,
            stall_counter: 0,
            stall_ceiling: 1,
            previous_membership: None,
            partial: Vec::new(),
            state: ListingState::Idle,
        }
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn page_token(&self) -> &PageToken {
        &self.page_token
    }

    pub fn stall_counter(&self) -> u32 {
        self.stall_counter
    }

    pub fn stall_ceiling(&self) -> u32 {
        self.stall_ceiling
    }

    pub fn state(&self) -> ListingState {
        self.state
    }

    /// Consume one tick of backoff. Returns true if this tick is skipped.
    pub fn should_skip(&mut self) -> bool {
        if self.stall_counter > 0 {
            self.stall_counter -= 1;
            true
        } else {
            false
        }
    }

    /// Close a cycle with its full membership and adjust the backoff.
    ///
    /// Returns whether membership differed from the previous cycle. The first
    /// cycle always counts as a change.
    pub fn settle(&mut self, membership: HashSet<String>, ceiling_cap: u32) -> bool {
        let changed = self.previous_membership.as_ref() != Some(&membership);
        if changed {
            self.stall_counter = 0;
            self.stall_ceiling = 1;
        } else {
            self.stall_counter = self.stall_ceiling;
            self.stall_ceiling = self.stall_ceiling.saturating_mul(2).min(ceiling_cap.max(1));
        }
        self.previous_membership = Some(membership);
        self.page_token = PageToken::Initial;
        self.partial.clear();
        self.state = ListingState::Settled;
        changed
    }
}

/// Result of one [`OperationPoller::poll`] call.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Backing off; `remaining` more ticks will be skipped after this one.
    Skipped { remaining: u32 },
    Polled(PollReport),
}

/// What one completed cycle observed.
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    /// Listed names in listing order.
    pub names: Vec<String>,
    /// Summary per listed name that could be resolved, in listing order.
    pub summaries: Vec<OperationSummary>,
    /// Operations newly decoded into the index this cycle.
    pub decoded: usize,
    /// Names whose individual fetch failed.
    pub failed: Vec<String>,
    pub membership_changed: bool,
    pub stall_counter: u32,
    pub stall_ceiling: u32,
}

/// Keeps one operation listing current against the backplane.
pub struct OperationPoller {
    operations: Arc<dyn Operations>,
    store: Arc<dyn StoreBackend>,
    instance_name: String,
    source: ListingSource,
    cursor: PollCursor,
    index: SharedOperationIndex,
    fetches: TaskGroup,
    settings: PollerConfig,
}

impl OperationPoller {
    pub fn new(
        operations: Arc<dyn Operations>,
        store: Arc<dyn StoreBackend>,
        instance_name: impl Into<String>,
        source: ListingSource,
        settings: PollerConfig,
    ) -> Self {
        let index = OperationIndex::shared(settings.cache_capacity);
        Self::with_index(operations, store, instance_name, source, settings, index)
    }

    /// Poller recording into an existing index.
    pub fn with_index(
        operations: Arc<dyn Operations>,
        store: Arc<dyn StoreBackend>,
        instance_name: impl Into<String>,
        source: ListingSource,
        settings: PollerConfig,
        index: SharedOperationIndex,
    ) -> Self {
        Self {
            operations,
            store,
            instance_name: instance_name.into(),
            cursor: PollCursor::new(source.filter()),
            source,
            index,
            fetches: TaskGroup::new(settings.fetch_concurrency),
            settings,
        }
    }

    pub fn index(&self) -> SharedOperationIndex {
        Arc::clone(&self.index)
    }

    pub fn cursor(&self) -> &PollCursor {
        &self.cursor
    }

    pub fn source(&self) -> &ListingSource {
        &self.source
    }

    /// Replace the listing. A different listing starts from a fresh cursor.
    pub fn set_source(&mut self, source: ListingSource) {
        let filter = source.filter();
        if filter != self.cursor.filter {
            debug!(from = %self.cursor.filter, to = %filter, "Listing changed, discarding cursor");
            self.cursor = PollCursor::new(filter);
        }
        self.source = source;
    }

    /// Change the registry filter, keeping the resource.
    pub fn set_filter(&mut self, filter: impl Into<String>) {
        let filter = filter.into();
        let source = match &self.source {
            ListingSource::Registry { resource, .. } => ListingSource::Registry {
                resource: resource.clone(),
                filter,
            },
            other => other.clone(),
        };
        self.set_source(source);
    }

    /// Run one tick of the listing.
    ///
    /// Transient listing failures are retried without delay up to the
    /// configured attempt count; exhausting them is an error.
    pub async fn poll(&mut self) -> Result<PollOutcome, PollError> {
        if self.cursor.should_skip() {
            debug!(
                filter = %self.cursor.filter,
                remaining = self.cursor.stall_counter,
                "Listing unchanged, skipping poll"
            );
            return Ok(PollOutcome::Skipped {
                remaining: self.cursor.stall_counter,
            });
        }

        self.cursor.state = ListingState::Fetching;
        let result = match self.source.clone() {
            ListingSource::Registry { resource, filter } => {
                self.list_registry(&resource, &filter).await
            }
            ListingSource::Queues { queues, kind } => self.list_queues(&queues, kind).await,
            ListingSource::Dispatched { key } => self.list_dispatched(&key).await,
        };
        if let Err(e) = result {
            self.cursor.state = ListingState::Idle;
            return Err(e);
        }

        let listed = std::mem::take(&mut self.cursor.partial);
        let names: Vec<String> = listed.iter().map(|l| l.name().to_string()).collect();
        let (decoded, failed, uncached) = self.reconcile(listed).await;

        let membership: HashSet<String> = names.iter().cloned().collect();
        let membership_changed = self
            .cursor
            .settle(membership, self.settings.stall_ceiling_max);
        if membership_changed {
            info!(filter = %self.cursor.filter, operations = names.len(), "Listing membership changed");
        } else {
            debug!(
                filter = %self.cursor.filter,
                stall = self.cursor.stall_counter,
                ceiling = self.cursor.stall_ceiling,
                "Listing unchanged, backing off"
            );
        }

        let summaries = {
            let index = self.index.lock();
            names
                .iter()
                .filter_map(|name| {
                    index
                        .peek(name)
                        .cloned()
                        .or_else(|| uncached.get(name).cloned())
                })
                .collect()
        };

        Ok(PollOutcome::Polled(PollReport {
            names,
            summaries,
            decoded,
            failed,
            membership_changed,
            stall_counter: self.cursor.stall_counter,
            stall_ceiling: self.cursor.stall_ceiling,
        }))
    }

    async fn list_registry(&mut self, resource: &str, filter: &str) -> Result<(), PollError> {
        let scope = format!("{}/{}", self.instance_name, resource);
        loop {
            let request = ListOperationsRequest {
                name: scope.clone(),
                filter: filter.to_string(),
                page_size: self.settings.page_size,
                page_token: self.cursor.page_token.as_wire().to_string(),
            };
            let response = self.list_page(request).await?;
            debug!(
                scope = %scope,
                operations = response.operations.len(),
                last = response.next_page_token.is_empty(),
                "Listed operations page"
            );
            self.cursor
                .partial
                .extend(response.operations.into_iter().map(Listed::Full));
            match PageToken::from_response(response.next_page_token) {
                Some(next) => self.cursor.page_token = next,
                None => return Ok(()),
            }
        }
    }

    async fn list_page(
        &mut self,
        request: ListOperationsRequest,
    ) -> Result<ListOperationsResponse, PollError> {
        let attempts = self.settings.retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let status = match self.operations.list_operations(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(status) => status,
            };
            let error = RpcError::new("ListOperations", status);
            if !error.is_transient() {
                return Err(error.into());
            }
            if attempt >= attempts {
                warn!(scope = %request.name, attempts = attempt, "Operations registry stayed unavailable");
                return Err(PollError::RetriesExhausted {
                    attempts: attempt,
                    last: error,
                });
            }
            warn!(scope = %request.name, attempt, error = %error, "Retrying operations listing");
            self.cursor.state = ListingState::Retry { attempt };
        }
    }

    async fn list_queues(&mut self, queues: &[ShardedQueue], kind: EntryKind) -> Result<(), PollError> {
        let limit = self.settings.queue_slice_limit;
        let mut listed = Vec::new();
        for queue in queues {
            let entries = queue
                .slice(self.store.as_ref(), 0, limit - 1, |raw| kind.decode(raw))
                .await?;
            debug!(queue = queue.name(), entries = entries.len(), "Read queue head");
            listed.extend(entries.into_iter().map(Listed::Named));
            if listed.len() as i64 >= limit {
                break;
            }
        }
        self.cursor.partial = listed;
        Ok(())
    }

    async fn list_dispatched(&mut self, key: &str) -> Result<(), PollError> {
        let limit = usize::try_from(self.settings.queue_slice_limit).unwrap_or(0);
        let page_size = usize::try_from(self.settings.page_size).unwrap_or(1).max(1);
        let names = scan_hash_fields(self.store.as_ref(), key, limit, page_size).await?;
        debug!(key, operations = names.len(), "Scanned dispatched operations");
        self.cursor.partial = names
            .into_iter()
            .map(|name| {
                Listed::Named(QueuedOperation {
                    name,
                    request_metadata: None,
                })
            })
            .collect();
        Ok(())
    }

    /// Decode new or changed operations into the index.
    ///
    /// Returns the count decoded, the names whose fetch failed, and
    /// summaries of listed operations that were surfaced but not cached.
    async fn reconcile(
        &self,
        listed: Vec<Listed>,
    ) -> (usize, Vec<String>, HashMap<String, OperationSummary>) {
        let mut decoded = 0;
        let mut uncached = HashMap::new();
        let mut to_fetch = Vec::new();

        for item in listed {
            match item {
                Listed::Full(operation) => {
                    let fresh = self
                        .index
                        .lock()
                        .peek(&operation.name)
                        .map_or(true, |cached| cached.done != operation.done);
                    if fresh && self.record(&operation, None, &mut uncached) {
                        decoded += 1;
                    }
                }
                Listed::Named(queued) => {
                    if !self.index.lock().contains(&queued.name) {
                        to_fetch.push(queued);
                    }
                }
            }
        }

        let mut failed = Vec::new();
        if to_fetch.is_empty() {
            return (decoded, failed, uncached);
        }

        let metadata: HashMap<String, Option<RequestMetadata>> = to_fetch
            .iter()
            .map(|q| (q.name.clone(), q.request_metadata.clone()))
            .collect();
        let operations = Arc::clone(&self.operations);
        let fetched = self
            .fetches
            .join_all(to_fetch.into_iter().map(|q| q.name), |name| {
                let operations = Arc::clone(&operations);
                async move { operations.get_operation(&name).await }
            })
            .await;

        for (name, result) in fetched {
            match result {
                Ok(operation) => {
                    let fallback = metadata.get(&name).cloned().flatten();
                    if self.record(&operation, fallback, &mut uncached) {
                        decoded += 1;
                    }
                }
                Err(status) => {
                    warn!(operation = %name, code = ?status.code(), detail = status.message(), "Failed to fetch operation");
                    failed.push(name);
                }
            }
        }
        (decoded, failed, uncached)
    }

    /// Decode one operation. Decodable ones go into the index; the rest are
    /// kept in `uncached` for this cycle's report only.
    fn record(
        &self,
        operation: &Operation,
        fallback: Option<RequestMetadata>,
        uncached: &mut HashMap<String, OperationSummary>,
    ) -> bool {
        let metadata = decode_metadata(operation.metadata.as_ref());
        let mut summary = OperationSummary::from_decoded(operation, &metadata);
        if !metadata.is_decoded() {
            debug!(operation = %operation.name, "Operation metadata undecodable, not caching");
            if let Some(request) = &fallback {
                summary.request = request.into();
            }
            uncached.insert(summary.name.clone(), summary);
            return false;
        }

        let request = metadata.request_metadata().cloned().or(fallback);
        if let (Some(request), None) = (&request, metadata.request_metadata()) {
            summary.request = request.into();
        }
        self.index.lock().record(summary, request);
        true
    }
}
