//! Backplane status sampling
//!
//! The backplane reports its queue sizes and active workers on request.
//! [`StatusSampler`] keeps the latest report and folds sizes into fixed-width
//! time buckets, so a caller polling every few milliseconds still gets a
//! short, evenly spaced history.

use crate::error::RpcError;
use crate::proto::buildfarm::BackplaneStatus;
use crate::queue::EntryKind;
use crate::rpc::Backplane;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

pub const DEFAULT_BUCKET: Duration = Duration::from_millis(100);
pub const DEFAULT_HISTORY: usize = 60;

/// Queue sizes averaged over one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueSample {
    pub prequeue: f64,
    pub queue: f64,
    pub dispatched: f64,
}

impl QueueSample {
    fn of(status: &BackplaneStatus) -> Self {
        Self {
            prequeue: status.prequeue.as_ref().map_or(0, |q| q.size) as f64,
            queue: status.operation_queue.as_ref().map_or(0, |q| {
                q.provisions
                    .iter()
                    .flat_map(|provision| provision.internal_sizes.iter())
                    .sum::<i64>()
            }) as f64,
            dispatched: status.dispatched_size as f64,
        }
    }

    fn add(&mut self, other: QueueSample) {
        self.prequeue += other.prequeue;
        self.queue += other.queue;
        self.dispatched += other.dispatched;
    }

    fn scaled(self, factor: f64) -> Self {
        Self {
            prequeue: self.prequeue * factor,
            queue: self.queue * factor,
            dispatched: self.dispatched * factor,
        }
    }
}

/// Names of the queues holding entries of `kind`, per the backplane status.
pub fn queue_names(status: &BackplaneStatus, kind: EntryKind) -> Vec<String> {
    match kind {
        EntryKind::Prequeue => status
            .prequeue
            .iter()
            .map(|q| q.name.clone())
            .filter(|name| !name.is_empty())
            .collect(),
        EntryKind::Queue => status
            .operation_queue
            .iter()
            .flat_map(|q| q.provisions.iter().map(|p| p.name.clone()))
            .collect(),
    }
}

/// Polls backplane status and keeps a bucketed size history.
pub struct StatusSampler {
    backplane: Arc<dyn Backplane>,
    instance_name: String,
    bucket: Duration,
    capacity: usize,
    status: Option<BackplaneStatus>,
    latency: Option<Duration>,
    bucket_start: Option<Instant>,
    sums: QueueSample,
    ticks: u32,
    history: VecDeque<QueueSample>,
}

impl StatusSampler {
    pub fn new(backplane: Arc<dyn Backplane>, instance_name: impl Into<String>) -> Self {
        Self::with_buckets(backplane, instance_name, DEFAULT_BUCKET, DEFAULT_HISTORY)
    }

    pub fn with_buckets(
        backplane: Arc<dyn Backplane>,
        instance_name: impl Into<String>,
        bucket: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            backplane,
            instance_name: instance_name.into(),
            bucket,
            capacity: capacity.max(1),
            status: None,
            latency: None,
            bucket_start: None,
            sums: QueueSample::default(),
            ticks: 0,
            history: VecDeque::new(),
        }
    }

    /// Fetch the current status and fold it into the history.
    pub async fn sample(&mut self) -> Result<&BackplaneStatus, RpcError> {
        let started = Instant::now();
        let status = self
            .backplane
            .status(&self.instance_name)
            .await
            .map_err(|status| RpcError::new("OperationQueue.Status", status))?;
        self.latency = Some(started.elapsed());
        Ok(self.record(status, Instant::now()))
    }

    /// Fold a status observed at `now` into the current bucket.
    ///
    /// The bucket closes once `now` is a full bucket width past its start;
    /// its average goes to the front of the history.
    pub fn record(&mut self, status: BackplaneStatus, now: Instant) -> &BackplaneStatus {
        match self.bucket_start {
            None => self.bucket_start = Some(now),
            Some(start) if now.duration_since(start) >= self.bucket => {
                let average = if self.ticks > 0 {
                    self.sums.scaled(1.0 / f64::from(self.ticks))
                } else {
                    QueueSample::default()
                };
                trace!(?average, ticks = self.ticks, "Closed status bucket");
                self.history.push_front(average);
                self.history.truncate(self.capacity);
                self.sums = QueueSample::default();
                self.ticks = 0;
                self.bucket_start = Some(now);
            }
            Some(_) => {}
        }
        self.sums.add(QueueSample::of(&status));
        self.ticks += 1;
        self.status.insert(status)
    }

    pub fn status(&self) -> Option<&BackplaneStatus> {
        self.status.as_ref()
    }

    /// Execute workers from the latest status.
    pub fn workers(&self) -> &[String] {
        self.status
            .as_ref()
            .map(BackplaneStatus::execute_workers)
            .unwrap_or_default()
    }

    /// Round trip of the last status call.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Bucket averages, newest first.
    pub fn history(&self) -> impl Iterator<Item = &QueueSample> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
