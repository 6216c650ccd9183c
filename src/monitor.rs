//! Tick driver
//!
//! A [`Monitor`] advances every observer once per tick: backplane status,
//! worker probes, then the operation listing. Each stage joins its fan-out
//! before the next starts, and the [`Snapshot`] handed to the render side is
//! built only after all of them finish.

use crate::error::{ApiError, ErrorClass};
use crate::operation::OperationSummary;
use crate::poller::{OperationPoller, PollOutcome, PollReport};
use crate::proto::buildfarm::BackplaneStatus;
use crate::status::{QueueSample, StatusSampler};
use crate::workers::{WorkerProber, WorkerSort, WorkerState};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Everything one tick observed.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tick: u64,
    pub status: Option<BackplaneStatus>,
    pub status_latency: Option<Duration>,
    pub history: Vec<QueueSample>,
    pub workers: Vec<WorkerState>,
    /// False when the listing backed off this tick and `operations` is
    /// carried over from the last cycle.
    pub polled: bool,
    pub operations: Vec<OperationSummary>,
    pub stall_counter: u32,
}

pub struct Monitor {
    sampler: StatusSampler,
    prober: Option<WorkerProber>,
    poller: OperationPoller,
    interval: Duration,
    worker_sort: WorkerSort,
    ticks: u64,
    last_report: Option<PollReport>,
}

impl Monitor {
    pub fn new(
        sampler: StatusSampler,
        poller: OperationPoller,
        prober: Option<WorkerProber>,
        interval: Duration,
    ) -> Self {
        Self {
            sampler,
            prober,
            poller,
            interval,
            worker_sort: WorkerSort::default(),
            ticks: 0,
            last_report: None,
        }
    }

    pub fn with_worker_sort(mut self, sort: WorkerSort) -> Self {
        self.worker_sort = sort;
        self
    }

    pub fn poller(&self) -> &OperationPoller {
        &self.poller
    }

    pub fn poller_mut(&mut self) -> &mut OperationPoller {
        &mut self.poller
    }

    pub fn sampler(&self) -> &StatusSampler {
        &self.sampler
    }

    /// Run one tick to completion.
    ///
    /// An unavailable status endpoint only skips this tick's status update;
    /// any other failure ends the tick with an error.
    pub async fn tick(&mut self) -> Result<Snapshot, ApiError> {
        self.ticks += 1;

        if let Err(e) = self.sampler.sample().await {
            if e.class() != ErrorClass::Transient {
                return Err(e.into());
            }
            warn!(tick = self.ticks, error = %e, "Backplane status unavailable");
        }

        if let Some(prober) = &mut self.prober {
            let workers = self.sampler.workers().to_vec();
            prober.probe(&workers).await;
        }

        let polled = match self.poller.poll().await? {
            PollOutcome::Polled(report) => {
                self.last_report = Some(report);
                true
            }
            PollOutcome::Skipped { .. } => false,
        };

        let snapshot = Snapshot {
            tick: self.ticks,
            status: self.sampler.status().cloned(),
            status_latency: self.sampler.latency(),
            history: self.sampler.history().copied().collect(),
            workers: self
                .prober
                .as_ref()
                .map(|p| p.workers(self.worker_sort))
                .unwrap_or_default(),
            polled,
            operations: self
                .last_report
                .as_ref()
                .map(|r| r.summaries.clone())
                .unwrap_or_default(),
            stall_counter: self.poller.cursor().stall_counter(),
        };
        debug!(
            tick = snapshot.tick,
            polled,
            operations = snapshot.operations.len(),
            workers = snapshot.workers.len(),
            "Tick complete"
        );
        Ok(snapshot)
    }

    /// Drive ticks at the configured interval until `ticks` have run or the
    /// sink breaks. Returns the number of ticks run.
    ///
    /// A tick that overruns the interval delays the next one; ticks never
    /// overlap.
    pub async fn run<F>(&mut self, ticks: Option<u64>, mut sink: F) -> Result<u64, ApiError>
    where
        F: FnMut(Snapshot) -> ControlFlow<()>,
    {
        let mut interval = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut run = 0;
        while ticks.map_or(true, |limit| run < limit) {
            interval.tick().await;
            let snapshot = self.tick().await?;
            run += 1;
            if sink(snapshot).is_break() {
                break;
            }
        }
        Ok(run)
    }
}
