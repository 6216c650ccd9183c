//! Worker probes
//!
//! One profile request per known worker per tick, each under its own short
//! deadline. A worker that misses the deadline or errors keeps its last good
//! profile and has its staleness counter bumped, so a slow worker shows up as
//! stale instead of holding up the tick or disappearing.

use crate::concurrency::TaskGroup;
use crate::error::{ApiError, RpcError};
use crate::proto::buildfarm::{PipelineChange, WorkerProfileMessage};
use crate::rpc::{WorkerConnector, WorkerControl};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::{Code, Status};
use tracing::{debug, info, warn};

pub const INPUT_FETCH_STAGE: &str = "InputFetchStage";
pub const EXECUTE_ACTION_STAGE: &str = "ExecuteActionStage";
pub const REPORT_RESULT_STAGE: &str = "ReportResultStage";

/// Latest known profile of one worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerState {
    pub worker: String,
    pub profile: WorkerProfileMessage,
    /// Consecutive probes that failed; zero when the profile is current.
    pub stale: u32,
    /// Status of the last failure other than a missed deadline.
    pub message: String,
}

impl WorkerState {
    fn new(worker: &str) -> Self {
        Self {
            worker: worker.to_string(),
            ..Default::default()
        }
    }

    /// The name the worker reports for itself, else its address.
    pub fn display_name(&self) -> &str {
        if self.profile.name.is_empty() {
            &self.worker
        } else {
            &self.profile.name
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale > 0
    }

    /// `(used, configured)` slots of a pipeline stage, zero when absent.
    pub fn slots(&self, stage: &str) -> (i32, i32) {
        self.profile
            .stage(stage)
            .map_or((0, 0), |s| (s.slots_used, s.slots_configured))
    }

    pub fn executions(&self) -> i32 {
        self.slots(EXECUTE_ACTION_STAGE).0
    }

    fn fail(&mut self, status: &Status) {
        self.stale += 1;
        if status.code() != Code::DeadlineExceeded {
            self.message = status.to_string();
        }
    }
}

/// Ordering of [`WorkerProber::workers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerSort {
    #[default]
    Name,
    /// Busiest first, then by name.
    Executions,
}

/// Result of a pipeline change and the profile read back after it.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub profile: WorkerProfileMessage,
    /// Stages whose width did not read back as requested.
    pub unconfirmed: Vec<String>,
}

/// Probes worker profiles with a per-worker deadline.
pub struct WorkerProber {
    connector: Arc<dyn WorkerConnector>,
    clients: Mutex<HashMap<String, Arc<dyn WorkerControl>>>,
    states: HashMap<String, WorkerState>,
    deadline: Duration,
    probes: TaskGroup,
}

impl WorkerProber {
    pub fn new(connector: Arc<dyn WorkerConnector>, deadline: Duration, concurrency: usize) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
            states: HashMap::new(),
            deadline,
            probes: TaskGroup::new(concurrency),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Cached client for `worker`, connecting on first use.
    fn client(&self, worker: &str) -> Result<Arc<dyn WorkerControl>, ApiError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(worker) {
            return Ok(Arc::clone(client));
        }
        let client = self.connector.connect(worker)?;
        debug!(worker, "Opened worker channel");
        clients.insert(worker.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Probe every worker in `workers` once and wait for all of them.
    ///
    /// Workers no longer listed are forgotten.
    pub async fn probe(&mut self, workers: &[String]) {
        self.states.retain(|worker, _| workers.contains(worker));
        self.clients.lock().retain(|worker, _| workers.contains(worker));

        let mut reachable = Vec::with_capacity(workers.len());
        for worker in workers {
            match self.client(worker) {
                Ok(client) => reachable.push((worker.clone(), client)),
                Err(e) => {
                    let state = self
                        .states
                        .entry(worker.clone())
                        .or_insert_with(|| WorkerState::new(worker));
                    state.stale += 1;
                    state.message = e.to_string();
                }
            }
        }

        let deadline = self.deadline;
        let results = self
            .probes
            .join_all(reachable, |(_, client)| async move {
                match tokio::time::timeout(deadline, client.profile()).await {
                    Ok(result) => result,
                    Err(_) => Err(Status::deadline_exceeded("worker profile deadline")),
                }
            })
            .await;

        for ((worker, _), result) in results {
            let state = self
                .states
                .entry(worker.clone())
                .or_insert_with(|| WorkerState::new(&worker));
            match result {
                Ok(profile) => {
                    state.profile = profile;
                    state.stale = 0;
                    state.message.clear();
                }
                Err(status) => {
                    debug!(worker = %worker, code = ?status.code(), stale = state.stale + 1, "Worker probe failed");
                    state.fail(&status);
                }
            }
        }
    }

    pub fn state(&self, worker: &str) -> Option<&WorkerState> {
        self.states.get(worker)
    }

    pub fn workers(&self, sort: WorkerSort) -> Vec<WorkerState> {
        let mut workers: Vec<WorkerState> = self.states.values().cloned().collect();
        match sort {
            WorkerSort::Name => workers.sort_by(|a, b| a.display_name().cmp(b.display_name())),
            WorkerSort::Executions => workers.sort_by(|a, b| {
                b.executions()
                    .cmp(&a.executions())
                    .then_with(|| a.display_name().cmp(b.display_name()))
            }),
        }
        workers
    }

    /// Apply pipeline changes on `worker` and read its profile back.
    pub async fn pipeline_change(
        &self,
        worker: &str,
        changes: Vec<PipelineChange>,
    ) -> Result<PipelineOutcome, ApiError> {
        let client = self.client(worker)?;
        info!(worker, changes = changes.len(), "Changing worker pipeline");
        client
            .pipeline_change(changes.clone())
            .await
            .map_err(|status| RpcError::new("PipelineChange", status))?;
        let profile = client
            .profile()
            .await
            .map_err(|status| RpcError::new("GetWorkerProfile", status))?;

        let unconfirmed: Vec<String> = changes
            .iter()
            .filter(|change| change.width > 0)
            .filter(|change| {
                profile
                    .stage(&change.stage)
                    .map_or(true, |stage| stage.slots_configured != change.width)
            })
            .map(|change| change.stage.clone())
            .collect();
        if !unconfirmed.is_empty() {
            warn!(worker, stages = ?unconfirmed, "Pipeline width did not take effect");
        }
        Ok(PipelineOutcome {
            profile,
            unconfirmed,
        })
    }
}
