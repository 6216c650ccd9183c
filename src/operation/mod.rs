//! Operation records
//!
//! Reduces listed long-running operations to [`OperationSummary`] values and
//! holds the shared cache readers consult between polls.

pub mod cache;
pub mod index;
pub mod metadata;

pub use cache::LruCache;
pub use index::{OperationIndex, SharedOperationIndex};
pub use metadata::{decode_metadata, DecodedMetadata, StageKind};

use crate::proto::longrunning::{operation::Outcome, Operation};
use crate::proto::remote_execution::{
    ExecuteResponse, ExecutedActionMetadata, ExecutionStage, RequestMetadata,
};
use crate::proto::unpack;
use chrono::{DateTime, Utc};

/// The request context fields worth showing for an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSummary {
    pub target_id: String,
    pub action_mnemonic: String,
    pub correlated_invocations_id: String,
    pub tool_invocation_id: String,
}

impl From<&RequestMetadata> for RequestSummary {
    fn from(metadata: &RequestMetadata) -> Self {
        Self {
            target_id: metadata.target_id.clone(),
            action_mnemonic: metadata.action_mnemonic.clone(),
            correlated_invocations_id: metadata.correlated_invocations_id.clone(),
            tool_invocation_id: metadata.tool_invocation_id.clone(),
        }
    }
}

/// Immutable digest of one operation as of the listing it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationSummary {
    pub name: String,
    pub stage_kind: StageKind,
    pub stage: ExecutionStage,
    pub request: RequestSummary,
    pub worker: String,
    pub worker_start: Option<DateTime<Utc>>,
    pub worker_completed: Option<DateTime<Utc>>,
    pub done: bool,
    /// Text form of the whole operation when its metadata was undecodable.
    pub raw: Option<String>,
}

impl OperationSummary {
    pub fn from_operation(operation: &Operation) -> Self {
        Self::from_decoded(operation, &decode_metadata(operation.metadata.as_ref()))
    }

    pub fn from_decoded(operation: &Operation, decoded: &DecodedMetadata) -> Self {
        let stage = decoded
            .execute_metadata()
            .map(|em| ExecutionStage::from_wire(em.stage))
            .unwrap_or_default();
        let executed = executed_action_metadata(operation);
        Self {
            name: operation.name.clone(),
            stage_kind: decoded.stage_kind(),
            stage,
            request: decoded
                .request_metadata()
                .map(RequestSummary::from)
                .unwrap_or_default(),
            worker: executed
                .as_ref()
                .map(|m| m.worker.clone())
                .unwrap_or_default(),
            worker_start: executed
                .as_ref()
                .and_then(|m| timestamp(m.worker_start_timestamp.as_ref())),
            worker_completed: executed
                .as_ref()
                .and_then(|m| timestamp(m.worker_completed_timestamp.as_ref())),
            done: operation.done,
            raw: (!decoded.is_decoded()).then(|| render_raw(operation)),
        }
    }

    /// Wall time between worker start and completion, when both are known.
    pub fn worker_duration(&self) -> Option<chrono::Duration> {
        Some(self.worker_completed? - self.worker_start?)
    }
}

/// Execution timing for an operation.
///
/// A finished operation with an `ExecuteResponse` reports the result's
/// metadata; otherwise the partial metadata of whichever stage message it
/// carries. `None` when neither is present.
pub fn executed_action_metadata(operation: &Operation) -> Option<ExecutedActionMetadata> {
    if let Some(Outcome::Response(response)) = &operation.outcome {
        if let Some(Ok(response)) = unpack::<ExecuteResponse>(response) {
            return response.result.and_then(|result| result.execution_metadata);
        }
    }
    decode_metadata(operation.metadata.as_ref())
        .execute_metadata()
        .and_then(|em| em.partial_execution_metadata.clone())
}

/// Text rendering of an operation for display when nothing else fits.
pub fn render_raw(operation: &Operation) -> String {
    format!("{:#?}", operation)
}

/// One step of an execution, measured from the queued timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineStep {
    pub label: &'static str,
    /// Time since the action was queued.
    pub elapsed: Option<chrono::Duration>,
    /// Gap between the previous step finishing and this one starting.
    pub stalled: Option<chrono::Duration>,
}

/// Where an execution spent its time between being queued and completing.
///
/// Steps whose timestamps are missing or zero have `None` measurements, so a
/// partial timeline from a still-running operation renders as far as it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTimeline {
    pub steps: Vec<TimelineStep>,
}

impl ExecutionTimeline {
    pub fn from_metadata(metadata: &ExecutedActionMetadata) -> Self {
        let queued = timestamp(metadata.queued_timestamp.as_ref());
        let worker_start = timestamp(metadata.worker_start_timestamp.as_ref());
        let fetch_start = timestamp(metadata.input_fetch_start_timestamp.as_ref());
        let fetch_done = timestamp(metadata.input_fetch_completed_timestamp.as_ref());
        let exec_start = timestamp(metadata.execution_start_timestamp.as_ref());
        let exec_done = timestamp(metadata.execution_completed_timestamp.as_ref());
        let upload_start = timestamp(metadata.output_upload_start_timestamp.as_ref());
        let upload_done = timestamp(metadata.output_upload_completed_timestamp.as_ref());
        let worker_done = timestamp(metadata.worker_completed_timestamp.as_ref());

        let since = |from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>| Some(to? - from?);
        let step = |label, at, previous| TimelineStep {
            label,
            elapsed: since(queued, at),
            stalled: since(previous, at),
        };
        Self {
            steps: vec![
                step("worker start", worker_start, queued),
                step("input fetch start", fetch_start, worker_start),
                step("execute start", exec_start, fetch_done),
                step("output upload start", upload_start, exec_done),
                step("worker complete", worker_done, upload_done),
            ],
        }
    }

    /// Sum of the known stalls.
    pub fn total_stalled(&self) -> chrono::Duration {
        self.steps
            .iter()
            .filter_map(|step| step.stalled)
            .fold(chrono::Duration::zero(), |total, stall| total + stall)
    }
}

fn timestamp(ts: Option<&prost_types::Timestamp>) -> Option<DateTime<Utc>> {
    let ts = ts?;
    if ts.seconds == 0 && ts.nanos == 0 {
        return None;
    }
    DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::buildfarm::ExecutingOperationMetadata;
    use crate::proto::pack;
    use crate::proto::remote_execution::{ActionResult, ExecuteOperationMetadata};
    use prost_types::{Any, Timestamp};

    fn at(seconds: i64) -> Option<Timestamp> {
        Some(Timestamp { seconds, nanos: 0 })
    }

    fn executing(name: &str) -> Operation {
        Operation {
            name: name.to_string(),
            metadata: Some(pack(&ExecutingOperationMetadata {
                execute_operation_metadata: Some(ExecuteOperationMetadata {
                    stage: ExecutionStage::Executing.to_wire(),
                    partial_execution_metadata: Some(ExecutedActionMetadata {
                        worker: "worker-7:8981".into(),
                        worker_start_timestamp: at(1_700_000_000),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                request_metadata: Some(RequestMetadata {
                    target_id: "//svc:server".into(),
                    action_mnemonic: "GoLink".into(),
                    correlated_invocations_id: "build-1".into(),
                    tool_invocation_id: "inv-1".into(),
                    ..Default::default()
                }),
                ..Default::default()
            })),
            done: false,
            outcome: None,
        }
    }

    #[test]
    fn summarizes_executing_operation() {
        let summary = OperationSummary::from_operation(&executing("shard/executions/1"));

        assert_eq!(summary.stage_kind, StageKind::Executing);
        assert_eq!(summary.stage, ExecutionStage::Executing);
        assert_eq!(summary.request.target_id, "//svc:server");
        assert_eq!(summary.request.action_mnemonic, "GoLink");
        assert_eq!(summary.worker, "worker-7:8981");
        assert_eq!(
            summary.worker_start.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
        assert!(summary.worker_completed.is_none());
        assert!(summary.raw.is_none());
    }

    #[test]
    fn finished_operation_reports_result_metadata() {
        let mut operation = executing("shard/executions/2");
        operation.done = true;
        operation.outcome = Some(Outcome::Response(pack(&ExecuteResponse {
            result: Some(ActionResult {
                execution_metadata: Some(ExecutedActionMetadata {
                    worker: "worker-9".into(),
                    worker_start_timestamp: at(100),
                    worker_completed_timestamp: at(160),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })));

        let summary = OperationSummary::from_operation(&operation);

        assert!(summary.done);
        assert_eq!(summary.worker, "worker-9");
        assert_eq!(summary.worker_duration(), Some(chrono::Duration::seconds(60)));
    }

    #[test]
    fn undecodable_metadata_keeps_raw_text() {
        let operation = Operation {
            name: "shard/executions/odd".into(),
            metadata: Some(Any {
                type_url: "type.googleapis.com/example.Unknown".into(),
                value: vec![1, 2, 3],
            }),
            ..Default::default()
        };

        let summary = OperationSummary::from_operation(&operation);

        assert_eq!(summary.stage_kind, StageKind::Generic);
        let raw = summary.raw.unwrap();
        assert!(raw.contains("shard/executions/odd"));
        assert!(raw.contains("example.Unknown"));
        assert!(executed_action_metadata(&operation).is_none());
    }

    #[test]
    fn timeline_measures_stalls_between_steps() {
        let metadata = ExecutedActionMetadata {
            queued_timestamp: at(1_000),
            worker_start_timestamp: at(1_002),
            input_fetch_start_timestamp: at(1_003),
            input_fetch_completed_timestamp: at(1_010),
            execution_start_timestamp: at(1_011),
            execution_completed_timestamp: at(1_040),
            output_upload_start_timestamp: at(1_044),
            output_upload_completed_timestamp: at(1_050),
            worker_completed_timestamp: at(1_051),
            ..Default::default()
        };

        let timeline = ExecutionTimeline::from_metadata(&metadata);
        let stalls: Vec<i64> = timeline
            .steps
            .iter()
            .map(|step| step.stalled.unwrap().num_seconds())
            .collect();

        assert_eq!(stalls, vec![2, 1, 1, 4, 1]);
        assert_eq!(timeline.steps[4].elapsed, Some(chrono::Duration::seconds(51)));
        assert_eq!(timeline.total_stalled(), chrono::Duration::seconds(9));
    }

    #[test]
    fn timeline_of_running_action_stops_at_missing_steps() {
        let metadata = ExecutedActionMetadata {
            queued_timestamp: at(500),
            worker_start_timestamp: at(505),
            ..Default::default()
        };

        let timeline = ExecutionTimeline::from_metadata(&metadata);

        assert_eq!(timeline.steps[0].stalled, Some(chrono::Duration::seconds(5)));
        assert!(timeline.steps[1..].iter().all(|step| step.elapsed.is_none()));
        assert_eq!(timeline.total_stalled(), chrono::Duration::seconds(5));
    }
}
