//! `build.buildfarm.v1test`
//!
//! Backplane status, per-stage operation metadata and worker control.

use super::remote_execution::{Digest, ExecuteOperationMetadata, RequestMetadata};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueuedOperationMetadata {
    #[prost(message, optional, tag = "1")]
    pub execute_operation_metadata: Option<ExecuteOperationMetadata>,
    #[prost(message, optional, tag = "2")]
    pub queued_operation_digest: Option<Digest>,
    #[prost(message, optional, tag = "3")]
    pub request_metadata: Option<RequestMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutingOperationMetadata {
    #[prost(message, optional, tag = "1")]
    pub execute_operation_metadata: Option<ExecuteOperationMetadata>,
    #[prost(message, optional, tag = "2")]
    pub request_metadata: Option<RequestMetadata>,
    /// Milliseconds since the epoch.
    #[prost(int64, tag = "3")]
    pub started_at: i64,
    #[prost(string, tag = "4")]
    pub executing_on: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompletedOperationMetadata {
    #[prost(message, optional, tag = "1")]
    pub execute_operation_metadata: Option<ExecuteOperationMetadata>,
    #[prost(message, optional, tag = "2")]
    pub request_metadata: Option<RequestMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackplaneStatusRequest {
    #[prost(string, tag = "1")]
    pub instance_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueueStatus {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub size: i64,
    #[prost(int64, repeated, tag = "3")]
    pub internal_sizes: Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationQueueStatus {
    #[prost(int64, tag = "1")]
    pub size: i64,
    #[prost(message, repeated, tag = "2")]
    pub provisions: Vec<QueueStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackplaneStatus {
    #[prost(message, optional, tag = "1")]
    pub prequeue: Option<QueueStatus>,
    #[prost(message, optional, tag = "2")]
    pub operation_queue: Option<OperationQueueStatus>,
    #[prost(int64, tag = "3")]
    pub dispatched_size: i64,
    #[prost(string, repeated, tag = "4")]
    pub active_workers: Vec<String>,
    #[prost(int64, tag = "5")]
    pub cas_lookup_size: i64,
    #[prost(int64, tag = "6")]
    pub action_cache_size: i64,
    #[prost(int64, tag = "7")]
    pub blocked_actions_size: i64,
    #[prost(int64, tag = "8")]
    pub blocked_invocations_size: i64,
    #[prost(string, repeated, tag = "9")]
    pub active_execute_workers: Vec<String>,
    #[prost(string, repeated, tag = "10")]
    pub active_storage_workers: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerProfileRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StageInformation {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub slots_configured: i32,
    #[prost(int32, tag = "3")]
    pub slots_used: i32,
    #[prost(string, repeated, tag = "4")]
    pub operation_names: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerProfileMessage {
    #[prost(int64, tag = "1")]
    pub cas_size: i64,
    #[prost(int64, tag = "2")]
    pub cas_entry_count: i64,
    #[prost(message, repeated, tag = "6")]
    pub stages: Vec<StageInformation>,
    #[prost(string, tag = "8")]
    pub name: String,
}

/// Requested change to one pipeline stage. A width of zero leaves it unchanged.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PipelineChange {
    #[prost(string, tag = "1")]
    pub stage: String,
    #[prost(bool, tag = "2")]
    pub paused: bool,
    #[prost(int32, tag = "3")]
    pub width: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PipelineChangeRequest {
    #[prost(message, repeated, tag = "1")]
    pub changes: Vec<PipelineChange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PipelineChangeResponse {}

message_name!("build.buildfarm.v1test" =>
    QueuedOperationMetadata,
    ExecutingOperationMetadata,
    CompletedOperationMetadata,
    BackplaneStatus,
    WorkerProfileMessage,
);

impl BackplaneStatus {
    /// Workers that run actions. Older servers only fill `active_workers`.
    pub fn execute_workers(&self) -> &[String] {
        if self.active_execute_workers.is_empty() {
            &self.active_workers
        } else {
            &self.active_execute_workers
        }
    }
}

impl WorkerProfileMessage {
    pub fn stage(&self, name: &str) -> Option<&StageInformation> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}
