//! `build.bazel.remote.execution.v2`

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Digest {
    #[prost(string, tag = "1")]
    pub hash: String,
    #[prost(int64, tag = "2")]
    pub size_bytes: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub digest: Option<Digest>,
    #[prost(bool, tag = "4")]
    pub is_executable: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DirectoryNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub digest: Option<Digest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SymlinkNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub target: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Directory {
    #[prost(message, repeated, tag = "1")]
    pub files: Vec<FileNode>,
    #[prost(message, repeated, tag = "2")]
    pub directories: Vec<DirectoryNode>,
    #[prost(message, repeated, tag = "3")]
    pub symlinks: Vec<SymlinkNode>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTreeRequest {
    #[prost(string, tag = "1")]
    pub instance_name: String,
    #[prost(message, optional, tag = "2")]
    pub root_digest: Option<Digest>,
    #[prost(int32, tag = "3")]
    pub page_size: i32,
    #[prost(string, tag = "4")]
    pub page_token: String,
    #[prost(int32, tag = "5")]
    pub digest_function: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTreeResponse {
    #[prost(message, repeated, tag = "1")]
    pub directories: Vec<Directory>,
    #[prost(string, tag = "2")]
    pub next_page_token: String,
}

/// Client tool identity attached to requests.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolDetails {
    #[prost(string, tag = "1")]
    pub tool_name: String,
    #[prost(string, tag = "2")]
    pub tool_version: String,
}

/// Request context set by the build client. Also appears in JSON queue entries,
/// hence the camelCase serde mapping.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMetadata {
    #[prost(message, optional, tag = "1")]
    pub tool_details: Option<ToolDetails>,
    #[prost(string, tag = "2")]
    pub action_id: String,
    #[prost(string, tag = "3")]
    pub tool_invocation_id: String,
    #[prost(string, tag = "4")]
    pub correlated_invocations_id: String,
    #[prost(string, tag = "5")]
    pub action_mnemonic: String,
    #[prost(string, tag = "6")]
    pub target_id: String,
    #[prost(string, tag = "7")]
    pub configuration_id: String,
}

/// `ExecutionStage.Value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionStage {
    #[default]
    Unknown,
    CacheCheck,
    Queued,
    Executing,
    Completed,
}

impl ExecutionStage {
    pub fn from_wire(value: i32) -> Self {
        match value {
            1 => ExecutionStage::CacheCheck,
            2 => ExecutionStage::Queued,
            3 => ExecutionStage::Executing,
            4 => ExecutionStage::Completed,
            _ => ExecutionStage::Unknown,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            ExecutionStage::Unknown => 0,
            ExecutionStage::CacheCheck => 1,
            ExecutionStage::Queued => 2,
            ExecutionStage::Executing => 3,
            ExecutionStage::Completed => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStage::Unknown => "UNKNOWN",
            ExecutionStage::CacheCheck => "CACHE_CHECK",
            ExecutionStage::Queued => "QUEUED",
            ExecutionStage::Executing => "EXECUTING",
            ExecutionStage::Completed => "COMPLETED",
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutedActionMetadata {
    #[prost(string, tag = "1")]
    pub worker: String,
    #[prost(message, optional, tag = "2")]
    pub queued_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "3")]
    pub worker_start_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub worker_completed_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "5")]
    pub input_fetch_start_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "6")]
    pub input_fetch_completed_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "7")]
    pub execution_start_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "8")]
    pub execution_completed_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "9")]
    pub output_upload_start_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "10")]
    pub output_upload_completed_timestamp: Option<::prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteOperationMetadata {
    #[prost(int32, tag = "1")]
    pub stage: i32,
    #[prost(message, optional, tag = "2")]
    pub action_digest: Option<Digest>,
    #[prost(string, tag = "3")]
    pub stdout_stream_name: String,
    #[prost(string, tag = "4")]
    pub stderr_stream_name: String,
    #[prost(message, optional, tag = "5")]
    pub partial_execution_metadata: Option<ExecutedActionMetadata>,
    #[prost(int32, tag = "6")]
    pub digest_function: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionResult {
    #[prost(int32, tag = "4")]
    pub exit_code: i32,
    #[prost(message, optional, tag = "6")]
    pub stdout_digest: Option<Digest>,
    #[prost(message, optional, tag = "8")]
    pub stderr_digest: Option<Digest>,
    #[prost(message, optional, tag = "9")]
    pub execution_metadata: Option<ExecutedActionMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteResponse {
    #[prost(message, optional, tag = "1")]
    pub result: Option<ActionResult>,
    #[prost(bool, tag = "2")]
    pub cached_result: bool,
    #[prost(message, optional, tag = "3")]
    pub status: Option<super::rpc::Status>,
    #[prost(string, tag = "5")]
    pub message: String,
}

message_name!("build.bazel.remote.execution.v2" =>
    Digest,
    Directory,
    RequestMetadata,
    ExecuteOperationMetadata,
    ExecuteResponse,
);
