//! RPC seams
//!
//! Every remote call the client makes goes through one of these traits. The
//! [`grpc`] module implements them over a `tonic` channel; tests substitute
//! in-memory fakes.

pub mod connect;
pub mod grpc;

use crate::error::ApiError;
use crate::proto::buildfarm::{BackplaneStatus, PipelineChange, WorkerProfileMessage};
use crate::proto::longrunning::{ListOperationsRequest, ListOperationsResponse, Operation};
use crate::proto::remote_execution::{GetTreeRequest, GetTreeResponse};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tonic::Status;

pub use grpc::{GrpcClient, GrpcWorkerConnector};

/// Pages of a `GetTree` response stream.
pub type TreePageStream = BoxStream<'static, Result<GetTreeResponse, Status>>;

/// Chunks of a bytestream read.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, Status>>;

#[async_trait]
pub trait ContentAddressableStorage: Send + Sync {
    async fn get_tree(&self, request: GetTreeRequest) -> Result<TreePageStream, Status>;
}

#[async_trait]
pub trait ByteStream: Send + Sync {
    async fn read(&self, resource_name: &str) -> Result<ChunkStream, Status>;
}

#[async_trait]
pub trait Operations: Send + Sync {
    async fn list_operations(
        &self,
        request: ListOperationsRequest,
    ) -> Result<ListOperationsResponse, Status>;

    async fn get_operation(&self, name: &str) -> Result<Operation, Status>;

    async fn cancel_operation(&self, name: &str) -> Result<(), Status>;
}

#[async_trait]
pub trait Backplane: Send + Sync {
    async fn status(&self, instance_name: &str) -> Result<BackplaneStatus, Status>;
}

/// Per-worker profile and pipeline control.
#[async_trait]
pub trait WorkerControl: Send + Sync {
    async fn profile(&self) -> Result<WorkerProfileMessage, Status>;

    async fn pipeline_change(&self, changes: Vec<PipelineChange>) -> Result<(), Status>;
}

/// Opens a [`WorkerControl`] handle for a worker address.
pub trait WorkerConnector: Send + Sync {
    fn connect(&self, worker: &str) -> Result<Arc<dyn WorkerControl>, ApiError>;
}

/// Cancel an operation, treating `UNKNOWN` as "already finished".
pub async fn cancel(operations: &dyn Operations, name: &str) -> Result<(), Status> {
    match operations.cancel_operation(name).await {
        Err(status) if status.code() != tonic::Code::Unknown => Err(status),
        _ => Ok(()),
    }
}
