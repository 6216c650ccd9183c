//! gRPC transport for the RPC seams
//!
//! One [`GrpcClient`] wraps a `tonic` channel and serves every service the
//! backplane exposes on it. Calls are issued through `tonic::client::Grpc` with
//! the `prost` codec against fixed method paths.

use super::connect;
use super::{
    Backplane, ByteStream, ChunkStream, ContentAddressableStorage, Operations, TreePageStream,
    WorkerConnector, WorkerControl,
};
use crate::error::ApiError;
use crate::proto::buildfarm::{
    BackplaneStatus, BackplaneStatusRequest, PipelineChange, PipelineChangeRequest,
    PipelineChangeResponse, WorkerProfileMessage, WorkerProfileRequest,
};
use crate::proto::bytestream::{ReadRequest, ReadResponse};
use crate::proto::longrunning::{
    CancelOperationRequest, GetOperationRequest, ListOperationsRequest, ListOperationsResponse,
    Operation,
};
use crate::proto::remote_execution::{GetTreeRequest, GetTreeResponse};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::Status;

const GET_TREE: &str = "/build.bazel.remote.execution.v2.ContentAddressableStorage/GetTree";
const READ: &str = "/google.bytestream.ByteStream/Read";
const LIST_OPERATIONS: &str = "/google.longrunning.Operations/ListOperations";
const GET_OPERATION: &str = "/google.longrunning.Operations/GetOperation";
const CANCEL_OPERATION: &str = "/google.longrunning.Operations/CancelOperation";
const BACKPLANE_STATUS: &str = "/build.buildfarm.v1test.OperationQueue/Status";
const GET_WORKER_PROFILE: &str = "/build.buildfarm.v1test.WorkerProfile/GetWorkerProfile";
const PIPELINE_CHANGE: &str = "/build.buildfarm.v1test.WorkerControl/PipelineChange";

/// Client for every backplane service reachable over one channel.
#[derive(Clone)]
pub struct GrpcClient {
    channel: Channel,
}

impl GrpcClient {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Dial `target` (see [`connect::endpoint`] for the accepted forms).
    pub async fn connect(target: &str, ca_file: Option<&Path>) -> Result<Self, ApiError> {
        Ok(Self::new(connect::connect(target, ca_file).await?))
    }

    async fn ready(&self) -> Result<tonic::client::Grpc<Channel>, Status> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("Service was not ready: {}", e)))?;
        Ok(grpc)
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }

    async fn server_streaming<Req, Resp>(
        &self,
        path: &'static str,
        request: Req,
    ) -> Result<Streaming<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .server_streaming(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl ContentAddressableStorage for GrpcClient {
    async fn get_tree(&self, request: GetTreeRequest) -> Result<TreePageStream, Status> {
        let pages = self
            .server_streaming::<GetTreeRequest, GetTreeResponse>(GET_TREE, request)
            .await?;
        Ok(pages.boxed())
    }
}

#[async_trait]
impl ByteStream for GrpcClient {
    async fn read(&self, resource_name: &str) -> Result<ChunkStream, Status> {
        let request = ReadRequest {
            resource_name: resource_name.to_string(),
            read_offset: 0,
            read_limit: 0,
        };
        let chunks = self
            .server_streaming::<ReadRequest, ReadResponse>(READ, request)
            .await?;
        Ok(chunks.map(|chunk| chunk.map(|response| response.data)).boxed())
    }
}

#[async_trait]
impl Operations for GrpcClient {
    async fn list_operations(
        &self,
        request: ListOperationsRequest,
    ) -> Result<ListOperationsResponse, Status> {
        self.unary(LIST_OPERATIONS, request).await
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, Status> {
        let request = GetOperationRequest {
            name: name.to_string(),
        };
        self.unary(GET_OPERATION, request).await
    }

    async fn cancel_operation(&self, name: &str) -> Result<(), Status> {
        let request = CancelOperationRequest {
            name: name.to_string(),
        };
        self.unary::<CancelOperationRequest, ()>(CANCEL_OPERATION, request)
            .await
    }
}

#[async_trait]
impl Backplane for GrpcClient {
    async fn status(&self, instance_name: &str) -> Result<BackplaneStatus, Status> {
        let request = BackplaneStatusRequest {
            instance_name: instance_name.to_string(),
        };
        self.unary(BACKPLANE_STATUS, request).await
    }
}

#[async_trait]
impl WorkerControl for GrpcClient {
    async fn profile(&self) -> Result<WorkerProfileMessage, Status> {
        self.unary(GET_WORKER_PROFILE, WorkerProfileRequest {}).await
    }

    async fn pipeline_change(&self, changes: Vec<PipelineChange>) -> Result<(), Status> {
        let request = PipelineChangeRequest { changes };
        self.unary::<PipelineChangeRequest, PipelineChangeResponse>(PIPELINE_CHANGE, request)
            .await
            .map(|_| ())
    }
}

/// Opens lazily-dialed channels to workers.
#[derive(Debug, Clone, Default)]
pub struct GrpcWorkerConnector {
    ca_file: Option<PathBuf>,
}

impl GrpcWorkerConnector {
    pub fn new(ca_file: Option<PathBuf>) -> Self {
        Self { ca_file }
    }
}

impl WorkerConnector for GrpcWorkerConnector {
    fn connect(&self, worker: &str) -> Result<Arc<dyn WorkerControl>, ApiError> {
        let channel = connect::connect_lazy(worker, self.ca_file.as_deref())?;
        Ok(Arc::new(GrpcClient::new(channel)))
    }
}
