//! In-memory stand-ins for the remote services.

use async_trait::async_trait;
use bfscope::cas::BytestreamFetcher;
use bfscope::digest::{Digest, DigestFunction};
use bfscope::error::ApiError;
use bfscope::proto::buildfarm::{
    BackplaneStatus, ExecutingOperationMetadata, PipelineChange, StageInformation,
    WorkerProfileMessage,
};
use bfscope::proto::longrunning::{ListOperationsRequest, ListOperationsResponse, Operation};
use bfscope::proto::pack;
use bfscope::proto::remote_execution::{
    Directory, DirectoryNode, ExecuteOperationMetadata, ExecutionStage, FileNode, GetTreeRequest,
    GetTreeResponse, RequestMetadata,
};
use bfscope::rpc::{
    Backplane, ByteStream, ChunkStream, ContentAddressableStorage, Operations, TreePageStream,
    WorkerConnector, WorkerControl,
};
use futures::stream;
use parking_lot::Mutex;
use prost::Message;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tonic::Status;

pub fn digest_of(directory: &Directory) -> Digest {
    Digest::of_message(directory, DigestFunction::Sha256).unwrap()
}

pub fn file(name: &str, contents: &[u8]) -> FileNode {
    FileNode {
        name: name.to_string(),
        digest: Some(
            Digest::from_blob(contents, DigestFunction::Sha256)
                .unwrap()
                .to_wire(),
        ),
        is_executable: false,
    }
}

pub fn child(name: &str, directory: &Directory) -> DirectoryNode {
    DirectoryNode {
        name: name.to_string(),
        digest: Some(digest_of(directory).to_wire()),
    }
}

/// Directories served page by page through `GetTree`.
///
/// Page tokens are page indexes; the last page returns an empty token.
pub struct PagedCas {
    pages: Vec<Vec<Directory>>,
    pub requests: Mutex<Vec<GetTreeRequest>>,
}

impl PagedCas {
    pub fn new(pages: Vec<Vec<Directory>>) -> Self {
        Self {
            pages,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContentAddressableStorage for PagedCas {
    async fn get_tree(&self, request: GetTreeRequest) -> Result<TreePageStream, Status> {
        let index = if request.page_token.is_empty() {
            0
        } else {
            request
                .page_token
                .parse::<usize>()
                .map_err(|_| Status::invalid_argument("bad page token"))?
        };
        self.requests.lock().push(request);
        let directories = self
            .pages
            .get(index)
            .cloned()
            .ok_or_else(|| Status::out_of_range("no such page"))?;
        let next_page_token = if index + 1 < self.pages.len() {
            (index + 1).to_string()
        } else {
            String::new()
        };
        let page = GetTreeResponse {
            directories,
            next_page_token,
        };
        Ok(Box::pin(stream::iter(vec![Ok(page)])))
    }
}

/// Blobs keyed by digest, streamed back in fixed-size chunks.
pub struct BlobServer {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    chunk_size: usize,
    pub reads: Mutex<Vec<String>>,
}

impl BlobServer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            chunk_size,
            reads: Mutex::new(Vec::new()),
        }
    }

    pub fn put(&self, digest: &Digest, blob: Vec<u8>) {
        self.blobs
            .lock()
            .insert(BytestreamFetcher::resource_name(digest), blob);
    }

    pub fn put_directory(&self, directory: &Directory) -> Digest {
        let digest = digest_of(directory);
        self.put(&digest, directory.encode_to_vec());
        digest
    }
}

#[async_trait]
impl ByteStream for BlobServer {
    async fn read(&self, resource_name: &str) -> Result<ChunkStream, Status> {
        self.reads.lock().push(resource_name.to_string());
        let blob = self
            .blobs
            .lock()
            .get(resource_name)
            .cloned()
            .ok_or_else(|| Status::not_found(resource_name.to_string()))?;
        let chunks: Vec<Result<Vec<u8>, Status>> = blob
            .chunks(self.chunk_size.max(1))
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

pub fn executing_operation(name: &str, target: &str) -> Operation {
    Operation {
        name: name.to_string(),
        metadata: Some(pack(&ExecutingOperationMetadata {
            execute_operation_metadata: Some(ExecuteOperationMetadata {
                stage: ExecutionStage::Executing.to_wire(),
                ..Default::default()
            }),
            request_metadata: Some(RequestMetadata {
                target_id: target.to_string(),
                action_mnemonic: "Javac".to_string(),
                tool_invocation_id: "inv-1".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        })),
        done: false,
        outcome: None,
    }
}

/// An operations registry with scripted unavailability.
pub struct Registry {
    operations: Mutex<Vec<Operation>>,
    /// Listing calls that fail with `UNAVAILABLE` before any succeeds.
    unavailable: Mutex<u32>,
    pub list_calls: Mutex<Vec<ListOperationsRequest>>,
    pub get_calls: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl Registry {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations: Mutex::new(operations),
            unavailable: Mutex::new(0),
            list_calls: Mutex::new(Vec::new()),
            get_calls: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, calls: u32) {
        *self.unavailable.lock() = calls;
    }

    pub fn replace(&self, operations: Vec<Operation>) {
        *self.operations.lock() = operations;
    }
}

#[async_trait]
impl Operations for Registry {
    async fn list_operations(
        &self,
        request: ListOperationsRequest,
    ) -> Result<ListOperationsResponse, Status> {
        self.list_calls.lock().push(request.clone());
        {
            let mut unavailable = self.unavailable.lock();
            if *unavailable > 0 {
                *unavailable -= 1;
                return Err(Status::unavailable("registry restarting"));
            }
        }
        let operations = self.operations.lock();
        let start = request.page_token.parse::<usize>().unwrap_or(0);
        let size = usize::try_from(request.page_size).unwrap_or(0).max(1);
        let end = (start + size).min(operations.len());
        let next_page_token = if end < operations.len() {
            end.to_string()
        } else {
            String::new()
        };
        Ok(ListOperationsResponse {
            operations: operations[start.min(end)..end].to_vec(),
            next_page_token,
        })
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, Status> {
        self.get_calls.lock().push(name.to_string());
        self.operations
            .lock()
            .iter()
            .find(|operation| operation.name == name)
            .cloned()
            .ok_or_else(|| Status::not_found(name.to_string()))
    }

    async fn cancel_operation(&self, name: &str) -> Result<(), Status> {
        self.cancelled.lock().push(name.to_string());
        if self
            .operations
            .lock()
            .iter()
            .any(|operation| operation.name == name && operation.done)
        {
            return Err(Status::unknown("operation already completed"));
        }
        Ok(())
    }
}

pub struct StaticBackplane {
    pub status: Mutex<BackplaneStatus>,
}

impl StaticBackplane {
    pub fn new(status: BackplaneStatus) -> Self {
        Self {
            status: Mutex::new(status),
        }
    }
}

#[async_trait]
impl Backplane for StaticBackplane {
    async fn status(&self, _instance_name: &str) -> Result<BackplaneStatus, Status> {
        Ok(self.status.lock().clone())
    }
}

pub fn profile(name: &str, executing: i32, width: i32) -> WorkerProfileMessage {
    WorkerProfileMessage {
        name: name.to_string(),
        stages: vec![StageInformation {
            name: "ExecuteActionStage".to_string(),
            slots_configured: width,
            slots_used: executing,
            operation_names: Vec::new(),
        }],
        ..Default::default()
    }
}

/// A fleet of workers sharing one table of profiles.
///
/// Workers in `down` refuse every call; workers in `stuck` accept pipeline
/// changes without applying them.
#[derive(Clone, Default)]
pub struct Fleet {
    profiles: Arc<Mutex<HashMap<String, WorkerProfileMessage>>>,
    down: Arc<Mutex<HashSet<String>>>,
    stuck: Arc<Mutex<HashSet<String>>>,
    pub connects: Arc<Mutex<Vec<String>>>,
}

impl Fleet {
    pub fn add(&self, worker: &str, profile: WorkerProfileMessage) {
        self.profiles.lock().insert(worker.to_string(), profile);
    }

    pub fn take_down(&self, worker: &str) {
        self.down.lock().insert(worker.to_string());
    }

    pub fn bring_up(&self, worker: &str) {
        self.down.lock().remove(worker);
    }

    pub fn make_stuck(&self, worker: &str) {
        self.stuck.lock().insert(worker.to_string());
    }
}

impl WorkerConnector for Fleet {
    fn connect(&self, worker: &str) -> Result<Arc<dyn WorkerControl>, ApiError> {
        self.connects.lock().push(worker.to_string());
        Ok(Arc::new(FleetWorker {
            worker: worker.to_string(),
            fleet: self.clone(),
        }))
    }
}

struct FleetWorker {
    worker: String,
    fleet: Fleet,
}

impl FleetWorker {
    fn check_up(&self) -> Result<(), Status> {
        if self.fleet.down.lock().contains(&self.worker) {
            return Err(Status::unavailable("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerControl for FleetWorker {
    async fn profile(&self) -> Result<WorkerProfileMessage, Status> {
        self.check_up()?;
        self.fleet
            .profiles
            .lock()
            .get(&self.worker)
            .cloned()
            .ok_or_else(|| Status::not_found(self.worker.clone()))
    }

    async fn pipeline_change(&self, changes: Vec<PipelineChange>) -> Result<(), Status> {
        self.check_up()?;
        if self.fleet.stuck.lock().contains(&self.worker) {
            return Ok(());
        }
        let mut profiles = self.fleet.profiles.lock();
        let profile = profiles
            .get_mut(&self.worker)
            .ok_or_else(|| Status::not_found(self.worker.clone()))?;
        for change in changes.into_iter().filter(|change| change.width > 0) {
            if let Some(stage) = profile.stages.iter_mut().find(|s| s.name == change.stage) {
                stage.slots_configured = change.width;
            }
        }
        Ok(())
    }
}
