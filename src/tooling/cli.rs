//! CLI Tooling
//!
//! Command-line interface over the library. Every command connects what it
//! needs, runs to completion on a private runtime, and returns the text to
//! print.

use crate::cas::{BytestreamFetcher, TreeFetcher, TreeWalk};
use crate::config::{BfscopeConfig, ConfigLoader};
use crate::digest::Digest;
use crate::error::{ApiError, RpcError};
use crate::logging::init_logging;
use crate::monitor::{Monitor, Snapshot};
use crate::operation::{executed_action_metadata, ExecutionTimeline, OperationSummary};
use crate::poller::{ListingSource, OperationPoller, PollOutcome};
use crate::proto::buildfarm::PipelineChange;
use crate::queue::{EntryKind, ShardedQueue};
use crate::rpc::{self, GrpcClient, GrpcWorkerConnector, Operations};
use crate::status::{queue_names, StatusSampler};
use crate::store::{MemoryStore, StoreBackend, UnifiedStore};
use crate::tooling::format::{
    format_blob, format_history, format_operation_detail, format_operations, format_profile,
    format_section_heading, format_status_text, format_tree, format_workers,
};
use crate::workers::{WorkerProber, WorkerSort};
use clap::{Parser, Subcommand, ValueEnum};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// bfscope - inspect a Buildfarm backplane
#[derive(Parser)]
#[command(name = "bfscope")]
#[command(about = "Inspect queues, operations, workers and CAS content of a Buildfarm cluster")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backplane store address, `host:port`
    #[arg(long)]
    pub redis_host: Option<String>,

    /// Remote execution API endpoint
    #[arg(long)]
    pub reapi_host: Option<String>,

    /// Remote execution instance name
    #[arg(long)]
    pub instance: Option<String>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Layer command-line flags over loaded configuration.
    pub fn apply_overrides(&self, config: &mut BfscopeConfig) {
        if let Some(host) = &self.redis_host {
            config.backplane.redis_host = host.clone();
        }
        if let Some(host) = &self.reapi_host {
            config.backplane.reapi_host = host.clone();
        }
        if let Some(instance) = &self.instance {
            config.backplane.instance_name = instance.clone();
        }
        if self.verbose && self.log_level.is_none() {
            config.logging.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.logging.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show backplane queue sizes and active workers
    Status {
        /// Sample for this many buckets and print the size history
        #[arg(long)]
        history: Option<u32>,
    },
    /// Total length of a sharded queue across every store shard
    QueueLength {
        /// Queue name, e.g. `{Execution}:QueuedOperations`
        name: String,
    },
    /// List the head of the prequeue or the operation queues
    Queue {
        #[arg(value_enum)]
        kind: QueueArg,
    },
    /// List dispatched operations
    Dispatched {
        /// Ask the operations registry instead of scanning the dispatched hash
        #[arg(long)]
        registry: bool,
    },
    /// Print a directory tree from the CAS
    Tree {
        /// Root digest, `[function/]hash/size`
        digest: String,
        /// Walk the tree blob by blob over the bytestream instead of GetTree
        #[arg(long)]
        walk: bool,
    },
    /// Print a blob from the CAS
    Blob {
        /// Blob digest, `[function/]hash/size`
        digest: String,
        /// Always hex-dump, even if the blob is text
        #[arg(long)]
        hex: bool,
    },
    /// Poll the operations registry
    Operations {
        /// Registry collection under the instance
        #[arg(long, default_value = "executions")]
        resource: String,
        /// Listing filter
        #[arg(long, default_value = "")]
        filter: String,
        /// Ticks to run; 0 runs until interrupted and prints every tick
        #[arg(long, default_value = "1")]
        ticks: u64,
    },
    /// Show one operation with its execution timeline
    Operation {
        name: String,
    },
    /// Cancel an operation
    Cancel {
        operation: String,
    },
    /// Probe every active execute worker
    Workers {
        #[arg(long, value_enum, default_value = "name")]
        sort: SortArg,
    },
    /// Change a worker pipeline stage and read the profile back
    Pipeline {
        /// Worker address, `host:port`
        worker: String,
        /// Stage name, e.g. `ExecuteActionStage`
        stage: String,
        /// Pause the stage
        #[arg(long)]
        paused: bool,
        /// New slot width; 0 leaves it unchanged
        #[arg(long, default_value = "0")]
        width: i32,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QueueArg {
    Prequeue,
    Queue,
}

impl From<QueueArg> for EntryKind {
    fn from(arg: QueueArg) -> Self {
        match arg {
            QueueArg::Prequeue => EntryKind::Prequeue,
            QueueArg::Queue => EntryKind::Queue,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortArg {
    Name,
    Executions,
}

impl From<SortArg> for WorkerSort {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => WorkerSort::Name,
            SortArg::Executions => WorkerSort::Executions,
        }
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Status { .. } => "status",
        Commands::QueueLength { .. } => "queue-length",
        Commands::Queue { .. } => "queue",
        Commands::Dispatched { .. } => "dispatched",
        Commands::Tree { .. } => "tree",
        Commands::Blob { .. } => "blob",
        Commands::Operations { .. } => "operations",
        Commands::Operation { .. } => "operation",
        Commands::Cancel { .. } => "cancel",
        Commands::Workers { .. } => "workers",
        Commands::Pipeline { .. } => "pipeline",
    }
}

/// CLI context holding configuration and the runtime commands run on
pub struct CliContext {
    config: BfscopeConfig,
    runtime: Runtime,
}

impl CliContext {
    /// Load configuration, apply `cli` flags and install logging.
    pub fn from_cli(cli: &Cli) -> Result<Self, ApiError> {
        let mut config = ConfigLoader::load_with(cli.config.as_deref())?;
        cli.apply_overrides(&mut config);
        init_logging(Some(&config.logging))?;
        Self::new(config)
    }

    /// Create a new CLI context
    pub fn new(config: BfscopeConfig) -> Result<Self, ApiError> {
        config.validate()?;
        Ok(Self {
            config,
            runtime: Runtime::new()?,
        })
    }

    pub fn config(&self) -> &BfscopeConfig {
        &self.config
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let started = Instant::now();
        let name = command_name(command);
        info!(command = name, "Running command");
        let result = self.runtime.block_on(self.execute_inner(command));
        match &result {
            Ok(_) => debug!(
                command = name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Command finished"
            ),
            Err(e) => warn!(command = name, class = ?e.class(), error = %e, "Command failed"),
        }
        result
    }

    async fn execute_inner(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Status { history } => self.status(*history).await,
            Commands::QueueLength { name } => {
                let store = self.store().await?;
                let queue = ShardedQueue::discover(store.as_ref(), name).await?;
                let length = queue.length(store.as_ref()).await?;
                Ok(format!(
                    "{}: {} ({} shards)",
                    queue.name(),
                    length,
                    queue.shards().len()
                ))
            }
            Commands::Queue { kind } => self.queue((*kind).into()).await,
            Commands::Dispatched { registry } => {
                let source = if *registry {
                    ListingSource::registry("executions", "status=dispatched")
                } else {
                    ListingSource::Dispatched {
                        key: self.config.backplane.dispatched_key.clone(),
                    }
                };
                let store: Arc<dyn StoreBackend> = if *registry {
                    Arc::new(MemoryStore::new())
                } else {
                    self.store().await?
                };
                self.list_once(store, source).await
            }
            Commands::Tree { digest, walk } => {
                let root: Digest = digest.parse()?;
                let client = self.client().await?;
                let directories = if *walk {
                    let mut tree = TreeWalk::new(root.clone());
                    tree.resolve(&BytestreamFetcher::new(client)).await?;
                    tree.into_directories()
                } else {
                    TreeFetcher::new(client)
                        .with_instance_name(self.config.backplane.instance_name.clone())
                        .with_page_size(self.config.poller.page_size)
                        .get_tree(&root)
                        .await?
                };
                Ok(format_tree(&root, &directories)?)
            }
            Commands::Blob { digest, hex } => {
                let digest: Digest = digest.parse()?;
                let fetcher = BytestreamFetcher::new(self.client().await?);
                let blob = fetcher.fetch_bytes(&digest).await?;
                Ok(format_blob(&digest, &blob, *hex))
            }
            Commands::Operations {
                resource,
                filter,
                ticks,
            } => self.operations(resource, filter, *ticks).await,
            Commands::Operation { name } => {
                let client = self.client().await?;
                let operation = client
                    .get_operation(name)
                    .await
                    .map_err(|status| RpcError::new("GetOperation", status))?;
                let summary = OperationSummary::from_operation(&operation);
                let timeline =
                    executed_action_metadata(&operation).map(|m| ExecutionTimeline::from_metadata(&m));
                Ok(format_operation_detail(&summary, timeline.as_ref()))
            }
            Commands::Cancel { operation } => {
                let client = self.client().await?;
                rpc::cancel(client.as_ref(), operation)
                    .await
                    .map_err(|status| RpcError::new("CancelOperation", status))?;
                Ok(format!("Cancelled {}", operation))
            }
            Commands::Workers { sort } => {
                let client = self.client().await?;
                let mut sampler =
                    StatusSampler::new(client, self.config.backplane.instance_name.clone());
                let workers = sampler.sample().await?.execute_workers().to_vec();
                let mut prober = self.prober();
                prober.probe(&workers).await;
                Ok(format_workers(&prober.workers((*sort).into())))
            }
            Commands::Pipeline {
                worker,
                stage,
                paused,
                width,
            } => {
                let change = PipelineChange {
                    stage: stage.clone(),
                    paused: *paused,
                    width: *width,
                };
                let outcome = self
                    .prober()
                    .pipeline_change(worker, vec![change])
                    .await?;
                let mut output = format_profile(worker, &outcome.profile);
                if !outcome.unconfirmed.is_empty() {
                    output.push_str(&format!(
                        "\nwidth not confirmed for: {}\n",
                        outcome.unconfirmed.join(", ")
                    ));
                }
                Ok(output)
            }
        }
    }

    async fn store(&self) -> Result<Arc<UnifiedStore>, ApiError> {
        let store = UnifiedStore::connect(&self.config.backplane).await?;
        debug!(address = store.address(), mode = ?store.mode(), "Connected to backplane store");
        Ok(Arc::new(store))
    }

    async fn client(&self) -> Result<Arc<GrpcClient>, ApiError> {
        let backplane = &self.config.backplane;
        let client = GrpcClient::connect(&backplane.reapi_host, backplane.ca_file.as_deref()).await?;
        Ok(Arc::new(client))
    }

    fn prober(&self) -> WorkerProber {
        let settings = &self.config.workers;
        WorkerProber::new(
            Arc::new(GrpcWorkerConnector::new(self.config.backplane.ca_file.clone())),
            settings.deadline(),
            settings.concurrency,
        )
    }

    async fn status(&self, buckets: Option<u32>) -> Result<String, ApiError> {
        let client = self.client().await?;
        let mut sampler = StatusSampler::new(client, self.config.backplane.instance_name.clone());
        let status = sampler.sample().await?.clone();
        let mut output = format_status_text(&status, sampler.latency());

        if let Some(buckets) = buckets.filter(|b| *b > 0) {
            let mut interval = tokio::time::interval(self.config.monitor.tick_interval());
            let deadline = Instant::now() + crate::status::DEFAULT_BUCKET * buckets;
            while Instant::now() < deadline {
                interval.tick().await;
                sampler.sample().await?;
            }
            let history: Vec<_> = sampler.history().copied().collect();
            output.push_str(&format!("\n{}\n", format_section_heading("History")));
            output.push_str(&format_history(&history));
        }
        Ok(output)
    }

    async fn queue(&self, kind: EntryKind) -> Result<String, ApiError> {
        let client = self.client().await?;
        let store = self.store().await?;
        let mut sampler = StatusSampler::new(client, self.config.backplane.instance_name.clone());
        let names = queue_names(sampler.sample().await?, kind);

        let mut queues = Vec::with_capacity(names.len());
        for name in &names {
            queues.push(ShardedQueue::discover(store.as_ref(), name).await?);
        }
        info!(kind = kind.label(), queues = queues.len(), "Listing queue heads");
        self.list_once(store, ListingSource::Queues { queues, kind })
            .await
    }

    /// One listing cycle from `source`, rendered.
    async fn list_once(
        &self,
        store: Arc<dyn StoreBackend>,
        source: ListingSource,
    ) -> Result<String, ApiError> {
        let operations: Arc<dyn Operations> = self.client().await?;
        let mut poller = OperationPoller::new(
            operations,
            store,
            self.config.backplane.instance_name.clone(),
            source,
            self.config.poller.clone(),
        );
        match poller.poll().await? {
            PollOutcome::Polled(report) => {
                let mut output = format_operations(&report.summaries);
                if !report.failed.is_empty() {
                    output.push_str(&format!("\n{} could not be fetched\n", report.failed.len()));
                }
                Ok(output)
            }
            PollOutcome::Skipped { .. } => Ok(String::new()),
        }
    }

    async fn operations(&self, resource: &str, filter: &str, ticks: u64) -> Result<String, ApiError> {
        let client = self.client().await?;
        let instance = self.config.backplane.instance_name.clone();
        // Registry listings never read the backplane store.
        let poller = OperationPoller::new(
            client.clone(),
            Arc::new(MemoryStore::new()),
            instance.clone(),
            ListingSource::registry(resource, filter),
            self.config.poller.clone(),
        );
        let prober = self.config.workers.enabled.then(|| self.prober());
        let mut monitor = Monitor::new(
            StatusSampler::new(client, instance),
            poller,
            prober,
            self.config.monitor.tick_interval(),
        );

        let mut last = None;
        let streaming = ticks == 0;
        monitor
            .run((!streaming).then_some(ticks), |snapshot| {
                if streaming {
                    println!("{}", format_snapshot(&snapshot));
                } else {
                    last = Some(snapshot);
                }
                ControlFlow::Continue(())
            })
            .await?;
        Ok(last.map(|s| format_snapshot(&s)).unwrap_or_default())
    }
}

fn format_snapshot(snapshot: &Snapshot) -> String {
    let mut output = String::new();
    if let Some(status) = &snapshot.status {
        output.push_str(&format_status_text(status, snapshot.status_latency));
        output.push('\n');
    }
    if !snapshot.workers.is_empty() {
        output.push_str(&format_workers(&snapshot.workers));
        output.push('\n');
    }
    output.push_str(&format!(
        "{} tick {}{}\n",
        format_section_heading("Operations"),
        snapshot.tick,
        if snapshot.polled { "" } else { " (backing off)" }
    ));
    output.push_str(&format_operations(&snapshot.operations));
    output
}
