//! Configuration
//!
//! Settings are layered by the `config` crate: built-in defaults, then an
//! optional TOML file, then `BFSCOPE__*` environment variables. See
//! [`ConfigLoader`] for the entry points.

mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfscopeConfig {
    pub backplane: BackplaneConfig,
    pub poller: PollerConfig,
    pub workers: WorkerProbeConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

impl BfscopeConfig {
    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.backplane.redis_host.is_empty() {
            return Err(ApiError::ConfigError("backplane.redis_host is empty".to_string()));
        }
        if self.backplane.reapi_host.is_empty() {
            return Err(ApiError::ConfigError("backplane.reapi_host is empty".to_string()));
        }
        if self.poller.page_size <= 0 {
            return Err(ApiError::ConfigError(format!(
                "poller.page_size must be positive, got {}",
                self.poller.page_size
            )));
        }
        if self.poller.retry_attempts == 0 {
            return Err(ApiError::ConfigError(
                "poller.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.poller.queue_slice_limit <= 0 {
            return Err(ApiError::ConfigError(format!(
                "poller.queue_slice_limit must be positive, got {}",
                self.poller.queue_slice_limit
            )));
        }
        if let Some(ca) = &self.backplane.ca_file {
            if !ca.exists() {
                return Err(ApiError::ConfigError(format!(
                    "backplane.ca_file {:?} does not exist",
                    ca
                )));
            }
        }
        Ok(())
    }
}

/// Where the backplane lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackplaneConfig {
    /// Store address, `host[:port]`; the port defaults to 6379.
    pub redis_host: String,
    /// Remote-execution endpoint. `grpcs://` selects TLS.
    pub reapi_host: String,
    pub instance_name: String,
    /// PEM bundle trusted for TLS endpoints instead of the web PKI roots.
    pub ca_file: Option<PathBuf>,
    /// Dial, read and write timeout for the store.
    pub store_timeout_ms: u64,
    /// Key of the dispatched-operations hash.
    pub dispatched_key: String,
}

impl BackplaneConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            redis_host: "localhost:6379".to_string(),
            reapi_host: "localhost:8980".to_string(),
            instance_name: "shard".to_string(),
            ca_file: None,
            store_timeout_ms: 1000,
            dispatched_key: "DispatchedOperations".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub page_size: i32,
    /// Listing attempts per page while the registry is unavailable.
    pub retry_attempts: u32,
    pub cache_capacity: usize,
    pub stall_ceiling_max: u32,
    /// Concurrent single-operation fetches per tick.
    pub fetch_concurrency: usize,
    /// Entries read from the head of queue and dispatched listings.
    pub queue_slice_limit: i64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            retry_attempts: 5,
            cache_capacity: 10_000,
            stall_ceiling_max: 256,
            fetch_concurrency: 32,
            queue_slice_limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerProbeConfig {
    pub enabled: bool,
    pub deadline_ms: u64,
    pub concurrency: usize,
}

impl WorkerProbeConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for WorkerProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deadline_ms: 30,
            concurrency: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_interval_ms: u64,
}

impl MonitorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
        }
    }
}
