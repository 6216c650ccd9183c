//! bfscope: Buildfarm Backplane Inspection
//!
//! A client library for observing a Buildfarm cluster: content-addressed
//! digests and directory trees, the sharded queues in the backplane store,
//! long-running operations with their decoded metadata, and worker pipeline
//! profiles. A [`monitor::Monitor`] drives all of them on a fixed tick.

pub mod cas;
pub mod concurrency;
pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod operation;
pub mod poller;
pub mod proto;
pub mod queue;
pub mod rpc;
pub mod status;
pub mod store;
pub mod tooling;
pub mod types;
pub mod workers;
