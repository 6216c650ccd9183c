//! Error types
//!
//! Each layer owns a `thiserror` enum. Every error reports an [`ErrorClass`] so
//! callers can tell a transient fault (retry later) from malformed data (skip the
//! item) from a configuration problem or a fatal condition (stop).

use crate::digest::DigestFunction;
use thiserror::Error;

/// Coarse classification shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The remote was momentarily unreachable; the same call may succeed later.
    Transient,
    /// A payload could not be parsed or failed verification.
    Malformed,
    /// Local setup is wrong: unsupported algorithm, unreachable topology, bad config.
    Configuration,
    /// Anything else. Propagated to the caller.
    Fatal,
}

/// Digest parsing and hashing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("no hash constructor registered for {0}")]
    UnsupportedAlgorithm(DigestFunction),

    #[error("unknown digest algorithm in `{raw}`")]
    UnknownAlgorithm { raw: String },

    #[error("malformed digest `{raw}`: {reason}")]
    Malformed { raw: String, reason: String },
}

impl DigestError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DigestError::UnsupportedAlgorithm(_) => ErrorClass::Configuration,
            DigestError::UnknownAlgorithm { .. } | DigestError::Malformed { .. } => {
                ErrorClass::Malformed
            }
        }
    }
}

/// A failed remote procedure call, tagged with the method that failed.
#[derive(Debug, Error)]
#[error("{method} failed: {status}")]
pub struct RpcError {
    pub method: &'static str,
    #[source]
    pub status: tonic::Status,
}

impl RpcError {
    pub fn new(method: &'static str, status: tonic::Status) -> Self {
        Self { method, status }
    }

    /// Only `UNAVAILABLE` is considered worth retrying.
    pub fn is_transient(&self) -> bool {
        self.status.code() == tonic::Code::Unavailable
    }

    pub fn class(&self) -> ErrorClass {
        if self.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Fatal
        }
    }
}

/// Errors raised while fetching blobs or trees from the content-addressable store.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("blob {digest} ended after {received} of {expected} bytes")]
    IncompleteBlob {
        digest: String,
        expected: i64,
        received: u64,
    },

    #[error("blob {digest} exceeded its declared size of {expected} bytes")]
    OversizedBlob { digest: String, expected: i64 },

    #[error("blob {digest} could not be decoded: {source}")]
    MalformedBlob {
        digest: String,
        #[source]
        source: prost::DecodeError,
    },

    #[error("content for {expected} hashed to {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("tree is missing directory {digest}")]
    MissingDirectory { digest: String },
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::Rpc(e) => e.class(),
            FetchError::Digest(e) => e.class(),
            FetchError::IncompleteBlob { .. } | FetchError::OversizedBlob { .. } => {
                ErrorClass::Transient
            }
            FetchError::MalformedBlob { .. }
            | FetchError::DigestMismatch { .. }
            | FetchError::MissingDirectory { .. } => ErrorClass::Malformed,
        }
    }
}

/// Errors raised by the backplane key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backplane store request failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("backplane store at {address} is unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("unexpected shard topology reply: {0}")]
    Topology(String),
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::Redis(e)
                if e.is_timeout()
                    || e.is_connection_dropped()
                    || e.is_io_error()
                    || e.is_connection_refusal() =>
            {
                ErrorClass::Transient
            }
            StoreError::Redis(_) => ErrorClass::Fatal,
            StoreError::Unreachable { .. } | StoreError::Topology(_) => ErrorClass::Configuration,
        }
    }
}

/// Errors raised by the sharded queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no key for queue `{name}` hashes into slots {ranges}")]
    SlotUnreachable { name: String, ranges: String },

    #[error("malformed queue entry `{entry}`: {reason}")]
    MalformedEntry { entry: String, reason: String },
}

impl QueueError {
    pub fn class(&self) -> ErrorClass {
        match self {
            QueueError::Store(e) => e.class(),
            QueueError::SlotUnreachable { .. } => ErrorClass::Configuration,
            QueueError::MalformedEntry { .. } => ErrorClass::Malformed,
        }
    }
}

/// Errors raised by the operation poller.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: RpcError,
    },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PollError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PollError::RetriesExhausted { .. } => ErrorClass::Fatal,
            PollError::Rpc(e) => e.class(),
            PollError::Queue(e) => e.class(),
            PollError::Store(e) => e.class(),
        }
    }
}

/// Top-level error surfaced by the CLI and the monitor loop.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Digest(e) => e.class(),
            ApiError::Rpc(e) => e.class(),
            ApiError::Fetch(e) => e.class(),
            ApiError::Store(e) => e.class(),
            ApiError::Queue(e) => e.class(),
            ApiError::Poll(e) => e.class(),
            ApiError::ConfigError(_) | ApiError::ConfigLoad(_) | ApiError::ConnectionError(_) => {
                ErrorClass::Configuration
            }
            ApiError::Io(_) => ErrorClass::Fatal,
        }
    }
}
