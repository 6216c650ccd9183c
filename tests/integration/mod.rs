//! Integration tests for the bfscope client library

mod cancel_semantics;
mod digest_verification;
mod operation_polling;
mod queue_sharding;
mod support;
mod tree_resolution;
mod worker_probing;
