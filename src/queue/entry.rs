//! Queue entry envelopes
//!
//! The prequeue holds JSON `ExecuteEntry` records; the operation queues hold
//! JSON `QueueEntry` records wrapping one. Both reduce to a [`QueuedOperation`].

use crate::error::QueueError;
use crate::proto::remote_execution::RequestMetadata;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteEntry {
    pub operation_name: String,
    pub request_metadata: Option<RequestMetadata>,
    pub skip_cache_lookup: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueEntry {
    pub execute_entry: Option<ExecuteEntry>,
    pub requeue_attempts: i32,
}

/// Operation named by a queue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOperation {
    pub name: String,
    pub request_metadata: Option<RequestMetadata>,
}

impl From<ExecuteEntry> for QueuedOperation {
    fn from(entry: ExecuteEntry) -> Self {
        Self {
            name: entry.operation_name,
            request_metadata: entry.request_metadata,
        }
    }
}

/// Which envelope a queue holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Prequeue,
    Queue,
}

impl EntryKind {
    pub fn decode(self, raw: &str) -> Result<QueuedOperation, QueueError> {
        match self {
            EntryKind::Prequeue => parse_prequeue_entry(raw),
            EntryKind::Queue => parse_queue_entry(raw),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EntryKind::Prequeue => "prequeue",
            EntryKind::Queue => "queue",
        }
    }
}

fn malformed(raw: &str, reason: impl ToString) -> QueueError {
    QueueError::MalformedEntry {
        entry: raw.to_string(),
        reason: reason.to_string(),
    }
}

pub fn parse_prequeue_entry(raw: &str) -> Result<QueuedOperation, QueueError> {
    let entry: ExecuteEntry = serde_json::from_str(raw).map_err(|e| malformed(raw, e))?;
    if entry.operation_name.is_empty() {
        return Err(malformed(raw, "entry names no operation"));
    }
    Ok(entry.into())
}

pub fn parse_queue_entry(raw: &str) -> Result<QueuedOperation, QueueError> {
    let entry: QueueEntry = serde_json::from_str(raw).map_err(|e| malformed(raw, e))?;
    let execute_entry = entry
        .execute_entry
        .filter(|e| !e.operation_name.is_empty())
        .ok_or_else(|| malformed(raw, "entry names no operation"))?;
    Ok(execute_entry.into())
}
