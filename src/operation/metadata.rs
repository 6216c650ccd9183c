//! Operation metadata decoding
//!
//! An operation's metadata is an `Any` holding one of four message shapes. They
//! are tried in a fixed order and the first match wins. A payload matching
//! none of them, or failing to decode, is kept as `Undecodable` so one odd
//! operation never fails a listing.

use crate::proto::buildfarm::{
    CompletedOperationMetadata, ExecutingOperationMetadata, QueuedOperationMetadata,
};
use crate::proto::remote_execution::{ExecuteOperationMetadata, RequestMetadata};
use crate::proto::unpack;
use prost_types::Any;

/// Stage classification of an operation's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StageKind {
    Queued,
    Executing,
    Completed,
    #[default]
    Generic,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Queued => "queued",
            StageKind::Executing => "executing",
            StageKind::Completed => "completed",
            StageKind::Generic => "generic",
        }
    }
}

/// Decoded operation metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMetadata {
    Generic(ExecuteOperationMetadata),
    Queued(QueuedOperationMetadata),
    Executing(ExecutingOperationMetadata),
    Completed(CompletedOperationMetadata),
    Undecodable { type_url: String, reason: String },
}

impl DecodedMetadata {
    pub fn stage_kind(&self) -> StageKind {
        match self {
            DecodedMetadata::Queued(_) => StageKind::Queued,
            DecodedMetadata::Executing(_) => StageKind::Executing,
            DecodedMetadata::Completed(_) => StageKind::Completed,
            DecodedMetadata::Generic(_) | DecodedMetadata::Undecodable { .. } => {
                StageKind::Generic
            }
        }
    }

    pub fn is_decoded(&self) -> bool {
        !matches!(self, DecodedMetadata::Undecodable { .. })
    }

    /// The embedded execute metadata, whichever shape carried it.
    pub fn execute_metadata(&self) -> Option<&ExecuteOperationMetadata> {
        match self {
            DecodedMetadata::Generic(em) => Some(em),
            DecodedMetadata::Queued(qm) => qm.execute_operation_metadata.as_ref(),
            DecodedMetadata::Executing(xm) => xm.execute_operation_metadata.as_ref(),
            DecodedMetadata::Completed(cm) => cm.execute_operation_metadata.as_ref(),
            DecodedMetadata::Undecodable { .. } => None,
        }
    }

    /// Request metadata, present on every shape except the generic one.
    pub fn request_metadata(&self) -> Option<&RequestMetadata> {
        match self {
            DecodedMetadata::Queued(qm) => qm.request_metadata.as_ref(),
            DecodedMetadata::Executing(xm) => xm.request_metadata.as_ref(),
            DecodedMetadata::Completed(cm) => cm.request_metadata.as_ref(),
            DecodedMetadata::Generic(_) | DecodedMetadata::Undecodable { .. } => None,
        }
    }
}

/// Classify `metadata` into exactly one [`DecodedMetadata`] variant.
pub fn decode_metadata(metadata: Option<&Any>) -> DecodedMetadata {
    let Some(any) = metadata else {
        return DecodedMetadata::Undecodable {
            type_url: String::new(),
            reason: "operation carries no metadata".to_string(),
        };
    };
    let undecodable = |e: prost::DecodeError| DecodedMetadata::Undecodable {
        type_url: any.type_url.clone(),
        reason: e.to_string(),
    };

    if let Some(decoded) = unpack::<ExecuteOperationMetadata>(any) {
        return decoded.map_or_else(undecodable, DecodedMetadata::Generic);
    }
    if let Some(decoded) = unpack::<QueuedOperationMetadata>(any) {
        return decoded.map_or_else(undecodable, DecodedMetadata::Queued);
    }
    if let Some(decoded) = unpack::<ExecutingOperationMetadata>(any) {
        return decoded.map_or_else(undecodable, DecodedMetadata::Executing);
    }
    if let Some(decoded) = unpack::<CompletedOperationMetadata>(any) {
        return decoded.map_or_else(undecodable, DecodedMetadata::Completed);
    }
    DecodedMetadata::Undecodable {
        type_url: any.type_url.clone(),
        reason: "unrecognized metadata type".to_string(),
    }
}
