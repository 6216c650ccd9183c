//! Whole-blob reads over the bytestream API

use crate::digest::Digest;
use crate::error::{FetchError, RpcError};
use crate::rpc::ByteStream;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads complete blobs by digest and optionally decodes them as messages.
#[derive(Clone)]
pub struct BytestreamFetcher {
    bytestream: Arc<dyn ByteStream>,
}

impl BytestreamFetcher {
    pub fn new(bytestream: Arc<dyn ByteStream>) -> Self {
        Self { bytestream }
    }

    /// Bytestream resource for `digest`.
    pub fn resource_name(digest: &Digest) -> String {
        format!("/blobs/{}", digest)
    }

    /// Read the blob, returning as soon as the declared size has arrived.
    pub async fn fetch_bytes(&self, digest: &Digest) -> Result<Vec<u8>, FetchError> {
        let resource_name = Self::resource_name(digest);
        let expected = digest.size_bytes();
        let mut chunks = self
            .bytestream
            .read(&resource_name)
            .await
            .map_err(|status| RpcError::new("Read", status))?;

        let mut blob = Vec::new();
        if expected == 0 {
            return Ok(blob);
        }
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|status| RpcError::new("Read", status))?;
            blob.extend_from_slice(&chunk);
            let received = blob.len() as i64;
            if received == expected {
                debug!(resource = %resource_name, bytes = received, "Blob read");
                return Ok(blob);
            }
            if received > expected {
                warn!(resource = %resource_name, expected, received, "Blob overran declared size");
                return Err(FetchError::OversizedBlob {
                    digest: digest.to_string(),
                    expected,
                });
            }
        }

        Err(FetchError::IncompleteBlob {
            digest: digest.to_string(),
            expected,
            received: blob.len() as u64,
        })
    }

    /// Read the blob and decode it as `M`.
    pub async fn fetch<M>(&self, digest: &Digest) -> Result<M, FetchError>
    where
        M: prost::Message + Default,
    {
        let blob = self.fetch_bytes(digest).await?;
        M::decode(blob.as_slice()).map_err(|source| FetchError::MalformedBlob {
            digest: digest.to_string(),
            source,
        })
    }
}
