//! Channel construction
//!
//! Targets are `host:port` for plaintext or `grpcs://host[:port]` for TLS. TLS
//! verifies against a CA file when one is configured, else the bundled web PKI
//! roots.

use crate::error::ApiError;
use std::path::Path;
use std::time::Duration;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

const TLS_SCHEME: &str = "grpcs://";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build an endpoint for `target` without dialing it.
pub fn endpoint(target: &str, ca_file: Option<&Path>) -> Result<Endpoint, ApiError> {
    let invalid = |e: tonic::transport::Error| {
        ApiError::ConnectionError(format!("Invalid target {}: {}", target, e))
    };

    let endpoint = match target.strip_prefix(TLS_SCHEME) {
        Some(authority) => {
            let authority = if authority.contains(':') {
                authority.to_string()
            } else {
                format!("{}:443", authority)
            };
            let tls = match ca_file {
                Some(path) => {
                    let pem = std::fs::read(path).map_err(|e| {
                        ApiError::ConfigError(format!(
                            "Failed to read CA file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem))
                }
                None => ClientTlsConfig::new().with_webpki_roots(),
            };
            Channel::from_shared(format!("https://{}", authority))
                .map_err(|e| ApiError::ConnectionError(format!("Invalid target {}: {}", target, e)))?
                .tls_config(tls)
                .map_err(invalid)?
        }
        None => Channel::from_shared(format!("http://{}", target))
            .map_err(|e| ApiError::ConnectionError(format!("Invalid target {}: {}", target, e)))?,
    };

    Ok(endpoint.connect_timeout(CONNECT_TIMEOUT))
}

/// Dial `target` and wait for the connection.
pub async fn connect(target: &str, ca_file: Option<&Path>) -> Result<Channel, ApiError> {
    debug!(target, "Connecting");
    endpoint(target, ca_file)?
        .connect()
        .await
        .map_err(|e| ApiError::ConnectionError(format!("Failed to connect to {}: {}", target, e)))
}

/// Channel that dials on first use.
pub fn connect_lazy(target: &str, ca_file: Option<&Path>) -> Result<Channel, ApiError> {
    Ok(endpoint(target, ca_file)?.connect_lazy())
}
