//! Single-node or clustered store behind one client
//!
//! Connecting probes for cluster mode first and falls back to a single node if
//! the probe fails. Every command is issued with `redis::cmd` so the two
//! connection kinds share one code path.

use super::{ShardSlots, StoreBackend};
use crate::config::BackplaneConfig;
use crate::error::StoreError;
use crate::types::SlotRange;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{AsyncConnectionConfig, Cmd, FromRedisValue, Value};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_PORT: u16 = 6379;

/// Topology the client settled on at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Single,
    Cluster,
}

#[derive(Clone)]
enum Connection {
    Single(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// Store client serving either topology.
#[derive(Clone)]
pub struct UnifiedStore {
    address: String,
    connection: Connection,
}

impl UnifiedStore {
    /// Connect to the store configured in `config`.
    pub async fn connect(config: &BackplaneConfig) -> Result<Self, StoreError> {
        Self::connect_to(&config.redis_host, config.store_timeout()).await
    }

    /// Connect to `host[:port]`, trying cluster mode before a single node.
    pub async fn connect_to(host: &str, timeout: Duration) -> Result<Self, StoreError> {
        let address = with_default_port(host);
        let url = format!("redis://{}", address);

        match Self::probe_cluster(&url, timeout).await {
            Ok(connection) => {
                info!(address = %address, "Connected to clustered backplane store");
                return Ok(Self {
                    address,
                    connection: Connection::Cluster(connection),
                });
            }
            Err(e) => {
                debug!(address = %address, error = %e, "Cluster probe failed, using single node");
            }
        }

        let unreachable = |e: redis::RedisError| StoreError::Unreachable {
            address: address.clone(),
            reason: e.to_string(),
        };
        let client = redis::Client::open(url.as_str()).map_err(unreachable)?;
        let connection = client
            .get_multiplexed_async_connection_with_config(&connection_config(timeout))
            .await
            .map_err(unreachable)?;
        info!(address = %address, "Connected to single-node backplane store");
        Ok(Self {
            address,
            connection: Connection::Single(connection),
        })
    }

    async fn probe_cluster(url: &str, timeout: Duration) -> Result<ClusterConnection, StoreError> {
        let client = ClusterClient::builder(vec![url.to_string()])
            .connection_timeout(timeout)
            .response_timeout(timeout)
            .build()?;
        let mut connection = client.get_async_connection().await?;
        let _: String = redis::cmd("CLUSTER")
            .arg("INFO")
            .query_async(&mut connection)
            .await?;
        Ok(connection)
    }

    pub fn mode(&self) -> StoreMode {
        match self.connection {
            Connection::Single(_) => StoreMode::Single,
            Connection::Cluster(_) => StoreMode::Cluster,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, StoreError> {
        let value = match &self.connection {
            Connection::Single(connection) => cmd.query_async(&mut connection.clone()).await?,
            Connection::Cluster(connection) => cmd.query_async(&mut connection.clone()).await?,
        };
        Ok(value)
    }
}

/// Same bound for dialing and for each response.
fn connection_config(timeout: Duration) -> AsyncConnectionConfig {
    AsyncConnectionConfig::new()
        .set_connection_timeout(timeout)
        .set_response_timeout(timeout)
}

#[async_trait]
impl StoreBackend for UnifiedStore {
    async fn llen(&self, key: &str) -> Result<i64, StoreError> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn zcard(&self, key: &str) -> Result<i64, StoreError> {
        self.query(redis::cmd("ZCARD").arg(key)).await
    }

    async fn hlen(&self, key: &str) -> Result<i64, StoreError> {
        self.query(redis::cmd("HLEN").arg(key)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.query(redis::cmd("ZRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> Result<(Vec<String>, u64), StoreError> {
        let mut cmd = redis::cmd("HSCAN");
        cmd.arg(key).arg(cursor);
        if let Some(pattern) = pattern {
            cmd.arg("MATCH").arg(pattern);
        }
        cmd.arg("COUNT").arg(count);
        let (next, page): (u64, Vec<String>) = self.query(&cmd).await?;
        Ok((page, next))
    }

    async fn cluster_shards(&self) -> Result<Vec<ShardSlots>, StoreError> {
        let reply: Value = self.query(redis::cmd("CLUSTER").arg("SHARDS")).await?;
        parse_cluster_shards(&reply)
    }
}

fn with_default_port(host: &str) -> String {
    if host.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        host.to_string()
    } else {
        format!("{}:{}", host, DEFAULT_PORT)
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Key/value pairs of a reply that is either a RESP3 map or a flat RESP2 array.
fn pairs(value: &Value) -> Option<Vec<(&Value, &Value)>> {
    match value {
        Value::Map(entries) => Some(entries.iter().map(|(k, v)| (k, v)).collect()),
        Value::Array(items) => Some(
            items
                .chunks_exact(2)
                .map(|pair| (&pair[0], &pair[1]))
                .collect(),
        ),
        _ => None,
    }
}

fn slot(value: &Value) -> Result<u16, StoreError> {
    let number = match value {
        Value::Int(n) => *n,
        other => text(other)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| StoreError::Topology(format!("slot bound {:?}", other)))?,
    };
    u16::try_from(number).map_err(|_| StoreError::Topology(format!("slot {} out of range", number)))
}

/// Parse a `CLUSTER SHARDS` reply into per-shard slot ranges.
pub fn parse_cluster_shards(reply: &Value) -> Result<Vec<ShardSlots>, StoreError> {
    let Value::Array(shards) = reply else {
        return Err(StoreError::Topology(format!("expected array, got {:?}", reply)));
    };

    let mut topology = Vec::with_capacity(shards.len());
    for shard in shards {
        let fields = pairs(shard)
            .ok_or_else(|| StoreError::Topology(format!("shard entry {:?}", shard)))?;
        let slots = fields
            .into_iter()
            .find(|(key, _)| text(key).as_deref() == Some("slots"))
            .map(|(_, value)| value);
        let bounds = match slots {
            Some(Value::Array(bounds)) => bounds,
            Some(other) => {
                return Err(StoreError::Topology(format!("slots field {:?}", other)));
            }
            None => return Err(StoreError::Topology("shard without slots".to_string())),
        };
        let ranges = bounds
            .chunks_exact(2)
            .map(|pair| Ok(SlotRange::new(slot(&pair[0])?, slot(&pair[1])?)))
            .collect::<Result<ShardSlots, StoreError>>()?;
        topology.push(ranges);
    }
    Ok(topology)
}
