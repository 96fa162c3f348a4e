//! Configuration
//!
//! Recognized options mirror the table in the commit engine's external
//! interfaces: `replica`/`local` describe the fixed cluster, the timeout
//! family bounds every suspension point in the peer link and coordinator,
//! and `enable` gates replication entirely.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration for a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Node-specific configuration.
    pub node: NodeConfig,

    /// Write-ahead log configuration.
    #[serde(default)]
    pub wal: WalConfig,

    /// Cluster and timeout configuration.
    pub cluster: ClusterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory for WAL and state storage.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Write-ahead log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_compression")]
    pub compression: bool,
    #[serde(default = "default_segment_size_mb")]
    pub segment_size_mb: u64,
    #[serde(default)]
    pub retention_hours: u64,
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            compression: default_compression(),
            segment_size_mb: default_segment_size_mb(),
            retention_hours: 0,
            fsync: default_fsync(),
        }
    }
}

/// Cluster configuration: the `replica`/`local` list plus every timeout
/// named in the commit engine's external interfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Semicolon-separated list of peer URIs (`host_id` is the position
    /// in this list). Also accepts a TOML array for convenience.
    pub replica: Vec<String>,

    /// The URI that identifies this node within `replica`.
    pub local: String,

    /// Gate: when false, `submit_local` degrades to a direct `wal_write`.
    #[serde(default = "default_true")]
    pub enable: bool,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: f64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: f64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f64,
    #[serde(default = "default_reconnect_timeout_secs")]
    pub reconnect_timeout_secs: f64,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: f64,
    #[serde(default = "default_election_timeout_secs")]
    pub election_timeout_secs: f64,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: f64,
    #[serde(default = "default_slow_host_timeout_secs")]
    pub slow_host_timeout_secs: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/gsnsync")
}
fn default_batch_size() -> usize {
    1000
}
fn default_flush_interval_ms() -> u64 {
    10
}
fn default_compression() -> bool {
    true
}
fn default_segment_size_mb() -> u64 {
    256
}
fn default_fsync() -> bool {
    true
}
fn default_true() -> bool {
    true
}
fn default_read_timeout_secs() -> f64 {
    5.0
}
fn default_write_timeout_secs() -> f64 {
    5.0
}
fn default_connect_timeout_secs() -> f64 {
    5.0
}
fn default_reconnect_timeout_secs() -> f64 {
    1.0
}
fn default_ping_timeout_secs() -> f64 {
    2.0
}
fn default_election_timeout_secs() -> f64 {
    2.0
}
fn default_operation_timeout_secs() -> f64 {
    5.0
}
fn default_slow_host_timeout_secs() -> f64 {
    10.0
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.replica.is_empty() {
            return Err(Error::Config("cluster.replica cannot be empty".into()));
        }
        if self.cluster.replica.len() > 16 {
            return Err(Error::Config("cluster.replica supports at most 16 hosts".into()));
        }
        if !self.cluster.replica.contains(&self.cluster.local) {
            return Err(Error::Config(
                "cluster.local must be one of cluster.replica".into(),
            ));
        }
        Ok(())
    }

    /// This node's `host_id`: its position within `cluster.replica`.
    pub fn local_id(&self) -> u8 {
        self.cluster
            .replica
            .iter()
            .position(|r| r == &self.cluster.local)
            .expect("validate() guarantees local is in replica") as u8
    }

    /// Number of hosts in the cluster.
    pub fn num_hosts(&self) -> usize {
        self.cluster.replica.len()
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.node.data_dir.join("wal")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.node.data_dir.join("state")
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cluster.read_timeout_secs)
    }
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cluster.write_timeout_secs)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cluster.connect_timeout_secs)
    }
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cluster.reconnect_timeout_secs)
    }
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cluster.ping_timeout_secs)
    }
    pub fn election_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cluster.election_timeout_secs)
    }
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cluster.operation_timeout_secs)
    }
    pub fn slow_host_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cluster.slow_host_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
[node]
data_dir = "/tmp/gsnsync-test"

[cluster]
replica = ["10.0.0.1:7654", "10.0.0.2:7654", "10.0.0.3:7654"]
local = "10.0.0.2:7654"
"#;
        let config = EngineConfig::from_str(toml).unwrap();
        assert_eq!(config.local_id(), 1);
        assert_eq!(config.num_hosts(), 3);
        assert!(config.cluster.enable);
    }

    #[test]
    fn rejects_local_not_in_replica() {
        let toml = r#"
[node]
data_dir = "/tmp/gsnsync-test"

[cluster]
replica = ["a:1", "b:1"]
local = "c:1"
"#;
        assert!(EngineConfig::from_str(toml).is_err());
    }
}
