//! Rollcall Configuration
//!
//! This module provides configuration structures for the directory
//! service, the node agent and the pub/sub hub.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main rollcall configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollcallConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Directory (membership service) configuration
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Cluster timing configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Publish/subscribe configuration
    #[serde(default)]
    pub pubsub: PubSubConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node name (defaults to SERVER_NAME or the host name)
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Address to bind for application requests
    #[serde(default = "default_node_bind")]
    pub bind_address: String,

    /// Host advertised in the admin address (defaults to the node name)
    #[serde(default)]
    pub admin_host: Option<String>,

    /// Admin port is admin_base_port + rank
    #[serde(default = "default_admin_base_port")]
    pub admin_base_port: u16,

    /// Data directory for the flat-file application logs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Directory (membership service) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Address nodes use to reach the membership service
    #[serde(default = "default_directory_address")]
    pub address: String,

    /// Address the membership service binds to
    #[serde(default = "default_directory_bind")]
    pub bind_address: String,

    /// Persisted directory file (JSON array of records)
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Persisted coordinator view of the membership service
    #[serde(default = "default_coordinator_path")]
    pub coordinator_path: PathBuf,

    /// Records silent for longer than this are swept
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Background sweep interval (0 disables the sweeper)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

/// Cluster timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Timeout for requests to the membership service
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for point-to-point requests to peer admin endpoints
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    /// Periodic synchronization trigger (0 disables the timer)
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Trigger synchronization every N application replies (0 disables)
    #[serde(default = "default_sync_every_messages")]
    pub sync_every_messages: u64,

    /// Depth of the coordination task queue
    #[serde(default = "default_task_queue_depth")]
    pub task_queue_depth: usize,
}

/// Publish/subscribe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// Where publishers connect
    #[serde(default = "default_publish_address")]
    pub publish_address: String,

    /// Where subscribers connect
    #[serde(default = "default_subscribe_address")]
    pub subscribe_address: String,

    /// Topic carrying election announcements
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Hub bind address for publishers
    #[serde(default = "default_publish_bind")]
    pub publish_bind: String,

    /// Hub bind address for subscribers
    #[serde(default = "default_subscribe_bind")]
    pub subscribe_bind: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_node_name() -> String {
    if let Ok(name) = std::env::var("SERVER_NAME") {
        if !name.is_empty() {
            return name;
        }
    }
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_node_bind() -> String {
    "0.0.0.0:5556".to_string()
}

fn default_admin_base_port() -> u16 {
    5600
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/rollcall")
}

fn default_directory_address() -> String {
    std::env::var("REFERENCE_ADDR").unwrap_or_else(|_| "reference:5560".to_string())
}

fn default_directory_bind() -> String {
    "0.0.0.0:5560".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/rollcall/servers.json")
}

fn default_coordinator_path() -> PathBuf {
    PathBuf::from("/var/lib/rollcall/coordinator.json")
}

fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_peer_timeout_ms() -> u64 {
    2_000
}

fn default_sync_interval_ms() -> u64 {
    30_000
}

fn default_sync_every_messages() -> u64 {
    10
}

fn default_task_queue_depth() -> usize {
    16
}

fn default_publish_address() -> String {
    "proxy_pubsub:5557".to_string()
}

fn default_subscribe_address() -> String {
    "proxy_pubsub:5558".to_string()
}

fn default_topic() -> String {
    "servers".to_string()
}

fn default_publish_bind() -> String {
    "0.0.0.0:5557".to_string()
}

fn default_subscribe_bind() -> String {
    "0.0.0.0:5558".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            bind_address: default_node_bind(),
            admin_host: None,
            admin_base_port: default_admin_base_port(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            address: default_directory_address(),
            bind_address: default_directory_bind(),
            storage_path: default_storage_path(),
            coordinator_path: default_coordinator_path(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            peer_timeout_ms: default_peer_timeout_ms(),
            sync_interval_ms: default_sync_interval_ms(),
            sync_every_messages: default_sync_every_messages(),
            task_queue_depth: default_task_queue_depth(),
        }
    }
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            publish_address: default_publish_address(),
            subscribe_address: default_subscribe_address(),
            topic: default_topic(),
            publish_bind: default_publish_bind(),
            subscribe_bind: default_subscribe_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl RollcallConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: RollcallConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.name.is_empty() {
            return Err(crate::Error::Config("node.name cannot be empty".into()));
        }

        let addresses = [
            ("node.bind_address", &self.node.bind_address),
            ("directory.address", &self.directory.address),
            ("directory.bind_address", &self.directory.bind_address),
            ("pubsub.publish_address", &self.pubsub.publish_address),
            ("pubsub.subscribe_address", &self.pubsub.subscribe_address),
            ("pubsub.publish_bind", &self.pubsub.publish_bind),
            ("pubsub.subscribe_bind", &self.pubsub.subscribe_bind),
        ];
        for (key, value) in addresses {
            if value.trim().is_empty() {
                return Err(crate::Error::Config(format!("{} cannot be empty", key)));
            }
        }

        if self.pubsub.topic.is_empty() || self.pubsub.topic.contains(' ') {
            return Err(crate::Error::Config(
                "pubsub.topic must be a non-empty word".into(),
            ));
        }

        if self.directory.heartbeat_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "directory.heartbeat_timeout_ms must be positive".into(),
            ));
        }

        if self.cluster.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config(
                "cluster.heartbeat_interval_ms must be positive".into(),
            ));
        }

        if self.cluster.request_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "cluster.request_timeout_ms must be positive".into(),
            ));
        }

        if self.cluster.peer_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "cluster.peer_timeout_ms must be positive".into(),
            ));
        }

        if self.cluster.heartbeat_interval_ms >= self.directory.heartbeat_timeout_ms {
            tracing::warn!(
                "heartbeat interval ({} ms) is not below the directory timeout ({} ms); nodes will flap",
                self.cluster.heartbeat_interval_ms,
                self.directory.heartbeat_timeout_ms
            );
        }

        if self.cluster.task_queue_depth == 0 {
            return Err(crate::Error::Config(
                "cluster.task_queue_depth must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Host part of this node's admin address
    pub fn admin_host(&self) -> &str {
        self.node.admin_host.as_deref().unwrap_or(&self.node.name)
    }

    /// Admin address derived from a rank: host:(base + rank)
    pub fn admin_address(&self, rank: u32) -> crate::Result<String> {
        crate::directory::admin_address(self.admin_host(), self.node.admin_base_port, rank)
    }

    /// Get the directory expiry threshold as Duration
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.directory.heartbeat_timeout_ms)
    }

    /// Get the sweep interval, if the sweeper is enabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.directory.sweep_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.heartbeat_interval_ms)
    }

    /// Get the membership service request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.request_timeout_ms)
    }

    /// Get the peer request timeout
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.peer_timeout_ms)
    }

    /// Get the synchronization timer, if enabled
    pub fn sync_interval(&self) -> Option<Duration> {
        match self.cluster.sync_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
