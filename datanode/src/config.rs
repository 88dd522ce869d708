use dn_core::{BufferPoolConfig, DnError, Result};
use dn_repl::{ForwardConfig, PoolConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Prefix of every operation timer key
    pub cluster_id: String,
    pub listen_addr: SocketAddr,
    /// Read deadline for client packets in seconds; 0 waits indefinitely
    #[serde(default = "default_client_read_timeout")]
    pub client_read_timeout_secs: u64,
    /// Read deadline for follower replies in seconds; 0 waits indefinitely
    #[serde(default = "default_follower_read_timeout")]
    pub follower_read_timeout_secs: u64,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub buffers: BufferSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

fn default_client_read_timeout() -> u64 {
    60
}

fn default_follower_read_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub idle_per_addr: usize,
    pub max_connections: usize,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    pub header_pool_size: usize,
    pub block_pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// Capacity of the timer sample channel; samples beyond it are dropped
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Bytes the in-memory extent store may hold before reporting no space
    pub capacity_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_id: "cfs".into(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 17310)),
            client_read_timeout_secs: default_client_read_timeout(),
            follower_read_timeout_secs: default_follower_read_timeout(),
            pool: PoolSettings::default(),
            buffers: BufferSettings::default(),
            metrics: MetricsSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            idle_per_addr: pool.idle_per_addr,
            max_connections: pool.max_connections,
            connect_timeout_ms: u64::try_from(pool.connect_timeout.as_millis()).unwrap_or(5_000),
        }
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        let buffers = BufferPoolConfig::default();
        Self {
            header_pool_size: buffers.header_pool_size,
            block_pool_size: buffers.block_pool_size,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: 4096,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            capacity_bytes: 1024 * 1024 * 1024,
        }
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| DnError::Config(format!("TOML parse error: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| DnError::Config(format!("JSON parse error: {e}"))),
            _ => Err(DnError::Config(format!(
                "Unknown config file extension: {ext}"
            ))),
        }
    }

    pub fn from_args(args: &super::Args) -> Self {
        let mut config = Self {
            cluster_id: args.cluster_id.clone(),
            listen_addr: args.listen,
            client_read_timeout_secs: args.client_read_timeout,
            follower_read_timeout_secs: args.follower_read_timeout,
            ..Default::default()
        };
        config.pool.max_connections = args.max_connections;
        config.metrics.enabled = !args.no_metrics;
        config
    }

    #[must_use]
    pub fn client_read_timeout(&self) -> Option<Duration> {
        seconds(self.client_read_timeout_secs)
    }

    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            idle_per_addr: self.pool.idle_per_addr,
            max_connections: self.pool.max_connections,
            connect_timeout: Duration::from_millis(self.pool.connect_timeout_ms),
        }
    }

    #[must_use]
    pub fn forward_config(&self) -> ForwardConfig {
        ForwardConfig {
            follower_read_timeout: seconds(self.follower_read_timeout_secs),
        }
    }

    #[must_use]
    pub fn buffer_config(&self) -> BufferPoolConfig {
        BufferPoolConfig {
            header_pool_size: self.buffers.header_pool_size,
            block_pool_size: self.buffers.block_pool_size,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 17310);
        assert_eq!(config.client_read_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(
            config.forward_config().follower_read_timeout,
            Some(Duration::from_secs(30))
        );
        assert!(config.metrics.enabled);
        assert_eq!(config.buffer_config().block_pool_size, 64);
    }

    #[test]
    fn test_zero_timeout_means_no_deadline() {
        let config = Config {
            client_read_timeout_secs: 0,
            follower_read_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.client_read_timeout(), None);
        assert_eq!(config.forward_config().follower_read_timeout, None);
    }

    #[test]
    fn test_config_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("datanode.toml");

        let toml_content = r#"
cluster_id = "c1"
listen_addr = "127.0.0.1:17320"
client_read_timeout_secs = 0

[pool]
idle_per_addr = 2
max_connections = 16
connect_timeout_ms = 250

[metrics]
enabled = false
channel_capacity = 8
"#;

        std::fs::write(&config_path, toml_content).unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.cluster_id, "c1");
        assert_eq!(config.listen_addr.port(), 17320);
        assert_eq!(config.client_read_timeout(), None);
        assert_eq!(config.follower_read_timeout_secs, 30);

        let pool = config.pool_config();
        assert_eq!(pool.idle_per_addr, 2);
        assert_eq!(pool.max_connections, 16);
        assert_eq!(pool.connect_timeout, Duration::from_millis(250));
        assert!(!config.metrics.enabled);
        // Sections left out fall back to defaults
        assert_eq!(config.buffers.header_pool_size, 1024);
    }

    #[test]
    fn test_config_from_json_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("datanode.json");

        let json_content = r#"{
            "cluster_id": "c2",
            "listen_addr": "127.0.0.1:17330",
            "buffers": {"header_pool_size": 8, "block_pool_size": 2},
            "store": {"capacity_bytes": 4096}
        }"#;

        std::fs::write(&config_path, json_content).unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.cluster_id, "c2");
        assert_eq!(config.buffer_config().header_pool_size, 8);
        assert_eq!(config.store.capacity_bytes, 4096);
    }

    #[test]
    fn test_config_unknown_extension() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("datanode.yaml");
        std::fs::write(&config_path, "cluster_id: c1").unwrap();

        assert!(matches!(
            Config::from_file(&config_path),
            Err(DnError::Config(_))
        ));
    }

    #[test]
    fn test_generated_defaults_parse_back() {
        let text = toml::to_string(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cluster_id, "cfs");
        assert_eq!(parsed.pool.max_connections, 1024);
    }
}
