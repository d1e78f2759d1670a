//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FILAMENT_CONFIG)
//! 3. Environment variables
//!
//! All values are fixed at process start; nothing is hot-reloadable.

use crate::server::ServerConfig;
use filament_protocol::{DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Worker dispatch configuration.
    pub dispatch: DispatchConfig,
    /// Protocol limits.
    pub limits: LimitsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(path) = std::env::var("FILAMENT_CONFIG") {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.dispatch.apply_env_overrides();
        self.limits.apply_env_overrides();
    }

    /// Builds the runtime server configuration.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig::new(self.network.bind_addr)
            .with_tcp_nodelay(self.network.tcp_nodelay)
            .with_recv_buffer_size(self.network.recv_buffer_size)
            .with_max_connections(self.network.max_connections)
            .with_worker_count(self.dispatch.resolved_worker_count())
            .with_max_payload_bytes(self.limits.max_payload_bytes)
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// TCP_NODELAY on accepted sockets.
    pub tcp_nodelay: bool,
    /// SO_RCVBUF hint for the listening socket.
    pub recv_buffer_size: u32,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            tcp_nodelay: true,
            recv_buffer_size: 8192,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("FILAMENT_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
        if let Ok(max) = std::env::var("FILAMENT_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }
}

/// Worker dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Size of the invocation worker pool. 0 = twice the CPU count.
    pub worker_count: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { worker_count: 0 }
    }
}

impl DispatchConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(workers) = std::env::var("FILAMENT_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.worker_count = n;
            }
        }
    }

    /// The configured pool size, or twice the CPU count when unset.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(4)
    }
}

/// Protocol limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum frame payload size in bytes, shared with clients.
    pub max_payload_bytes: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl LimitsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("FILAMENT_MAX_PAYLOAD") {
            if let Ok(n) = max.parse() {
                self.max_payload_bytes = n;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),
}

/// Custom serde module for SocketAddr (handled as a string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.network.max_connections, 1000);
        assert_eq!(config.limits.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
        assert!(config.dispatch.resolved_worker_count() > 0);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(
            parsed.limits.max_payload_bytes,
            config.limits.max_payload_bytes
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed: Config =
            serde_yaml::from_str("network:\n  bind_addr: \"0.0.0.0:9000\"\n").unwrap();
        assert_eq!(parsed.network.bind_addr.port(), 9000);
        assert_eq!(parsed.network.max_connections, 1000);
        assert_eq!(parsed.limits.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_to_server_config() {
        let mut config = Config::default();
        config.dispatch.worker_count = 3;
        let server_config = config.to_server_config();
        assert_eq!(server_config.worker_count, 3);
        assert_eq!(server_config.bind_addr, config.network.bind_addr);
    }
}
