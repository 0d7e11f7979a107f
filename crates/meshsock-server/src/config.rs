//! Server configuration surface, per the recognized options list: host,
//! port, path, heartbeat timing, connection cap, encryption, message cache,
//! message queue, and which adapter backs cross-instance fan-out.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level server configuration, deserialized from TOML with
/// camelCase field names to keep config files aligned with the wire/API
/// surface's own naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port; `0` lets the OS assign one (`Server::port()` reports the real value).
    #[serde(default)]
    pub port: u16,
    /// Base path namespaces are resolved under; default `/`.
    #[serde(default = "default_path")]
    pub path: String,
    /// Milliseconds between heartbeat pings.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Milliseconds to wait for a pong before disconnecting.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Maximum concurrent connections; `0` means unbounded.
    #[serde(default)]
    pub max_connections: usize,
    /// Transparent payload encryption, if configured.
    #[serde(default)]
    pub encryption: Option<EncryptionSettings>,
    /// Serialized-envelope cache, or `false` to disable.
    #[serde(default)]
    pub message_cache: MessageCacheSetting,
    /// Outbound message queue, or `false` to disable (synchronous fan-out instead).
    #[serde(default)]
    pub message_queue: MessageQueueSetting,
    /// Use the shared-timer batch heartbeat manager instead of per-peer timers.
    #[serde(default)]
    pub use_batch_heartbeat: bool,
    /// Route broadcasts through the MessageQueue rather than synchronous fan-out.
    #[serde(default)]
    pub use_message_queue: bool,
    /// Cross-instance adapter backing, if any.
    #[serde(default)]
    pub adapter: AdapterSetting,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_ping_timeout_ms() -> u64 {
    60_000
}

impl ServerConfig {
    /// `ping_interval_ms` as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// `ping_timeout_ms` as a [`Duration`].
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Load configuration from a TOML file at `path`.
    pub fn from_toml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            path: default_path(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            max_connections: 0,
            encryption: None,
            message_cache: MessageCacheSetting::default(),
            message_queue: MessageQueueSetting::default(),
            use_batch_heartbeat: false,
            use_message_queue: false,
            adapter: AdapterSetting::default(),
        }
    }
}

/// Transparent encryption settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionSettings {
    /// Shared key, as raw bytes.
    pub key: Vec<u8>,
    /// Cipher algorithm; defaults to `aes-256-gcm`.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Whether encryption is active; lets a key be configured but toggled off.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Encryption cache entry capacity.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Encryption cache entry TTL, in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

fn default_algorithm() -> String {
    "aes-256-gcm".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    1000
}

fn default_cache_ttl_ms() -> u64 {
    60_000
}

/// `messageCache: false | {...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageCacheSetting {
    /// Disabled.
    Disabled(bool),
    /// Enabled with the given limits.
    Enabled {
        /// Maximum cached entries.
        #[serde(default = "default_cache_size")]
        max_size: usize,
        /// Entry TTL in milliseconds.
        #[serde(default = "default_cache_ttl_ms")]
        ttl_ms: u64,
    },
}

impl Default for MessageCacheSetting {
    fn default() -> Self {
        MessageCacheSetting::Enabled {
            max_size: default_cache_size(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

/// `messageQueue: false | {...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageQueueSetting {
    /// Disabled.
    Disabled(bool),
    /// Enabled with the given limits.
    Enabled {
        /// Maximum queued messages before the oldest is dropped.
        #[serde(default = "default_queue_max_size")]
        max_size: usize,
        /// Messages drained per processing tick.
        #[serde(default = "default_batch_size")]
        batch_size: usize,
        /// Milliseconds between processing ticks.
        #[serde(default = "default_process_interval_ms")]
        process_interval_ms: u64,
    },
}

fn default_queue_max_size() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    100
}

fn default_process_interval_ms() -> u64 {
    10
}

impl Default for MessageQueueSetting {
    fn default() -> Self {
        MessageQueueSetting::Enabled {
            max_size: default_queue_max_size(),
            batch_size: default_batch_size(),
            process_interval_ms: default_process_interval_ms(),
        }
    }
}

/// Which adapter backs cross-instance room sync and relay.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AdapterSetting {
    /// Single-instance deployment; no cross-server sync.
    #[default]
    Memory,
    /// Redis-backed adapter.
    Redis {
        /// Connection URL.
        url: String,
        /// Key/channel prefix.
        #[serde(default = "default_redis_prefix")]
        prefix: String,
    },
    /// MongoDB-backed adapter.
    Mongo {
        /// Connection URI.
        uri: String,
        /// Database name.
        database: String,
        /// Collection name prefix.
        #[serde(default = "default_mongo_prefix")]
        prefix: String,
    },
}

fn default_redis_prefix() -> String {
    "ws".to_string()
}

fn default_mongo_prefix() -> String {
    "ws".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        let config = ServerConfig::default();
        assert_eq!(config.path, "/");
        assert_eq!(config.ping_interval_ms, 30_000);
        assert!(matches!(config.adapter, AdapterSetting::Memory));
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_text = r#"
            host = "127.0.0.1"
            port = 8080
        "#;
        let config: ServerConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.ping_timeout_ms, 60_000);
    }

    #[test]
    fn parses_redis_adapter_setting() {
        let toml_text = r#"
            [adapter]
            kind = "redis"
            url = "redis://localhost"
        "#;
        let config: ServerConfig = toml::from_str(toml_text).unwrap();
        match config.adapter {
            AdapterSetting::Redis { url, prefix } => {
                assert_eq!(url, "redis://localhost");
                assert_eq!(prefix, "ws");
            }
            _ => panic!("expected redis adapter"),
        }
    }
}
