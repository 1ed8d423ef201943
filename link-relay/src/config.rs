//! Configuration loading for devlink-relay.
//!
//! Configuration is loaded from a TOML file (default: `devlink.toml`).
//! Every section and every field is optional.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for devlink-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// In-memory storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Rate limiting and queue configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Cleanup task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:5268).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Storage configuration for pending registrations and uploaded files.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Maximum uploaded file size in bytes (default: 5MB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Seconds an uploaded file waits for its download (default: 1 hour).
    #[serde(default = "default_file_ttl")]
    pub file_ttl_secs: u64,
    /// Seconds a registration waits for its WebSocket upgrade (default: 5 minutes).
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum relayed messages per device per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum registrations per second across all clients (default: 50).
    #[serde(default = "default_registrations_per_second")]
    pub registrations_per_second: u32,
    /// Outbound messages queued per connection before new ones are dropped (default: 256).
    #[serde(default = "default_outbound_queue_len")]
    pub outbound_queue_len: usize,
    /// Maximum device name length in characters (default: 256).
    #[serde(default = "default_max_device_name_len")]
    pub max_device_name_len: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Hard cap on any request body in bytes (default: 5MB).
    #[serde(default = "default_max_file_size")]
    pub max_body_size: usize,
    /// Allow any origin, method and header (default: true).
    #[serde(default = "default_true")]
    pub cors_allow_any: bool,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 60).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:5268".to_string()
}

fn default_max_file_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_file_ttl() -> u64 {
    60 * 60 // 1 hour
}

fn default_pending_ttl() -> u64 {
    5 * 60 // 5 minutes
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_registrations_per_second() -> u32 {
    50
}

fn default_outbound_queue_len() -> usize {
    256
}

fn default_max_device_name_len() -> usize {
    256
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            file_ttl_secs: default_file_ttl(),
            pending_ttl_secs: default_pending_ttl(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: default_messages_per_minute(),
            registrations_per_second: default_registrations_per_second(),
            outbound_queue_len: default_outbound_queue_len(),
            max_device_name_len: default_max_device_name_len(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_file_size(),
            cors_allow_any: true,
            metrics_enabled: true,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load configuration from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!("No config file at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
