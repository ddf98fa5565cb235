//! Configuration settings for the reqseal daemon.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ServiceError;

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub socket: SocketConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Path to the Unix socket file.
    pub path: PathBuf,
    /// Socket file permissions (e.g., "0660").
    #[serde(default = "default_socket_permissions")]
    pub permissions: String,
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Path to the principal keys file.
    pub keys_path: PathBuf,
    /// Nonce time-to-live in seconds.
    #[serde(default = "default_nonce_ttl")]
    pub nonce_ttl_seconds: u64,
    /// Maximum clock difference between signing and verification, in seconds.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_seconds: u64,
    /// Interval between background nonce sweeps, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Limits configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum concurrent connections.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_connections: usize,
    /// Socket read/write timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Path to the audit log file.
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,
}

// Default value functions
fn default_socket_permissions() -> String {
    "0660".to_string()
}

fn default_nonce_ttl() -> u64 {
    crate::auth::DEFAULT_NONCE_TTL.as_secs()
}

fn default_freshness_window() -> u64 {
    crate::auth::DEFAULT_FRESHNESS_WINDOW.as_secs()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_max_message_size() -> usize {
    crate::protocol::DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_concurrent() -> usize {
    100
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/var/log/reqseal/audit.log")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_concurrent_connections: default_max_concurrent(),
            socket_timeout_seconds: default_socket_timeout(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            log_path: default_audit_log_path(),
        }
    }
}

impl SecurityConfig {
    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_seconds)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ServiceError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ServiceError::Config { message } => ServiceError::Config {
                message: format!("{} ({})", message, path.display()),
            },
            other => other,
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ServiceError> {
        let settings: Settings = toml::from_str(content).map_err(|e| ServiceError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), ServiceError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ServiceError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(ServiceError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if u32::from_str_radix(&self.socket.permissions, 8).is_err() {
            return Err(ServiceError::Config {
                message: format!(
                    "Invalid socket permissions '{}'. Must be octal (e.g., '0660')",
                    self.socket.permissions
                ),
            });
        }

        let security = &self.security;
        if security.freshness_window_seconds == 0 {
            return Err(ServiceError::Config {
                message: "freshness_window_seconds must be greater than zero".to_string(),
            });
        }

        // A replay presented after its nonce has been evicted must already be
        // outside the freshness window.
        if security.nonce_ttl_seconds < security.freshness_window_seconds.saturating_mul(2) {
            return Err(ServiceError::Config {
                message: format!(
                    "nonce_ttl_seconds ({}) must be at least twice freshness_window_seconds ({})",
                    security.nonce_ttl_seconds, security.freshness_window_seconds
                ),
            });
        }

        if security.sweep_interval_seconds == 0 {
            return Err(ServiceError::Config {
                message: "sweep_interval_seconds must be greater than zero".to_string(),
            });
        }

        if self.limits.max_concurrent_connections == 0 {
            return Err(ServiceError::Config {
                message: "max_concurrent_connections must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
