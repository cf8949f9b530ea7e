//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (TANDEM_HOST, TANDEM_PORT, TANDEM_JWT_SECRET)
//! - TOML configuration file
//! - Command line (`--config <path>`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tandem_core::ConnectionConfig;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Credential verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Document access rules.
    #[serde(default)]
    pub access: AccessConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix for the collaboration endpoint. The document ID follows it.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound queue capacity per connection.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Write deadline in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// JWT verification configuration.
///
/// `public_key_path` selects RS256; otherwise HS256 with `secret`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared HS256 secret.
    #[serde(default = "default_jwt_secret")]
    pub secret: Option<String>,

    /// PEM-encoded RSA public key for RS256.
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,

    /// Required `iss` claim.
    #[serde(default)]
    pub issuer: Option<String>,
}

/// Document access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Allow any authenticated user into documents not listed below.
    #[serde(default = "default_true")]
    pub open: bool,

    /// Per-document allow lists of user IDs. `"*"` admits everyone.
    #[serde(default)]
    pub documents: HashMap<String, Vec<String>>,
}

// Default value functions
fn default_host() -> String {
    std::env::var("TANDEM_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("TANDEM_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws/collaboration".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    54_000
}

fn default_heartbeat_timeout() -> u64 {
    60_000
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_jwt_secret() -> Option<String> {
    std::env::var("TANDEM_JWT_SECRET").ok().filter(|s| !s.is_empty())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
            access: AccessConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            public_key_path: None,
            issuer: None,
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            open: true,
            documents: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default path that
    /// exists, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// resulting configuration is invalid.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = [
            "tandem.toml",
            "/etc/tandem/tandem.toml",
            "~/.config/tandem/tandem.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// resulting configuration is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check values that would make the server misbehave.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !self.transport.websocket_path.starts_with('/') {
            bail!("transport.websocket_path must start with '/'");
        }
        if self.limits.send_queue_capacity == 0 {
            bail!("limits.send_queue_capacity must be greater than zero");
        }
        if self.limits.max_message_size == 0 {
            bail!("limits.max_message_size must be greater than zero");
        }
        if self.heartbeat.write_timeout_ms == 0 {
            bail!("heartbeat.write_timeout_ms must be greater than zero");
        }
        if self.heartbeat.interval_ms == 0 || self.heartbeat.interval_ms >= self.heartbeat.timeout_ms
        {
            bail!("heartbeat.interval_ms must be non-zero and below heartbeat.timeout_ms");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Route pattern for the collaboration endpoint.
    #[must_use]
    pub fn collaboration_route(&self) -> String {
        format!(
            "{}/:document_id",
            self.transport.websocket_path.trim_end_matches('/')
        )
    }

    /// Per-connection tuning derived from limits and heartbeat settings.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            queue_capacity: self.limits.send_queue_capacity,
            ping_interval: Duration::from_millis(self.heartbeat.interval_ms),
            idle_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            write_timeout: Duration::from_millis(self.heartbeat.write_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws/collaboration");
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert_eq!(config.limits.send_queue_capacity, 256);
        assert!(config.access.open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".to_string();
        config.port = 8080;
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        config.host = "not a host".to_string();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            send_queue_capacity = 64

            [heartbeat]
            interval_ms = 9000
            timeout_ms = 10000

            [access]
            open = false

            [access.documents]
            roadmap = ["alice", "bob"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.send_queue_capacity, 64);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert!(!config.access.open);
        assert_eq!(config.access.documents["roadmap"], vec!["alice", "bob"]);

        let connection = config.connection_config();
        assert_eq!(connection.queue_capacity, 64);
        assert_eq!(connection.ping_interval, Duration::from_secs(9));
        assert_eq!(connection.idle_timeout, Duration::from_secs(10));
        assert_eq!(connection.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.limits.send_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.heartbeat.interval_ms = config.heartbeat.timeout_ms;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.websocket_path = "ws".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collaboration_route() {
        let mut config = Config::default();
        assert_eq!(config.collaboration_route(), "/ws/collaboration/:document_id");

        config.transport.websocket_path = "/rooms/".to_string();
        assert_eq!(config.collaboration_route(), "/rooms/:document_id");
    }
}
