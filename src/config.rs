//! Service configuration.
//!
//! Loaded from a TOML file, by default at:
//! - Linux: ~/.config/graphex/config.toml
//! - macOS: ~/Library/Application Support/graphex/config.toml
//! - Windows: %APPDATA%\graphex\config.toml
//!
//! Every key is optional; a missing file yields the defaults.
//!
//! `static_dir` names the front-end build directory for deployments that
//! serve one beside the socket. It is recorded but graphex does not serve it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraphexError, Result};

/// Graphex configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphexConfig {
    /// Directory whose data files are served
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,

    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-connection timing and queue settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// File watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Static asset directory. Accepted and logged, never served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for GraphexConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            server: ServerConfig::default(),
            connection: ConnectionConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
            static_dir: None,
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request path accepted for the WebSocket upgrade
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_path() -> String {
    "/ws".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection timing and back-pressure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Time allowed between two inbound frames
    #[serde(default = "default_read_wait")]
    pub read_wait_secs: u64,

    /// Time allowed for one outbound write
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,

    /// Liveness window; pings are sent at 9/10 of it
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,

    /// Outbound messages buffered per connection before new ones are dropped
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_read_wait() -> u64 {
    60
}

fn default_write_wait() -> u64 {
    10
}

fn default_pong_wait() -> u64 {
    60
}

fn default_outbound_capacity() -> usize {
    256
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_wait_secs: default_read_wait(),
            write_wait_secs: default_write_wait(),
            pong_wait_secs: default_pong_wait(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl ConnectionConfig {
    pub fn read_wait(&self) -> Duration {
        Duration::from_secs(self.read_wait_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    /// Interval between pings. Must stay below the read window.
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs) * 9 / 10
    }
}

/// File watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Only file names ending with this suffix are tracked
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Capacity of the domain event queue
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Consecutive attempts to re-establish the watch after a notify error
    #[serde(default = "default_rearm_attempts")]
    pub rearm_attempts: u32,

    #[serde(default = "default_rearm_delay")]
    pub rearm_delay_ms: u64,
}

fn default_suffix() -> String {
    ".txt".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_rearm_attempts() -> u32 {
    5
}

fn default_rearm_delay() -> u64 {
    1000
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            event_capacity: default_event_capacity(),
            rearm_attempts: default_rearm_attempts(),
            rearm_delay_ms: default_rearm_delay(),
        }
    }
}

impl WatcherConfig {
    pub fn rearm_delay(&self) -> Duration {
        Duration::from_millis(self.rearm_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GraphexConfig {
    /// Default config file location, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("graphex").join("config.toml"))
    }

    /// Load configuration from an explicit path, or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) => Self::load_from(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GraphexError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;

        Self::parse(&content)
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| GraphexError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(GraphexError::Config {
                message: message.to_string(),
            })
        };

        if self.watcher.suffix.is_empty() {
            return invalid("watcher.suffix must not be empty");
        }
        if self.watcher.event_capacity == 0 {
            return invalid("watcher.event_capacity must be greater than zero");
        }
        if self.connection.outbound_capacity == 0 {
            return invalid("connection.outbound_capacity must be greater than zero");
        }
        if !self.server.path.starts_with('/') {
            return invalid("server.path must start with '/'");
        }
        if self.connection.ping_period().is_zero() {
            return invalid("connection.pong_wait_secs must be at least 1");
        }
        if self.connection.write_wait().is_zero() {
            return invalid("connection.write_wait_secs must be greater than zero");
        }
        if self.connection.ping_period() >= self.connection.read_wait() {
            return invalid("connection.pong_wait_secs * 0.9 must be shorter than read_wait_secs");
        }
        Ok(())
    }
}
