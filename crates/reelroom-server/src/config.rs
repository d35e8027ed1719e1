//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`REELROOM_CONFIG`, or the first of the default paths)
//! - Environment variables (`REELROOM_PORT`, `REELROOM_ROOMS__IDLE_GRACE_SECS`, ...)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Environment, File, FileFormat};
use anyhow::{Context, Result};
use reelroom_core::HubConfig;
use serde::{Deserialize, Serialize};

/// Files probed when `REELROOM_CONFIG` is not set.
const CONFIG_PATHS: [&str; 3] = [
    "reelroom.toml",
    "/etc/reelroom/reelroom.toml",
    "~/.config/reelroom/reelroom.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Room behaviour.
    #[serde(default)]
    pub rooms: RoomsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path of the websocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound websocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Events buffered per connection before it counts as a slow consumer.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Room behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// System message broadcast when someone joins.
    #[serde(default = "default_join_announcement")]
    pub join_announcement: String,

    /// System message broadcast when someone leaves. Empty disables it.
    #[serde(default = "default_leave_announcement")]
    pub leave_announcement: String,

    /// Evict rooms that stay empty longer than `idle_grace_secs`.
    #[serde(default = "default_true")]
    pub evict_idle_rooms: bool,

    #[serde(default = "default_idle_grace_secs")]
    pub idle_grace_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Only broadcast chat messages the store confirmed.
    #[serde(default)]
    pub require_persisted_chat: bool,
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

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_join_announcement() -> String {
    HubConfig::default().join_announcement
}

fn default_leave_announcement() -> String {
    HubConfig::default().leave_announcement.unwrap_or_default()
}

fn default_idle_grace_secs() -> u64 {
    300 // 5 minutes
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            metrics: MetricsConfig::default(),
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
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            join_announcement: default_join_announcement(),
            leave_announcement: default_leave_announcement(),
            evict_idle_rooms: true,
            idle_grace_secs: default_idle_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            require_persisted_chat: false,
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

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("REELROOM_CONFIG")
            .map(PathBuf::from)
            .or_else(|| {
                CONFIG_PATHS
                    .iter()
                    .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                    .find(|p| p.exists())
            });

        Self::build(path.as_deref())
    }

    /// Load configuration from a specific file, overlaid with environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let source = path.map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
        builder
            .add_source(
                Environment::with_prefix("REELROOM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {source}"))?
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {source}"))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_buffer: self.limits.outbound_buffer,
            max_event_size: self.limits.max_message_size,
            join_announcement: self.rooms.join_announcement.clone(),
            leave_announcement: Some(self.rooms.leave_announcement.clone())
                .filter(|text| !text.is_empty()),
            require_persisted_chat: self.rooms.require_persisted_chat,
        }
    }
}

impl RoomsConfig {
    #[must_use]
    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
