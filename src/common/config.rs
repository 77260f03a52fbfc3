//! Configuration for miniroute components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `MINIROUTE__STORE__SESSION_TIMEOUT_MS=8000`
pub const ENV_PREFIX: &str = "MINIROUTE";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordination store connection settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Watch a directory and route to the addresses registered under it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorConfig>,

    /// Publish this process's own addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar: Option<RegistrarConfig>,

    /// Admin HTTP endpoint
    #[serde(default)]
    pub admin: AdminConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which coordination store the node talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, not shared with other nodes
    #[default]
    Memory,
    /// ZooKeeper ensemble at `endpoints` (needs the `zookeeper` feature)
    Zookeeper,
}

/// Coordination store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Store endpoints (host:port)
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Session timeout
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,
}

fn default_endpoints() -> Vec<String> {
    vec!["127.0.0.1:2181".to_string()]
}
fn default_session_timeout() -> u64 {
    5_000
}

impl StoreConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            endpoints: default_endpoints(),
            session_timeout_ms: default_session_timeout(),
        }
    }
}

/// Membership monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Directory whose children are backend addresses
    pub path: String,

    /// Passed through untouched to the backend client factory
    #[serde(default)]
    pub backend_arg: serde_json::Value,

    /// Delay before re-arming a failed watch
    #[serde(default = "default_watch_retry")]
    pub watch_retry_ms: u64,
}

fn default_watch_retry() -> u64 {
    5_000
}

impl MonitorConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            backend_arg: serde_json::Value::Null,
            watch_retry_ms: default_watch_retry(),
        }
    }

    pub fn watch_retry(&self) -> Duration {
        Duration::from_millis(self.watch_retry_ms)
    }
}

/// Self-registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Directory to register under
    pub path: String,

    /// Addresses registered at startup
    #[serde(default)]
    pub addrs: Vec<String>,
}

/// Admin HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_enabled")]
    pub enabled: bool,

    #[serde(default = "default_admin_addr")]
    pub bind_addr: SocketAddr,
}

fn default_admin_enabled() -> bool {
    true
}
fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7070))
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: default_admin_enabled(),
            bind_addr: default_admin_addr(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            monitor: None,
            registrar: None,
            admin: AdminConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, overridden by
    /// `MINIROUTE__*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("store.endpoints")
                    .with_list_parse_key("registrar.addrs")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.endpoints.is_empty() {
            return Err(Error::InvalidConfig("store.endpoints is empty".into()));
        }
        if self.store.session_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.session_timeout_ms must be positive".into(),
            ));
        }
        if let Some(monitor) = &self.monitor {
            check_path("monitor.path", &monitor.path)?;
            if monitor.watch_retry_ms == 0 {
                return Err(Error::InvalidConfig(
                    "monitor.watch_retry_ms must be positive".into(),
                ));
            }
        }
        if let Some(registrar) = &self.registrar {
            check_path("registrar.path", &registrar.path)?;
        }
        Ok(())
    }
}

fn check_path(field: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') || path.trim_end_matches('/').is_empty() {
        return Err(Error::InvalidConfig(format!(
            "{} must be an absolute node path, got {:?}",
            field, path
        )));
    }
    Ok(())
}
