//! Application configuration structures.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::{
    CaptureSettings, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PERSIST_TIMEOUT, DEFAULT_QUERY_TIMEOUT,
    MonitorCredential,
};
use crate::orchestrator::{
    DEFAULT_AUTO_INTERVAL, DEFAULT_CHANNEL_CAPACITY, DEFAULT_DEBOUNCE, DEFAULT_INTERVAL,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS,
};
use crate::storage::{EngineKind, Instance};

use super::validation::{
    ConfigError, expand_env_vars, invalid, require_duration, require_nonzero, require_unique_ids,
};

// =============================================================================
// Constants
// =============================================================================

/// Default central store pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Default directory for report artifacts.
pub const DEFAULT_REPORT_ROOT: &str = "data";

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Central store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx URL, `mysql://...` in production.
    pub url: String,

    /// Pool size (default: 8).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

// =============================================================================
// Capture Configuration
// =============================================================================

/// Capture cadence, concurrency, credential and timeouts.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Tick interval (default: 30s).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Worker count (default: 8).
    pub workers: usize,

    /// Job queue capacity (default: 1000).
    pub queue_capacity: usize,

    /// Monitoring account shared by every instance.
    pub monitor_user: String,

    /// Password for `monitor_user`; `${VAR}` placeholders are expanded.
    pub monitor_password: String,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub persist_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            monitor_user: "monitor".to_string(),
            monitor_password: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }
}

impl CaptureConfig {
    /// Session settings handed to every capture.
    pub fn settings(&self) -> CaptureSettings {
        CaptureSettings {
            credential: MonitorCredential::new(&self.monitor_user, &self.monitor_password),
            connect_timeout: self.connect_timeout,
            query_timeout: self.query_timeout,
            persist_timeout: self.persist_timeout,
        }
    }
}

impl std::fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("interval", &self.interval)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("monitor_user", &self.monitor_user)
            .field("monitor_password", &"***")
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("persist_timeout", &self.persist_timeout)
            .finish()
    }
}

// =============================================================================
// Reload / Report Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Minimum spacing between accepted reloads (default: 5s).
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Period of the automatic reload (default: 10m).
    #[serde(with = "humantime_serde")]
    pub auto_interval: Duration,

    /// Pending signal limit (default: 100).
    pub channel_capacity: usize,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            auto_interval: DEFAULT_AUTO_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory holding `<inst>/<YYYYMM>/<stamp>.html.br` artifacts.
    pub root: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_REPORT_ROOT),
        }
    }
}

// =============================================================================
// Seed Instances
// =============================================================================

/// Instance row inserted into the configuration table when missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub inst_id: i64,
    pub db_type: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub db_name: String,
}

impl InstanceConfig {
    pub fn to_instance(&self) -> Instance {
        Instance::new(
            self.inst_id,
            self.db_type.trim().to_ascii_lowercase(),
            &self.host,
            self.port,
            &self.db_name,
        )
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Central store configuration.
    pub database: DatabaseConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub reload: ReloadConfig,

    #[serde(default)]
    pub report: ReportConfig,

    /// Optional seed rows for the configuration table.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse, expand `${VAR}` placeholders and validate.
    ///
    /// # Errors
    /// Returns `ConfigError` if the YAML is malformed or invalid.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.database.url = expand_env_vars(&config.database.url);
        config.capture.monitor_password = expand_env_vars(&config.capture.monitor_password);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            invalid(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(invalid("server port must be non-zero"));
        }

        if self.database.url.trim().is_empty() {
            return Err(invalid("database url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database max_connections must be positive"));
        }

        let capture = &self.capture;
        require_duration("capture.interval", capture.interval)?;
        require_nonzero("capture.workers", capture.workers)?;
        require_nonzero("capture.queue_capacity", capture.queue_capacity)?;
        require_duration("capture.connect_timeout", capture.connect_timeout)?;
        require_duration("capture.query_timeout", capture.query_timeout)?;
        require_duration("capture.persist_timeout", capture.persist_timeout)?;
        if capture.monitor_user.trim().is_empty() {
            return Err(invalid("capture.monitor_user must not be empty"));
        }

        require_duration("reload.auto_interval", self.reload.auto_interval)?;
        require_nonzero("reload.channel_capacity", self.reload.channel_capacity)?;

        // Validate seed instances
        require_unique_ids(self.instances.iter().map(|i| i.inst_id))?;
        for inst in &self.instances {
            inst.db_type.trim().parse::<EngineKind>().map_err(|_| {
                invalid(format!(
                    "instance {}: unsupported db_type '{}'",
                    inst.inst_id, inst.db_type
                ))
            })?;
            if inst.host.trim().is_empty() || inst.port == 0 {
                return Err(invalid(format!(
                    "instance {}: host and port are required",
                    inst.inst_id
                )));
            }
        }

        Ok(())
    }

    /// Seed rows converted to instances.
    pub fn seed_instances(&self) -> Vec<Instance> {
        self.instances.iter().map(InstanceConfig::to_instance).collect()
    }
}
