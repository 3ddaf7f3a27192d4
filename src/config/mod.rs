//! Configuration module for dbsnap.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Central store settings (URL, pool size)
//! - Capture cadence, concurrency, credential and timeouts
//! - Reload debouncing and report storage
//! - Optional seed instances

mod app;
mod validation;

pub use app::{
    AppConfig, CaptureConfig, DatabaseConfig, InstanceConfig, ReloadConfig, ReportConfig,
    ServerConfig,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_MAX_CONNECTIONS, DEFAULT_REPORT_ROOT};
