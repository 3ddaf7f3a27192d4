//! Core data types shared by the registry, the capturers and the store.
//!
//! - [`Instance`]: one monitored database endpoint
//! - [`EngineKind`]: closed set of supported engine kinds
//! - [`SnapshotMetrics`]: numeric reduction of one capture
//! - [`SnapshotSummary`]: the row persisted once per capture

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Timestamp layout used for `create_time` columns and report headers.
pub const CREATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Declared engine kind of an instance.
///
/// MySQL-compatible brands share one capturer; OceanBase speaks the MySQL
/// wire protocol but queries its own system views, so it stays distinct.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EngineKind {
    /// Community / enterprise MySQL.
    Mysql,
    /// PolarDB for MySQL.
    Polar,
    /// TDSQL-C for MySQL.
    Tdsqlc,
    /// Oracle Database.
    Oracle,
    /// PostgreSQL.
    #[strum(to_string = "pgsql", serialize = "postgres", serialize = "postgresql")]
    Pgsql,
    /// OceanBase (MySQL mode).
    Oceanbase,
}

impl EngineKind {
    /// Whether this kind is served by the MySQL-family capturer.
    pub fn is_mysql_family(self) -> bool {
        matches!(self, Self::Mysql | Self::Polar | Self::Tdsqlc)
    }

    /// Database the monitoring session connects to.
    ///
    /// Oracle connects to the instance's own service name; the other engines
    /// use a fixed system schema.
    pub fn working_database<'a>(self, declared: &'a str) -> &'a str {
        match self {
            Self::Mysql | Self::Polar | Self::Tdsqlc => "information_schema",
            Self::Pgsql => "postgres",
            Self::Oceanbase => "oceanbase",
            Self::Oracle => declared,
        }
    }
}

/// A monitored database endpoint, as loaded from the configuration table.
///
/// The engine kind is kept as declared so an unsupported value surfaces as a
/// configuration error at capture time instead of hiding the whole row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Caller-assigned unique id.
    pub inst_id: i64,
    /// Engine kind as stored (`mysql`, `oracle`, `pgsql`, ...).
    pub db_type: String,
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Default working database / service name.
    pub db_name: String,
}

impl Instance {
    /// Create a new instance definition.
    pub fn new(
        inst_id: i64,
        db_type: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        db_name: impl Into<String>,
    ) -> Self {
        Self {
            inst_id,
            db_type: db_type.into(),
            host: host.into(),
            port,
            db_name: db_name.into(),
        }
    }

    /// `host:port`, used as the instance label in logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse the declared engine kind.
    pub fn engine_kind(&self) -> Result<EngineKind, strum::ParseError> {
        self.db_type.trim().parse()
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.inst_id, self.db_type, self.address())
    }
}

/// Numeric reduction of one capture.
///
/// Every field defaults to zero; a failed query leaves its fields at zero and
/// is reported through the summary's error log instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub act_sess_count: i64,
    pub txn_count: i64,
    pub sess_count: i64,
    pub big_query_count: i64,
    pub wait_sess_count: i64,
    pub lock_count: i64,
    pub max_query_seconds: i64,
    pub max_txn_seconds: i64,
}

/// Summary row persisted once per capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub inst_id: i64,
    /// Capture start, formatted with [`CREATE_TIME_FORMAT`].
    pub create_time: String,
    #[serde(flatten)]
    pub metrics: SnapshotMetrics,
    /// Wall-clock duration of the capture, rounded to whole seconds.
    pub duration_seconds: i64,
    /// One line per failed diagnostic query; empty when all succeeded.
    pub msg: String,
}

impl SnapshotSummary {
    /// Create an empty summary for a capture started at `started_at`.
    pub fn new(inst_id: i64, started_at: DateTime<Local>) -> Self {
        Self {
            inst_id,
            create_time: started_at.format(CREATE_TIME_FORMAT).to_string(),
            metrics: SnapshotMetrics::default(),
            duration_seconds: 0,
            msg: String::new(),
        }
    }
}
