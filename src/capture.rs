//! Capture Engine
//!
//! One capture connects to a monitored instance, runs the dialect's fixed
//! battery of diagnostic queries, reduces the tables to metrics, renders a
//! report and persists the summary.
//!
//! ## Components
//!
//! - [`Dialect`]: per-engine queries, reduction and report layout
//! - [`QueryRunner`] / [`Session`]: live connection to one instance
//! - [`Capturer`]: closed set of capturers selected by engine kind
//! - [`run_capture`]: the shared algorithm every capturer goes through
//! - [`capture_instance`]: full lifecycle of one job

mod context;
mod engine;
mod mysql;
mod oceanbase;
mod oracle;
mod postgres;
pub mod reduce;
mod session;
mod traits;

pub use context::{
    CaptureContext, CaptureSettings, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PERSIST_TIMEOUT,
    DEFAULT_QUERY_TIMEOUT,
};
pub use engine::{CaptureOutcome, CaptureTarget, Capturer, capture_instance, run_capture};
pub use mysql::MySql;
pub use oceanbase::OceanBase;
pub use oracle::Oracle;
pub use postgres::Postgres;
pub use session::{MonitorCredential, OracleSession, Session};
pub use traits::{
    CaptureError, DiagnosticQuery, Dialect, FollowUpQuery, NULL_CELL, QueryError, QueryResults,
    QueryRunner, RawTable, cell,
};
