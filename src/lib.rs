//! dbsnap - Database Diagnostic Snapshots
//!
//! Periodically samples live diagnostic state (active sessions, open
//! transactions, locks, connection counts) from a fleet of MySQL-family,
//! Oracle, PostgreSQL and OceanBase instances. Each sample becomes a
//! compressed HTML report plus one summary row in the central store.
//!
//! # Architecture
//!
//! - **Orchestrator**: minute-aligned scheduler, bounded worker pool,
//!   debounced registry reloads
//! - **Capture**: per-dialect query batteries, reductions and report layouts
//! - **Report**: askama rendering and brotli artifacts on disk
//! - **Storage**: central store behind a sqlx `Any` pool
//! - **Server**: health probes, reload trigger, summary listing, artifacts
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dbsnap::{CaptureContext, CaptureSettings, CentralStore, FsArtifactWriter, capture_instance};
//!
//! let store = CentralStore::connect("mysql://dbsnap:pw@store:3306/dbsnap", 8).await?;
//! let ctx = CaptureContext::new(
//!     Arc::new(store.clone()),
//!     Arc::new(FsArtifactWriter::new("data")),
//!     CaptureSettings::default(),
//! );
//! for instance in store.list_instances().await? {
//!     capture_instance(Arc::new(instance), &ctx).await;
//! }
//! ```

pub mod capture;
pub mod config;
pub mod orchestrator;
pub mod report;
pub mod server;
pub mod storage;

pub use capture::{
    CaptureContext, CaptureError, CaptureOutcome, CaptureSettings, Capturer, MonitorCredential,
    capture_instance,
};
pub use config::{AppConfig, ConfigError};
pub use orchestrator::{InstanceRegistry, Scheduler, Shutdown, WorkerPool};
pub use report::{ArtifactKey, ArtifactWriter, FsArtifactWriter, ReportError};
pub use storage::{CentralStore, EngineKind, Instance, SnapshotSummary, StorageError};
