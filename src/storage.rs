//! Storage Layer
//!
//! Central store access over a sqlx `Any` pool:
//! - **Configuration**: instance rows read by the registry on every reload
//! - **Summaries**: one row appended per capture, listed by the dashboard API
//!
//! # Components
//!
//! - [`CentralStore`]: the store facade, implementing both collaborator traits
//! - [`InstanceSource`] / [`SummarySink`]: seams the capture engine depends on
//! - [`StorePool`](db::StorePool): pool wrapper and sizing rules

mod central;
pub mod db;
mod error;
mod schema;
mod traits;
mod types;

pub use central::CentralStore;
pub use error::StorageError;
pub use schema::init_schema;
pub use traits::{InstanceSource, SummarySink};
pub use types::{CREATE_TIME_FORMAT, EngineKind, Instance, SnapshotMetrics, SnapshotSummary};
