//! Collaborator seams between the capture engine and the central store.

use async_trait::async_trait;

use crate::storage::{Instance, SnapshotSummary, StorageError};

/// Source of instance configuration rows.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    /// Read every configured instance.
    async fn list_instances(&self) -> Result<Vec<Instance>, StorageError>;
}

/// Destination for per-capture summary rows.
#[async_trait]
pub trait SummarySink: Send + Sync {
    /// Persist one summary row.
    async fn insert_summary(&self, summary: &SnapshotSummary) -> Result<(), StorageError>;
}
