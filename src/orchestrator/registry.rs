//! Process-wide snapshot of configured instances.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::storage::{Instance, InstanceSource, StorageError};

/// Default budget for reading the configuration table (10 seconds).
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable list of instances, replaced wholesale on reload.
pub type Snapshot = Arc<[Arc<Instance>]>;

/// Errors from a registry load.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read instances: {0}")]
    Store(#[from] StorageError),

    #[error("reading instances timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The snapshot now holds this many instances.
    Replaced(usize),
    /// The store returned no rows; the previous snapshot stays.
    KeptPrevious,
}

/// Holder of the current [`Snapshot`].
///
/// Readers clone the published `Arc` and never wait behind a loader.
pub struct InstanceRegistry {
    source: Arc<dyn InstanceSource>,
    load_timeout: Duration,
    snapshot: watch::Sender<Option<Snapshot>>,
}

impl InstanceRegistry {
    pub fn new(source: Arc<dyn InstanceSource>) -> Self {
        Self::with_timeout(source, DEFAULT_LOAD_TIMEOUT)
    }

    pub fn with_timeout(source: Arc<dyn InstanceSource>, load_timeout: Duration) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            source,
            load_timeout,
            snapshot,
        }
    }

    /// Current snapshot; `None` before the first successful load.
    pub fn current(&self) -> Option<Snapshot> {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshot.subscribe()
    }

    /// Read every configuration row and publish a new snapshot.
    ///
    /// # Errors
    /// Store failures and timeouts leave the previous snapshot untouched.
    pub async fn load(&self) -> Result<LoadOutcome, RegistryError> {
        let rows = match tokio::time::timeout(self.load_timeout, self.source.list_instances()).await
        {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to load instances, keeping previous snapshot");
                return Err(e.into());
            }
            Err(_) => {
                tracing::error!(
                    timeout = ?self.load_timeout,
                    "Loading instances timed out, keeping previous snapshot"
                );
                return Err(RegistryError::Timeout(self.load_timeout));
            }
        };

        if rows.is_empty() {
            tracing::warn!("No instances configured, keeping previous snapshot");
            return Ok(LoadOutcome::KeptPrevious);
        }

        for inst in &rows {
            tracing::debug!(
                inst_id = inst.inst_id,
                db_type = %inst.db_type,
                instance = %inst.address(),
                db_name = %inst.db_name,
                "Instance loaded"
            );
        }

        let count = rows.len();
        let snapshot: Snapshot = rows.into_iter().map(Arc::new).collect();
        self.snapshot.send_replace(Some(snapshot));
        tracing::info!(count, "Instance registry replaced");
        Ok(LoadOutcome::Replaced(count))
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field(
                "instances",
                &self.snapshot.borrow().as_ref().map(|s| s.len()),
            )
            .field("load_timeout", &self.load_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::storage::{Instance, InstanceSource, StorageError};

    /// Source replaying queued answers, then repeating the last one.
    #[derive(Debug, Default)]
    pub struct QueuedSource {
        answers: Mutex<Vec<Result<Vec<Instance>, String>>>,
        calls: Mutex<usize>,
    }

    impl QueuedSource {
        pub fn new(answers: Vec<Result<Vec<Instance>, String>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                calls: Mutex::new(0),
            }
        }

        pub fn fixed(instances: Vec<Instance>) -> Self {
            Self::new(vec![Ok(instances)])
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl InstanceSource for QueuedSource {
        async fn list_instances(&self) -> Result<Vec<Instance>, StorageError> {
            *self.calls.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            let answer = if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers.first().cloned().unwrap_or(Ok(Vec::new()))
            };
            answer.map_err(StorageError::Internal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::QueuedSource;
    use super::*;
    use async_trait::async_trait;

    fn fleet() -> Vec<Instance> {
        vec![
            Instance::new(1, "mysql", "10.0.0.1", 3306, ""),
            Instance::new(2, "oracle", "10.0.0.2", 1521, "ORCL"),
        ]
    }

    #[tokio::test]
    async fn test_current_is_none_before_load() {
        let registry = InstanceRegistry::new(Arc::new(QueuedSource::fixed(fleet())));
        assert!(registry.current().is_none());
    }

    #[tokio::test]
    async fn test_load_replaces_snapshot() {
        let registry = InstanceRegistry::new(Arc::new(QueuedSource::fixed(fleet())));
        let mut updates = registry.subscribe();

        assert_eq!(registry.load().await.unwrap(), LoadOutcome::Replaced(2));
        let snapshot = registry.current().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].db_name, "ORCL");
        assert!(updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_store_error_keeps_previous() {
        let source = QueuedSource::new(vec![Ok(fleet()), Err("connection reset".into())]);
        let registry = InstanceRegistry::new(Arc::new(source));

        registry.load().await.unwrap();
        let before = registry.current().unwrap();

        let err = registry.load().await.unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)));
        assert!(Arc::ptr_eq(&before, &registry.current().unwrap()));
    }

    #[tokio::test]
    async fn test_empty_result_keeps_previous() {
        let source = QueuedSource::new(vec![Ok(fleet()), Ok(Vec::new())]);
        let registry = InstanceRegistry::new(Arc::new(source));

        registry.load().await.unwrap();
        assert_eq!(registry.load().await.unwrap(), LoadOutcome::KeptPrevious);
        assert_eq!(registry.current().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_first_load_stays_none() {
        let registry = InstanceRegistry::new(Arc::new(QueuedSource::fixed(Vec::new())));
        assert_eq!(registry.load().await.unwrap(), LoadOutcome::KeptPrevious);
        assert!(registry.current().is_none());
    }

    struct StalledSource;

    #[async_trait]
    impl InstanceSource for StalledSource {
        async fn list_instances(&self) -> Result<Vec<Instance>, StorageError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let registry = InstanceRegistry::new(Arc::new(StalledSource));
        let err = registry.load().await.unwrap_err();
        assert!(matches!(err, RegistryError::Timeout(d) if d == DEFAULT_LOAD_TIMEOUT));
        assert!(registry.current().is_none());
    }
}
