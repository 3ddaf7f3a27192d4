//! Shared capture context handed to every job.

use std::sync::Arc;
use std::time::Duration;

use crate::capture::{MonitorCredential, capture_instance};
use crate::orchestrator::{Job, JobFactory};
use crate::report::ArtifactWriter;
use crate::storage::{Instance, SummarySink};

/// Default connect + ping budget (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-query budget (10 seconds).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default budget for persisting one summary row (5 seconds).
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Credential and timeouts for capture sessions.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub credential: MonitorCredential,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub persist_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            credential: MonitorCredential::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }
}

/// Everything a capture needs besides its instance.
#[derive(Clone)]
pub struct CaptureContext {
    pub summaries: Arc<dyn SummarySink>,
    pub artifacts: Arc<dyn ArtifactWriter>,
    pub settings: Arc<CaptureSettings>,
}

impl CaptureContext {
    pub fn new(
        summaries: Arc<dyn SummarySink>,
        artifacts: Arc<dyn ArtifactWriter>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            summaries,
            artifacts,
            settings: Arc::new(settings),
        }
    }
}

impl std::fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl JobFactory for CaptureContext {
    fn job(&self, instance: Arc<Instance>) -> Job {
        let ctx = self.clone();
        Job::new(instance.address(), async move {
            capture_instance(instance, &ctx).await;
        })
    }
}
