//! Clock-aligned scheduler submitting one job per instance per tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, TimeZone, Timelike};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::{InstanceRegistry, Job, PoolSubmitter, ShutdownSignal};
use crate::storage::Instance;

/// Default tick interval (30 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Errors constructing a scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler interval must be greater than zero")]
    InvalidInterval,
}

/// Builds the job for one instance at one tick.
pub trait JobFactory: Send + Sync + 'static {
    fn job(&self, instance: Arc<Instance>) -> Job;
}

/// First wall-clock minute boundary after `now`.
///
/// A `now` already on second zero maps to the following minute.
pub fn next_minute_boundary<Tz: TimeZone>(now: DateTime<Tz>) -> DateTime<Tz> {
    let minute = TimeDelta::minutes(1);
    now.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .map_or_else(|| now.clone() + minute, |t| t + minute)
}

/// Fires on a fixed interval aligned to the minute.
#[derive(Clone)]
pub struct Scheduler {
    interval: Duration,
    registry: Arc<InstanceRegistry>,
    submitter: PoolSubmitter,
    jobs: Arc<dyn JobFactory>,
}

impl Scheduler {
    /// # Errors
    /// `SchedulerError::InvalidInterval` for a zero interval.
    pub fn new(
        interval: Duration,
        registry: Arc<InstanceRegistry>,
        submitter: PoolSubmitter,
        jobs: Arc<dyn JobFactory>,
    ) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }
        Ok(Self {
            interval,
            registry,
            submitter,
            jobs,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next minute boundary, then tick every interval until
    /// shutdown. Outstanding submissions are awaited before returning.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let now = Local::now();
        let boundary = next_minute_boundary(now);
        let wait = (boundary - now).to_std().unwrap_or_default();
        tracing::info!(
            interval = ?self.interval,
            first_tick = %boundary.format("%H:%M:%S"),
            "Scheduler waiting for minute alignment"
        );

        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Scheduler stopped before first tick");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut submissions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    submissions.spawn(async move { scheduler.tick().await });
                }
                Some(done) = submissions.join_next(), if !submissions.is_empty() => {
                    log_submission(done);
                }
            }
        }

        tracing::info!(pending = submissions.len(), "Scheduler stopping");
        while let Some(done) = submissions.join_next().await {
            log_submission(done);
        }
        tracing::info!("Scheduler stopped");
    }

    /// Submit one job per instance of the current snapshot.
    ///
    /// Returns the number of jobs submitted.
    pub async fn tick(&self) -> usize {
        let Some(snapshot) = self.registry.current().filter(|s| !s.is_empty()) else {
            tracing::warn!("No instances registered, nothing to capture");
            return 0;
        };

        let mut submitted = 0;
        for instance in snapshot.iter() {
            let job = self.jobs.job(Arc::clone(instance));
            if let Err(e) = self.submitter.submit(job).await {
                tracing::error!(error = %e, instance = %instance.address(), "Job submission failed");
                break;
            }
            submitted += 1;
        }

        tracing::debug!(submitted, instances = snapshot.len(), "Tick submitted");
        submitted
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

fn log_submission(done: Result<usize, tokio::task::JoinError>) {
    if let Err(e) = done {
        tracing::error!(error = %e, "Tick submission task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::registry::testing::QueuedSource;
    use crate::orchestrator::{Shutdown, WorkerPool};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        ran: Arc<AtomicUsize>,
    }

    impl JobFactory for CountingFactory {
        fn job(&self, instance: Arc<Instance>) -> Job {
            self.created.fetch_add(1, Ordering::SeqCst);
            let ran = Arc::clone(&self.ran);
            Job::new(instance.address(), async move {
                ran.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    fn fleet() -> Vec<Instance> {
        vec![
            Instance::new(1, "mysql", "10.0.0.1", 3306, ""),
            Instance::new(2, "pgsql", "10.0.0.2", 5432, ""),
            Instance::new(3, "oceanbase", "10.0.0.3", 2881, ""),
        ]
    }

    async fn loaded_registry(instances: Vec<Instance>) -> Arc<InstanceRegistry> {
        let registry = Arc::new(InstanceRegistry::new(Arc::new(QueuedSource::fixed(
            instances,
        ))));
        let _ = registry.load().await;
        registry
    }

    #[test]
    fn test_next_minute_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 17).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 1, 0).unwrap();
        assert_eq!(next_minute_boundary(now), expected);

        let late = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap() + TimeDelta::milliseconds(900);
        let expected = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        assert_eq!(next_minute_boundary(late), expected);

        let on_boundary = Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 6, 0).unwrap();
        assert_eq!(next_minute_boundary(on_boundary), expected);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let registry = loaded_registry(fleet()).await;
        let pool = WorkerPool::new(1, 1);
        let result = Scheduler::new(
            Duration::ZERO,
            registry,
            pool.submitter().unwrap(),
            Arc::new(CountingFactory::default()),
        );
        assert_eq!(result.unwrap_err(), SchedulerError::InvalidInterval);
    }

    #[tokio::test]
    async fn test_tick_submits_one_job_per_instance() {
        let registry = loaded_registry(fleet()).await;
        let factory = Arc::new(CountingFactory::default());
        let mut pool = WorkerPool::new(2, 10);
        pool.start();

        let scheduler = Scheduler::new(
            DEFAULT_INTERVAL,
            registry,
            pool.submitter().unwrap(),
            factory.clone(),
        )
        .unwrap();

        assert_eq!(scheduler.tick().await, 3);
        assert_eq!(scheduler.tick().await, 3);
        drop(scheduler);
        pool.join().await;

        assert_eq!(factory.created.load(Ordering::SeqCst), 6);
        assert_eq!(factory.ran.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_tick_with_empty_registry() {
        let registry = loaded_registry(Vec::new()).await;
        let factory = Arc::new(CountingFactory::default());
        let pool = WorkerPool::new(1, 1);
        let scheduler = Scheduler::new(
            DEFAULT_INTERVAL,
            registry,
            pool.submitter().unwrap(),
            factory.clone(),
        )
        .unwrap();

        assert_eq!(scheduler.tick().await, 0);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_every_interval_after_alignment() {
        let registry = loaded_registry(fleet()).await;
        let factory = Arc::new(CountingFactory::default());
        let mut pool = WorkerPool::new(2, 100);
        pool.start();
        let shutdown = Shutdown::new();

        let scheduler = Scheduler::new(
            DEFAULT_INTERVAL,
            registry,
            pool.submitter().unwrap(),
            factory.clone(),
        )
        .unwrap();
        let handle = tokio::spawn(scheduler.run(shutdown.signal()));

        // The first tick lands within a minute.
        tokio::time::sleep(Duration::from_secs(61)).await;
        let first = factory.created.load(Ordering::SeqCst);
        assert!(first >= 3);

        // Any 30s window holds exactly one tick.
        tokio::time::sleep(DEFAULT_INTERVAL).await;
        assert_eq!(factory.created.load(Ordering::SeqCst), first + 3);

        shutdown.trigger();
        handle.await.unwrap();
        pool.join().await;
        assert_eq!(factory.ran.load(Ordering::SeqCst), first + 3);
    }
}
