//! Capture Orchestration
//!
//! Decides when captures run and how many run at once.
//!
//! - [`InstanceRegistry`]: atomically replaced snapshot of configured instances
//! - [`ReloadDebouncer`]: collapses reload bursts into one load per window
//! - [`Scheduler`]: minute-aligned ticks, one job per instance per tick
//! - [`WorkerPool`]: bounded queue drained by a fixed number of workers

mod pool;
mod registry;
mod reload;
mod scheduler;

use tokio::sync::watch;

pub use pool::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, Job, PoolError, PoolSubmitter, WorkerPool};
pub use registry::{DEFAULT_LOAD_TIMEOUT, InstanceRegistry, LoadOutcome, RegistryError, Snapshot};
pub use reload::{
    DEFAULT_AUTO_INTERVAL, DEFAULT_CHANNEL_CAPACITY, DEFAULT_DEBOUNCE, ReloadDebouncer,
    ReloadReceiver, ReloadTrigger, reload_channel, spawn_auto_reload,
};
pub use scheduler::{DEFAULT_INTERVAL, JobFactory, Scheduler, SchedulerError, next_minute_boundary};

/// Owner side of the process shutdown flag.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// New listener for long-running tasks.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown was triggered or the owner is gone.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_wakes_every_listener() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.signal();
        let mut b = a.clone();
        assert!(!a.is_triggered());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), async {
            a.wait().await;
            b.wait().await;
        })
        .await
        .unwrap();
        assert!(b.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_owner_counts_as_shutdown() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }
}
