//! Reload signals and their debouncer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::orchestrator::{InstanceRegistry, ShutdownSignal};

/// Default signal channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default debounce window (5 seconds).
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Default period of the automatic reload (10 minutes).
pub const DEFAULT_AUTO_INTERVAL: Duration = Duration::from_secs(600);

/// Create a bounded reload channel; zero capacity is clamped to 1.
pub fn reload_channel(capacity: usize) -> (ReloadTrigger, ReloadReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ReloadTrigger { tx }, ReloadReceiver { rx })
}

/// Sending half; cloned into the HTTP surface and the auto-reload task.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: mpsc::Sender<()>,
}

impl ReloadTrigger {
    /// Queue a reload signal without waiting.
    ///
    /// Returns `false` when the signal was dropped.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::warn!("Reload channel full, signal dropped");
                false
            }
            Err(TrySendError::Closed(())) => {
                tracing::warn!("Reload channel closed, signal dropped");
                false
            }
        }
    }
}

/// Receiving half, consumed by [`ReloadDebouncer::run`].
#[derive(Debug)]
pub struct ReloadReceiver {
    rx: mpsc::Receiver<()>,
}

/// Collapses bursts of signals into at most one load per window.
#[derive(Debug)]
pub struct ReloadDebouncer {
    registry: Arc<InstanceRegistry>,
    window: Duration,
    last_accepted: Option<Instant>,
}

impl ReloadDebouncer {
    pub fn new(registry: Arc<InstanceRegistry>, window: Duration) -> Self {
        Self {
            registry,
            window,
            last_accepted: None,
        }
    }

    /// Consume signals until shutdown or until every trigger is gone.
    pub async fn run(mut self, mut signals: ReloadReceiver, mut shutdown: ShutdownSignal) {
        tracing::info!(window = ?self.window, "Reload debouncer started");
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                signal = signals.rx.recv() => match signal {
                    Some(()) => {
                        self.on_signal().await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!("Reload debouncer stopped");
    }

    /// Handle one signal; returns whether it triggered a load.
    async fn on_signal(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_accepted
            && now.duration_since(last) < self.window
        {
            tracing::warn!("Reload requested too frequently, ignored");
            return false;
        }

        // Accepted even when the load below fails.
        self.last_accepted = Some(now);
        if let Err(e) = self.registry.load().await {
            tracing::error!(error = %e, "Reload failed");
        }
        true
    }
}

/// Send one signal now, then one every `period`, until shutdown.
pub fn spawn_auto_reload(
    trigger: ReloadTrigger,
    period: Duration,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    tracing::debug!("Automatic reload requested");
                    trigger.request();
                }
            }
        }
        tracing::debug!("Automatic reload stopped");
    })
}
