//! Background eviction of stale window records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::memory::Evict;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Default age after which a record is dropped, regardless of its window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Handle to a running sweeper task.
///
/// The task runs until [`Sweeper::shutdown`] is called or the handle is
/// dropped.
pub struct Sweeper {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a task that evicts stale records from `store` every `interval`.
    pub fn spawn<S>(store: Arc<S>, interval: Duration, retention: Duration) -> Self
    where
        S: Evict + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            info!(
                interval_secs = interval.as_secs(),
                retention_secs = retention.as_secs(),
                "Window store sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.evict_stale(retention);
                        debug!(removed = removed, "Swept stale window records");
                    }
                    _ = &mut stop_rx => break,
                }
            }

            info!("Window store sweeper stopped");
        });

        Self {
            stop: Some(stop_tx),
            task,
        }
    }

    /// Stop the sweeper and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
