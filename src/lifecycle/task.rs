//! Self-rescheduling background loops.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A periodic background loop owned by a component.
///
/// The next cycle is scheduled only after the previous one has fully
/// settled, so cycles never overlap. Stopping aborts the task and waits for
/// it to unwind; nothing the loop does can happen after `stop` returns.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `cycle` every `interval`.
    ///
    /// With `run_immediately` the first cycle starts right away, otherwise
    /// after one interval. The loop ends when `cycle` resolves to `false`
    /// (typically because its owner has been dropped).
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, run_immediately: bool, mut cycle: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tracing::debug!(task = name, interval_ms = interval.as_millis() as u64, "Background task started");
            if !run_immediately {
                tokio::time::sleep(interval).await;
            }
            loop {
                if !cycle().await {
                    tracing::debug!(task = name, "Background task owner gone, exiting loop");
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait until it has unwound.
    pub async fn stop(self) {
        self.handle.abort();
        match self.handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!(task = self.name, error = %e, "Background task panicked"),
        }
        tracing::debug!(task = self.name, "Background task stopped");
    }
}
