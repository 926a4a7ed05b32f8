//! Periodic background tasks.
//!
//! Heartbeats and expiry sweeps all run on the same scaffolding: a spawned
//! task driven by a `tokio::time::interval` that is aborted when its handle
//! is dropped.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::clock;

/// Shortest period accepted by [`PeriodicTask::spawn`].
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a periodic background task.
///
/// The task stops when the handle is dropped.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `job` to run once per `period`.
    ///
    /// The period is clamped to at least [`MIN_PERIOD`] and at most thirty
    /// years. The first run happens one full period after spawning. A run that
    /// overshoots the period delays the next one instead of bursting.
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.clamp(MIN_PERIOD, clock::FAR_FUTURE);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(clock::deadline(Instant::now(), period), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!(task = name, "Periodic tick");
                job().await;
            }
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Spawned periodic task");

        Self {
            name,
            period,
            handle,
        }
    }

    /// Get the task name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the period between runs.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stop the task.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Check if the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
        debug!(task = self.name, "Stopped periodic task");
    }
}
