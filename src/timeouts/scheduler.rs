//! Periodic sweep over the timeout queue.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::timeouts::queue::TimeoutQueue;

/// Timeout queue plus the background task that ticks it.
///
/// The tick task only holds a weak reference to the queue and is aborted
/// when the scheduler is dropped, so it never outlives the server that
/// created it.
#[derive(Debug)]
pub struct TimeoutScheduler {
    queue: Arc<TimeoutQueue>,
    ticker: JoinHandle<()>,
}

impl TimeoutScheduler {
    /// Start ticking every `granularity`. Must be called within a Tokio runtime.
    pub fn start(granularity: Duration) -> Self {
        let queue = Arc::new(TimeoutQueue::new());
        let weak = Arc::downgrade(&queue);

        let ticker = tokio::spawn(async move {
            let mut interval = time::interval(granularity);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(queue) = weak.upgrade() else {
                    break;
                };
                let fired = queue.tick(Instant::now());
                if fired > 0 {
                    tracing::debug!(fired, "Timeouts expired");
                }
            }
        });

        tracing::debug!(granularity_ms = granularity.as_millis() as u64, "Timeout scheduler started");

        Self { queue, ticker }
    }

    /// Shared handle to the queue, for close hooks.
    pub fn queue(&self) -> Arc<TimeoutQueue> {
        Arc::clone(&self.queue)
    }
}

impl Deref for TimeoutScheduler {
    type Target = TimeoutQueue;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}
