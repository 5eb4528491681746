use std::{future::Future, sync::Arc};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Global gate for expensive video sub-steps (stream pulls, buffered
/// downloads, frame extraction). A plain counting semaphore: waiters are
/// served roughly FIFO, nothing stronger is promised.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Run `task` once a slot is free. The slot is released when `task`
    /// settles, whatever its output.
    pub async fn run<F>(&self, task: F) -> F::Output
    where
        F: Future,
    {
        // The semaphore is never closed; if that ever changes we would
        // rather run unthrottled than fail the request.
        let _permit = self.permits.acquire().await.ok();
        task.await
    }

    /// Like [`run`](Self::run), but gives up while queued or mid-flight
    /// once `cancel` fires. Returns `None` on cancellation.
    pub async fn run_cancellable<F>(
        &self,
        cancel: &CancellationToken,
        task: F,
    ) -> Option<F::Output>
    where
        F: Future,
    {
        cancel.run_until_cancelled(self.run(task)).await
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}
