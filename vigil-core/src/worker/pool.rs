use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    WorkerError, WorkerReply, WorkerRequest,
    process::{WorkerCommand, WorkerProcess},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Workers spawned up front by [`WorkerPool::start`].
    pub min_workers: usize,
    /// Upper bound on live workers and therefore on parallel calls.
    pub max_workers: usize,
    /// Wall clock for one request/reply exchange.
    pub call_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub available_slots: usize,
    pub max_workers: usize,
}

/// Bounded pool of worker processes.
///
/// At most `max_workers` calls run at once; further callers wait for a
/// slot. A worker whose call fails for any reason other than a reported
/// error is killed and a fresh one is spawned on demand.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    name: String,
    command: WorkerCommand,
    settings: PoolSettings,
    slots: Semaphore,
    idle: Mutex<Vec<WorkerProcess>>,
    live: AtomicUsize,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Build the pool and spawn `min_workers` processes.
    pub fn start(
        name: impl Into<String>,
        command: WorkerCommand,
        settings: PoolSettings,
    ) -> Result<Self, WorkerError> {
        let max_workers = settings.max_workers.max(1);
        let settings = PoolSettings {
            min_workers: settings.min_workers.min(max_workers),
            max_workers,
            ..settings
        };
        let pool = Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                command,
                settings,
                slots: Semaphore::new(max_workers),
                idle: Mutex::new(Vec::with_capacity(max_workers)),
                live: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        };

        for _ in 0..settings.min_workers {
            let worker = pool.inner.spawn()?;
            pool.inner.idle.lock().push(worker);
        }
        info!(
            pool = %pool.inner.name,
            command = %pool.inner.command.display(),
            min = settings.min_workers,
            max = settings.max_workers,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Run one exchange on some worker, queuing while all are busy.
    ///
    /// A [`WorkerReply::Error`] is returned as [`WorkerError::Remote`] and
    /// leaves the worker in the pool.
    pub async fn call(
        &self,
        request: &WorkerRequest,
        cancel: &CancellationToken,
    ) -> Result<WorkerReply, WorkerError> {
        let inner = &self.inner;
        let _slot = cancel
            .run_until_cancelled(inner.slots.acquire())
            .await
            .ok_or(WorkerError::Cancelled)?
            .map_err(|_| WorkerError::Closed)?;

        let mut worker = inner.checkout()?;
        let timeout = inner.settings.call_timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            exchange = tokio::time::timeout(timeout, worker.roundtrip(request)) => {
                exchange.unwrap_or(Err(WorkerError::Timeout(timeout)))
            }
        };

        let outcome = match outcome {
            Ok(WorkerReply::Error { message }) => Err(WorkerError::Remote(message)),
            other => other,
        };
        match &outcome {
            Ok(_) => inner.checkin(worker),
            Err(err) if err.worker_reusable() => inner.checkin(worker),
            Err(err) => {
                if !matches!(err, WorkerError::Cancelled) {
                    warn!(
                        pool = %inner.name,
                        worker = worker.id(),
                        op = request.op(),
                        error = %err,
                        "discarding worker after failed call"
                    );
                }
                inner.discard(worker);
            }
        }
        outcome
    }

    /// Stop handing out workers and kill the idle ones. Busy workers are
    /// killed when their current call returns.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.slots.close();
        let idle = std::mem::take(&mut *inner.idle.lock());
        let count = idle.len();
        for worker in idle {
            inner.live.fetch_sub(1, Ordering::SeqCst);
            worker.terminate().await;
        }
        info!(pool = %inner.name, terminated = count, "worker pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.inner.live.load(Ordering::SeqCst),
            idle: self.inner.idle.lock().len(),
            available_slots: self.inner.slots.available_permits(),
            max_workers: self.inner.settings.max_workers,
        }
    }
}

impl PoolInner {
    fn spawn(&self) -> Result<WorkerProcess, WorkerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let worker = WorkerProcess::spawn(id, &self.command)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(worker)
    }

    /// Reuse an idle worker that is still running, else spawn one.
    fn checkout(&self) -> Result<WorkerProcess, WorkerError> {
        loop {
            let candidate = self.idle.lock().pop();
            match candidate {
                Some(mut worker) => {
                    if worker.is_alive() {
                        return Ok(worker);
                    }
                    debug!(pool = %self.name, worker = worker.id(), "idle worker died");
                    self.discard(worker);
                }
                None => return self.spawn(),
            }
        }
    }

    fn checkin(&self, worker: WorkerProcess) {
        if self.closed.load(Ordering::SeqCst) {
            self.discard(worker);
            return;
        }
        self.idle.lock().push(worker);
    }

    fn discard(&self, worker: WorkerProcess) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        // kill_on_drop reaps the process in the background.
        drop(worker);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use bytes::Bytes;

    const SCORES_LINE: &str =
        r#"{"status":"scores","scores":{"drawing":0.1,"hentai":0.0,"neutral":0.8,"porn":0.05,"sexy":0.05}}"#;

    fn script(body: &str) -> WorkerCommand {
        WorkerCommand::new("sh", vec!["-c".to_string(), body.to_string()])
    }

    fn echo_scores() -> WorkerCommand {
        script(&format!("while read line; do echo '{SCORES_LINE}'; done"))
    }

    fn settings(min: usize, max: usize) -> PoolSettings {
        PoolSettings {
            min_workers: min,
            max_workers: max,
            call_timeout: Duration::from_secs(5),
        }
    }

    fn score_request() -> WorkerRequest {
        WorkerRequest::Score {
            data: Bytes::from_static(b"jpeg"),
        }
    }

    #[tokio::test]
    async fn prespawns_min_and_reuses_workers() {
        let pool = WorkerPool::start("test", echo_scores(), settings(1, 2)).expect("pool");
        assert_eq!(pool.stats().live, 1);

        for _ in 0..3 {
            let reply = pool
                .call(&score_request(), &CancellationToken::new())
                .await
                .expect("reply");
            assert!(matches!(reply, WorkerReply::Scores { .. }));
        }
        assert_eq!(pool.stats().live, 1);
        pool.shutdown().await;
        assert_eq!(pool.stats().live, 0);
    }

    #[tokio::test]
    async fn exhausted_pool_queues_instead_of_rejecting() {
        let slow = script(&format!("while read line; do sleep 0.1; echo '{SCORES_LINE}'; done"));
        let pool = WorkerPool::start("test", slow, settings(0, 1)).expect("pool");

        let calls = (0..3).map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.call(&score_request(), &CancellationToken::new()).await
            })
        });
        for call in futures::future::join_all(calls).await {
            assert!(call.expect("join").is_ok());
        }
        assert!(pool.stats().live <= 1);
    }

    #[tokio::test]
    async fn crash_surfaces_as_error_and_worker_is_replaced() {
        let pool = WorkerPool::start("test", script("read line; exit 1"), settings(0, 1))
            .expect("pool");

        let err = pool
            .call(&score_request(), &CancellationToken::new())
            .await
            .expect_err("crash");
        assert!(matches!(err, WorkerError::Crashed { .. }), "{err:?}");
        assert_eq!(pool.stats().live, 0);
        assert_eq!(pool.stats().available_slots, 1);
    }

    #[tokio::test]
    async fn remote_errors_keep_the_worker() {
        let failing = script(
            r#"while read line; do echo '{"status":"error","message":"bad image"}'; done"#,
        );
        let pool = WorkerPool::start("test", failing, settings(1, 1)).expect("pool");

        let err = pool
            .call(&score_request(), &CancellationToken::new())
            .await
            .expect_err("remote");
        assert!(matches!(err, WorkerError::Remote(ref m) if m == "bad image"));
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn hung_worker_times_out() {
        let pool = WorkerPool::start(
            "test",
            script("read line; sleep 10"),
            PoolSettings {
                min_workers: 0,
                max_workers: 1,
                call_timeout: Duration::from_millis(100),
            },
        )
        .expect("pool");

        let err = pool
            .call(&score_request(), &CancellationToken::new())
            .await
            .expect_err("timeout");
        assert!(matches!(err, WorkerError::Timeout(_)));
        assert_eq!(pool.stats().live, 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_call() {
        let pool = WorkerPool::start("test", script("read line; sleep 10"), settings(0, 1))
            .expect("pool");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = pool.call(&score_request(), &cancel).await.expect_err("cancel");
        assert!(matches!(err, WorkerError::Cancelled));
    }

    #[tokio::test]
    async fn calls_after_shutdown_are_rejected() {
        let pool = WorkerPool::start("test", echo_scores(), settings(0, 1)).expect("pool");
        pool.shutdown().await;
        let err = pool
            .call(&score_request(), &CancellationToken::new())
            .await
            .expect_err("closed");
        assert!(matches!(err, WorkerError::Closed));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let missing = WorkerCommand::new("/nonexistent/vigil-worker", Vec::new());
        let err = WorkerPool::start("test", missing, settings(1, 1)).expect_err("spawn");
        assert!(matches!(err, WorkerError::Spawn { .. }));
    }
}
