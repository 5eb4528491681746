//! Out-of-process workers for CPU-bound stages.
//!
//! A worker is any executable that reads one JSON request per line on
//! stdin and answers with one JSON reply per line on stdout. The
//! [`WorkerPool`] keeps a bounded set of them alive and hands them out to
//! callers; callers beyond the bound queue.

mod pool;
mod process;
pub mod protocol;

use std::time::Duration;

use thiserror::Error;

pub use pool::{PoolSettings, PoolStats, WorkerPool};
pub use process::WorkerCommand;
pub use protocol::{WorkerReply, WorkerRequest};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {id} crashed: {reason}")]
    Crashed { id: u64, reason: String },

    #[error("worker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("worker reported: {0}")]
    Remote(String),

    #[error("worker call cancelled")]
    Cancelled,

    #[error("worker pool is shut down")]
    Closed,
}

impl WorkerError {
    /// Whether the worker that produced this error can be reused.
    pub fn worker_reusable(&self) -> bool {
        matches!(self, WorkerError::Remote(_))
    }
}
