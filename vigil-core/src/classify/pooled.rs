use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use vigil_model::Probabilities;

use super::Classifier;
use crate::{
    error::{PipelineError, Result},
    worker::{WorkerError, WorkerPool, WorkerReply, WorkerRequest},
};

/// [`Classifier`] backed by a pool of model worker processes.
#[derive(Debug, Clone)]
pub struct PooledClassifier {
    pool: WorkerPool,
}

impl PooledClassifier {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    async fn exchange(
        &self,
        request: WorkerRequest,
        cancel: &CancellationToken,
    ) -> Result<Probabilities> {
        let reply = self
            .pool
            .call(&request, cancel)
            .await
            .map_err(|err| match err {
                WorkerError::Cancelled => PipelineError::Cancelled,
                other => PipelineError::Classification(other.to_string()),
            })?;

        match reply {
            WorkerReply::Scores { scores } => {
                trace!(?scores, "classifier replied");
                Probabilities::from_map(&scores)
                    .map_err(|err| PipelineError::Classification(err.to_string()))
            }
            other => Err(PipelineError::Classification(format!(
                "unexpected worker reply `{}`",
                other.kind()
            ))),
        }
    }
}

#[async_trait]
impl Classifier for PooledClassifier {
    async fn score(&self, data: Bytes, cancel: &CancellationToken) -> Result<Probabilities> {
        self.exchange(WorkerRequest::Score { data }, cancel).await
    }

    async fn score_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Probabilities> {
        let request = WorkerRequest::ScoreFile {
            path: path.to_path_buf(),
        };
        self.exchange(request, cancel).await
    }
}
