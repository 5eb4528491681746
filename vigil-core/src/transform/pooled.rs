use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{Transcoder, processing_error};
use crate::{
    error::{PipelineError, Result},
    worker::{WorkerPool, WorkerReply, WorkerRequest},
};

/// [`Transcoder`] that dispatches to a pool of transform workers.
#[derive(Debug, Clone)]
pub struct PooledTranscoder {
    pool: WorkerPool,
}

impl PooledTranscoder {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

fn unexpected(reply: &WorkerReply) -> PipelineError {
    PipelineError::Processing(format!("unexpected worker reply `{}`", reply.kind()))
}

#[async_trait]
impl Transcoder for PooledTranscoder {
    async fn normalize(&self, data: Bytes, cancel: &CancellationToken) -> Result<Bytes> {
        let reply = self
            .pool
            .call(&WorkerRequest::Normalize { data }, cancel)
            .await
            .map_err(processing_error)?;
        match reply {
            WorkerReply::Normalized { data } => Ok(data),
            other => Err(unexpected(&other)),
        }
    }

    async fn normalize_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let request = WorkerRequest::NormalizeFile {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        };
        let reply = self
            .pool
            .call(&request, cancel)
            .await
            .map_err(processing_error)?;
        match reply {
            WorkerReply::Written { bytes, .. } => Ok(bytes),
            other => Err(unexpected(&other)),
        }
    }
}
