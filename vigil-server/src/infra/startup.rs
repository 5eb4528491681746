use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use vigil_config::{Config, TransformBackend, WorkerPoolConfig};
use vigil_core::{
    AcquireLimits, Classifier, ConcurrencyLimiter, CoordinatorSettings,
    FfmpegFrameExtractor, HttpFetcher, InProcessTranscoder, KeyedLockRegistry,
    MediaAcquirer, NormalizeSettings, PoolSettings, PooledClassifier,
    PooledTranscoder, RequestCoordinator, ResultCache, TempJanitor, Transcoder,
    WorkerCommand, WorkerPool,
};

use crate::infra::app_state::AppState;

/// Everything `main` needs to serve and later shut down.
#[derive(Debug)]
pub struct Services {
    pub state: AppState,
    /// Started worker pools, shut down after the listener stops.
    pub pools: Vec<WorkerPool>,
    pub janitor: TempJanitor,
}

impl Services {
    pub async fn shutdown(&self) {
        for pool in &self.pools {
            pool.shutdown().await;
        }
    }
}

pub fn pool_settings(config: &WorkerPoolConfig) -> PoolSettings {
    PoolSettings {
        min_workers: config.min_workers,
        max_workers: config.max_workers,
        call_timeout: config.call_timeout,
    }
}

/// Wire the coordinator and its collaborators from `config`.
///
/// Must run inside a Tokio runtime: worker pools spawn their minimum
/// processes immediately.
pub async fn build_services(config: &Config) -> Result<Services> {
    let work_dir = &config.acquire.work_dir;
    tokio::fs::create_dir_all(work_dir).await.with_context(|| {
        format!("failed to create work directory {}", work_dir.display())
    })?;

    let fetcher = HttpFetcher::new(
        &config.acquire.user_agent,
        config.acquire.download_timeout,
    )
    .context("failed to build HTTP client")?;
    let extractor = FfmpegFrameExtractor::new(
        &config.ffmpeg.ffmpeg_path,
        config.acquire.seek_offset,
        config.acquire.download_timeout,
    );
    let limiter = ConcurrencyLimiter::new(config.limits.max_in_flight);
    let acquirer = MediaAcquirer::new(
        Arc::new(fetcher),
        Arc::new(extractor),
        limiter,
        AcquireLimits {
            max_bytes: config.acquire.max_bytes,
            download_timeout: config.acquire.download_timeout,
            stream_timeout: config.acquire.stream_timeout,
            max_redirects: config.acquire.max_redirects,
        },
        config.acquire.mode,
    );

    let mut pools = Vec::new();
    let normalize = NormalizeSettings {
        dimension: config.transform.input_dimension,
        jpeg_quality: config.transform.jpeg_quality,
    };

    let transcoder: Arc<dyn Transcoder> = match config.transform.backend {
        TransformBackend::InProcess => Arc::new(InProcessTranscoder::new(normalize)),
        TransformBackend::Workers => {
            let program = std::env::current_exe()
                .context("failed to resolve the server executable for transform workers")?;
            let command = WorkerCommand::new(
                program,
                vec![
                    "worker".to_string(),
                    "--dimension".to_string(),
                    normalize.dimension.to_string(),
                    "--quality".to_string(),
                    normalize.jpeg_quality.to_string(),
                ],
            );
            let pool = WorkerPool::start(
                "transform",
                command,
                pool_settings(&config.transform.workers),
            )
            .context("failed to start transform workers")?;
            pools.push(pool.clone());
            Arc::new(PooledTranscoder::new(pool))
        }
    };

    let Some((program, args)) = config.classifier.command.split_first() else {
        bail!("classifier.command is empty");
    };
    let classifier_pool = WorkerPool::start(
        "classifier",
        WorkerCommand::new(program, args.to_vec()),
        pool_settings(&config.classifier.workers),
    )
    .context("failed to start classifier workers")?;
    pools.push(classifier_pool.clone());
    let classifier: Arc<dyn Classifier> =
        Arc::new(PooledClassifier::new(classifier_pool));

    let coordinator = RequestCoordinator::new(
        ResultCache::new(config.cache.max_items, config.cache.ttl),
        KeyedLockRegistry::new(config.locks.max_items, config.locks.ttl),
        acquirer,
        transcoder,
        classifier,
        CoordinatorSettings {
            flag_threshold: config.classifier.flag_threshold,
            max_inline_bytes: config.acquire.max_bytes,
            work_dir: work_dir.clone(),
        },
    );

    if config.auth.bearer_token.is_none() {
        warn!("API authentication disabled");
    }
    info!(
        mode = %config.acquire.mode,
        backend = ?config.transform.backend,
        max_in_flight = config.limits.max_in_flight,
        work_dir = %work_dir.display(),
        "services ready"
    );

    Ok(Services {
        state: AppState::new(coordinator, config.auth.bearer_token.clone()),
        pools,
        janitor: TempJanitor::new(
            work_dir.clone(),
            config.janitor.interval,
            config.janitor.max_age,
        ),
    })
}
