//! # Vigil Server
//!
//! Classifies images and videos behind URLs or inline payloads into
//! drawing / hentai / neutral / porn / sexy probabilities.
//!
//! `vigil-server` serves the HTTP API; `vigil-server worker` runs one
//! image transform worker on stdin/stdout and is spawned by the server
//! itself when `transform.backend = "workers"`.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_config::{ConfigLoad, ConfigLoader};
use vigil_core::NormalizeSettings;
use vigil_server::{infra::startup::build_services, routes, worker};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "vigil-server")]
#[command(about = "Media classification endpoint with deduplicated, bounded acquisition")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to a vigil.toml configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the image transform protocol on stdin/stdout
    Worker(WorkerArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct WorkerArgs {
    /// Edge length of the square output image
    #[arg(long, default_value_t = 224)]
    dimension: u32,

    /// JPEG quality of the output image
    #[arg(long, default_value_t = 90)]
    quality: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Worker(args)) => run_worker(args).await,
        None => run_server(cli.serve).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_worker(args: WorkerArgs) -> anyhow::Result<()> {
    // stdout carries the protocol
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = NormalizeSettings {
        dimension: args.dimension,
        jpeg_quality: args.quality,
    };
    worker::serve(
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        settings,
    )
    .await
    .context("transform worker protocol failed")
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = args.env_file {
        loader = loader.with_env_file(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    init_tracing();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    let services = build_services(&config).await?;
    let shutdown = CancellationToken::new();
    let janitor = services.janitor.clone().spawn(shutdown.clone());

    let router = routes::create_router(services.state.clone());
    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "vigil server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(err) = janitor.await {
        warn!(error = %err, "temp janitor stopped abnormally");
    }
    services.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
