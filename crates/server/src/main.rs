//! vitrine server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitrine_core::config::AppConfig;
use vitrine_server::cleanup::scheduler::spawn_scheduler;
use vitrine_server::{AppState, AuditQueue, create_router};

/// How long shutdown waits for background tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Environment variables kept for compatibility with older deployments.
const LEGACY_ENV: [(&str, &str); 2] = [
    ("CLEANUP_SCHEDULE", "cleanup.schedule"),
    ("R2_PUBLIC_URL", "media.public_url"),
];

/// vitrine - image storage and orphaned image cleanup service
#[derive(Parser, Debug)]
#[command(name = "vitrined")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "VITRINE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Override the bind address from the configuration
    #[arg(long, env = "VITRINE_BIND")]
    bind: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "VITRINE_LOG_LEVEL", default_value = "info,tower_http=info")]
    log_level: String,
}

/// Layer the configuration sources: file, then legacy variables, then
/// `VITRINE_` variables (highest precedence).
fn build_figment(config_path: &Path) -> Figment {
    let mut figment = Figment::new();
    if config_path.exists() {
        figment = figment.merge(Toml::file(config_path));
    }
    for (var, key) in LEGACY_ENV {
        figment = figment.merge(Env::raw().only(&[var]).map(move |_| key.into()));
    }
    figment.merge(Env::prefixed("VITRINE_").split("__"))
}

fn has_env_config() -> bool {
    std::env::vars().any(|(key, _)| {
        (key.starts_with("VITRINE_")
            && !matches!(
                key.as_str(),
                "VITRINE_CONFIG" | "VITRINE_BIND" | "VITRINE_LOG_LEVEL"
            ))
            || LEGACY_ENV.iter().any(|(var, _)| *var == key)
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("vitrine v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional: env vars can provide everything.
    let config_path = Path::new(&args.config);
    let has_config_file = config_path.exists();
    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    if !has_config_file && !has_env_config() {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: vitrined --config /path/to/config.toml\n  \
             2. Environment variables: VITRINE_MEDIA__PUBLIC_URL=https://images.example.com \
             VITRINE_ADMIN__TOKEN_HASH=sha256:YOUR_TOKEN_HASH_HERE vitrined\n\n\
             See config/server.example.toml for example configuration."
        );
    }

    let mut config: AppConfig = build_figment(config_path)
        .extract()
        .context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    vitrine_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = vitrine_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Refuse to start against unreachable storage: every cleanup run would fail.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let metadata = vitrine_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store initialized");

    let shutdown = CancellationToken::new();
    let (audit, audit_worker) =
        AuditQueue::spawn(metadata.clone(), config.audit.queue_capacity, shutdown.clone());

    let state = AppState::new(
        config.clone(),
        storage,
        metadata,
        audit.clone(),
        shutdown.clone(),
    )
    .context("failed to initialize application state")?;

    let scheduler = match (&state.cleanup, config.cleanup.enabled) {
        (Some(service), true) => Some(spawn_scheduler(
            service.clone(),
            state.scheduler.clone(),
            audit,
            shutdown.clone(),
        )),
        (None, true) => {
            tracing::warn!("Cleanup scheduler not started: cleanup service is not initialized");
            None
        }
        (_, false) => {
            tracing::info!("Scheduled cleanup disabled");
            None
        }
    };

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Stop background work and give it a bounded time to finish.
    shutdown.cancel();
    if let Some(handle) = scheduler
        && tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err()
    {
        tracing::warn!("Cleanup scheduler did not stop in time");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, audit_worker).await.is_err() {
        tracing::warn!("Audit worker did not drain in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, cancelling `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
