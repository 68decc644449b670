use anyhow::{Context, Result};
use axum::Router;
use object_replicator::{
    config::{AppConfig, StoreConfig},
    handlers::AppState,
    routes,
    services::{
        health::HealthMonitor,
        replicator::Replicator,
        store::{DestinationStore, SourceReader},
        stores::{filesystem::FsStore, http::HttpSource, memory::MemoryStore},
    },
};
use std::{io::ErrorKind, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse + validate config ---
    let cfg = AppConfig::from_env_and_args().context("loading configuration")?;
    tracing::info!("Starting object-replicator with config: {:?}", cfg);

    // --- Stores ---
    let source = build_source(&cfg.source_store)?;
    let destination = build_destination(&cfg.destination_store).await?;

    // --- Engine ---
    let replicator = Replicator::new(source, destination, cfg.to_settings()?);
    let state = AppState {
        health: HealthMonitor::new(replicator.clone(), cfg.health_cache()),
        replicator: replicator.clone(),
        source_kind: cfg.source_store.kind(),
        destination_kind: cfg.destination_store.kind(),
        target_bucket: cfg.target_bucket.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr)
                .await
                .with_context(|| format!("binding {fallback_addr}"))?
        }
        Err(err) => return Err(err).with_context(|| format!("binding {addr}")),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(replicator))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn build_source(store: &StoreConfig) -> Result<Arc<dyn SourceReader>> {
    Ok(match store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Filesystem(dir) => {
            if !dir.is_dir() {
                anyhow::bail!("source directory {} does not exist", dir.display());
            }
            Arc::new(FsStore::new(dir))
        }
        StoreConfig::Http(url) => Arc::new(HttpSource::new(url)?),
    })
}

async fn build_destination(store: &StoreConfig) -> Result<Arc<dyn DestinationStore>> {
    Ok(match store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Filesystem(dir) => {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
                tracing::info!("Created destination directory at {}", dir.display());
            }
            Arc::new(FsStore::new(dir))
        }
        StoreConfig::Http(url) => anyhow::bail!("{url} is read-only and cannot be a destination"),
    })
}

/// Resolve on Ctrl+C or SIGTERM, then stop the replicator so in-flight jobs
/// abort their writes and their responses can drain.
async fn shutdown_signal(replicator: Replicator) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
    replicator.shutdown();
}
