//! Reactive Cache - HTTP server binary
//!
//! Serves one cache engine, persisted to a JSON file store, over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reactive_cache::{create_router, AppState, CacheConfig, CacheEngine, JsonFileStore};

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the JSON file store and create the engine
/// 4. Wait for the initial load from the store
/// 5. Serve the HTTP binding until SIGINT/SIGTERM
/// 6. Shut the engine down, waiting for queued store writes to drain
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reactive_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Reactive Cache Server");

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: namespace={}, default_ttl={}ms, max_entries={:?}, max_bytes={:?}, port={}",
        config.namespace,
        config.default_ttl.as_millis(),
        config.max_entries,
        config.max_bytes,
        config.server_port
    );

    let store = JsonFileStore::new(&config.data_dir, &config.namespace);
    let port = config.server_port;
    let engine = CacheEngine::new(config, Arc::new(store), None);
    engine.ready().await?;
    info!(entries = engine.size()?, "Initial load complete");

    let app = create_router(AppState::new(engine.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    engine.shutdown().await?;
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
