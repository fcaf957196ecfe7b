//! kv_guard - Coordination server
//!
//! Serves the cache, lock and rate-limit primitives over HTTP on top of the
//! configured store backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kv_guard::api::create_router;
use kv_guard::{spawn_cleanup_task, AppState, Config, MemoryStore, RedisStore, StoreBackend};

/// Upper bound on a single Redis round trip.
const REDIS_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Main entry point for the coordination server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the configured store (memory or Redis)
/// 4. Start the TTL cleanup task when the store is in memory
/// 5. Create the Axum router and serve until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kv_guard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting kv_guard coordination server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: backend={:?}, port={}, default_ttl={}s, rate_limit={}/{}s, fail_policy={:?}",
        config.store_backend,
        config.server_port,
        config.default_ttl,
        config.rate_limit_max_requests,
        config.rate_limit_window,
        config.rate_limit_fail_policy
    );

    let (state, cleanup_handle) = match config.store_backend {
        StoreBackend::Memory => {
            let store = MemoryStore::new(config.max_entries);
            let handle = spawn_cleanup_task(store.clone(), config.cleanup_interval);
            info!("In-memory store initialized (max_entries={})", config.max_entries);
            (AppState::new(Arc::new(store), &config), Some(handle))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url, REDIS_OP_TIMEOUT)
                .await
                .with_context(|| format!("failed to connect to {}", config.redis_url))?;
            info!("Redis store connected");
            (AppState::new(Arc::new(store), &config), None)
        }
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cleanup_handle))
    .await
    .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then stops the cleanup task if one runs.
async fn shutdown_signal(cleanup_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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

    if let Some(handle) = cleanup_handle {
        handle.abort();
        warn!("Cleanup task aborted");
    }
}
