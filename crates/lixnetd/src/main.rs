//! lixnetd, the lixnet daemon.
//!
//! Serves the built-in events over HTTP RPC (`POST /rpc`) and over
//! WebSocket peers (`GET /ws`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use lixnet_core::LixnetConfig;

mod events;
mod ws;

/// Shared by every request handler.
#[derive(Clone)]
pub struct DaemonState {
    pub config: Arc<LixnetConfig>,
    pub shutdown: broadcast::Sender<()>,
    connections: Arc<AtomicU64>,
}

impl DaemonState {
    fn new(config: LixnetConfig, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            config: Arc::new(config),
            shutdown,
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn next_connection_id(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn app(state: DaemonState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .with_state(state)
        .nest("/rpc", lixnet_rpc::router(events::rpc_events()))
        .layer(cors)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = LixnetConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = LixnetConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LixnetConfig::default()
    });

    let port = config.server.api_port;
    tracing::info!(
        port,
        transmission_limit = ?config.protocol.limit(),
        chunks_limit = config.protocol.transmission_chunks_limit,
        "lixnetd starting"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let state = DaemonState::new(config, shutdown_tx.clone());
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("failed to bind 127.0.0.1:{}", port))?;
    tracing::info!(port, "listening on 127.0.0.1 (POST /rpc, GET /ws)");

    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    tracing::info!("shutting down");
    Ok(())
}
