//! lixnet-rpc: request/response events over plain HTTP.
//!
//! An [`EventCollection`] is served as `POST /` by [`router`]; the
//! [`RpcClient`] is the matching caller.

pub mod client;
pub mod collection;
pub mod handlers;
pub mod schema;

use axum::routing::post;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use client::{RpcClient, RpcClientError};
pub use collection::{EventCollection, RpcEvent, RpcHandler};
pub use handlers::{dispatch, RpcResponse};
pub use schema::{Issue, Kind, ObjectSchema, Schema, TypedSchema};

/// The dispatcher mounted at `POST /`. Nest it wherever the RPC endpoint
/// should live.
pub fn router(events: EventCollection) -> Router {
    Router::new()
        .route("/", post(handlers::handle_rpc))
        .with_state(events)
}

/// Serve `events` on 127.0.0.1:`port` until the future is dropped.
pub async fn serve(events: EventCollection, port: u16) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(events).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "RPC listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
