//! Built-in events served by the daemon, over RPC and over WebSocket peers.

use serde_json::{json, Value};

use lixnet_peer::{EventContext, Peer};
use lixnet_rpc::EventCollection;

/// Events answered on `POST /rpc`.
pub fn rpc_events() -> EventCollection {
    EventCollection::new()
        .event("ping", |_: Value| async { anyhow::Ok(json!("pong")) })
        .event("echo", |input: Value| async move { anyhow::Ok(input) })
}

/// Handlers installed on every WebSocket peer.
pub fn install_peer_handlers(peer: &Peer) {
    peer.on("ping", |_: Value, _ctx: EventContext| async { anyhow::Ok("pong") });
    peer.on("echo", |input: Value, ctx: EventContext| async move {
        tracing::debug!(event = %ctx.event, "echoing");
        anyhow::Ok(input)
    });
}
