//! WebSocket endpoint. Each connection is driven by its own [`Peer`].
//!
//! Incoming text frames go to [`Peer::handle`]. Outgoing frames are
//! queued on a [`ChannelTransport`] and written by a dedicated task, so
//! the peer never waits on the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use lixnet_peer::{ChannelTransport, Peer, PeerOptions};

use crate::events::install_peer_handlers;
use crate::DaemonState;

pub async fn handle_ws(State(state): State<DaemonState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

async fn run_connection(socket: WebSocket, state: DaemonState) {
    let conn_id = state.next_connection_id();
    let peer = Peer::with_options(PeerOptions::from_config(&state.config));
    install_peer_handlers(&peer);

    let (transport, mut outgoing) = ChannelTransport::pair();
    peer.set_transport(Arc::new(transport));

    let (mut sink, mut stream) = socket.split();
    let mut shutdown = state.shutdown.subscribe();

    let writer = tokio::spawn(async move {
        while let Some(text) = outgoing.recv().await {
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                tracing::debug!(conn_id, error = %e, "websocket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    tracing::info!(conn_id, "peer connected");

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => peer.handle(text.as_str()),
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(conn_id, "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id, error = %e, "websocket read failed");
                    break;
                }
            },
            _ = shutdown.recv() => break,
        }
    }

    // Dropping the transport closes the channel, which ends the writer.
    peer.clear_transport();
    let _ = writer.await;

    tracing::info!(
        conn_id,
        pending_calls = peer.pending_calls(),
        inbound = peer.inbound_transmissions().len(),
        "peer disconnected"
    );
}
