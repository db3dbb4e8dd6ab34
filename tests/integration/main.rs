//! lixnet integration test harness.
//!
//! Peer tests wire two peers together over in-memory channels; each
//! side's outgoing frames are pumped into the other side's `handle`.
//! RPC tests serve an event collection on an ephemeral localhost port
//! and call it with the real HTTP client.
//!
//!   cargo test --test integration

mod peers;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lixnet_core::ids::SequentialIds;
use lixnet_peer::{ChannelTransport, Peer, PeerOptions};
use lixnet_rpc::{EventCollection, RpcClient};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn peer_with_prefix(prefix: &str, limit: Option<usize>) -> Peer {
    let options = PeerOptions {
        transmission_limit: limit,
        ..PeerOptions::default()
    }
    .with_ids(Arc::new(SequentialIds::new(prefix)));
    Peer::with_options(options)
}

/// Forward every frame from `rx` into `peer`. `filter` decides what the
/// peer actually sees: the frame unchanged, nothing, or several frames.
pub fn pump<F>(mut rx: UnboundedReceiver<String>, peer: Peer, mut filter: F) -> JoinHandle<()>
where
    F: FnMut(String) -> Vec<String> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            for frame in filter(text) {
                peer.handle(&frame);
            }
        }
    })
}

pub fn pass(text: String) -> Vec<String> {
    vec![text]
}

/// Two peers joined by an in-memory duplex link.
pub struct Link {
    pub alice: Peer,
    pub bob: Peer,
    pumps: Vec<JoinHandle<()>>,
}

impl Link {
    pub fn new(limit: Option<usize>) -> Self {
        Self::with_filters(limit, pass, pass)
    }

    /// `to_bob` sees alice's frames before bob does; `to_alice` the reverse.
    pub fn with_filters<A, B>(limit: Option<usize>, to_bob: A, to_alice: B) -> Self
    where
        A: FnMut(String) -> Vec<String> + Send + 'static,
        B: FnMut(String) -> Vec<String> + Send + 'static,
    {
        let alice = peer_with_prefix("LX-a", limit);
        let bob = peer_with_prefix("LX-b", limit);

        let (alice_out, alice_rx) = ChannelTransport::pair();
        let (bob_out, bob_rx) = ChannelTransport::pair();
        alice.set_transport(Arc::new(alice_out));
        bob.set_transport(Arc::new(bob_out));

        let pumps = vec![
            pump(alice_rx, bob.clone(), to_bob),
            pump(bob_rx, alice.clone(), to_alice),
        ];
        Self { alice, bob, pumps }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Serve `events` at `/rpc` on an ephemeral port. Returns a client for it.
pub async fn spawn_rpc(events: EventCollection) -> Result<(RpcClient, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind test listener")?;
    let addr = listener.local_addr()?;
    let app = axum::Router::new().nest("/rpc", lixnet_rpc::router(events));

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((RpcClient::new(format!("http://{addr}/rpc")), server))
}
