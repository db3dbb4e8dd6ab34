//! How a peer puts text frames on the socket.
//!
//! The peer never owns the connection. Whoever accepted or dialed it
//! hands the peer something that can enqueue outgoing text and feeds
//! incoming text to [`crate::Peer::handle`].

use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport failed: {0}")]
    Failed(String),
}

/// Outgoing half of a duplex text connection.
///
/// `send` must not block: it enqueues the frame and returns. Frames sent
/// from one thread go out in the order they were sent.
pub trait Transport: Send + Sync {
    fn send(&self, text: String) -> Result<(), TransportError>;
}

/// A transport backed by an unbounded channel. The other end of the
/// channel is drained by the task that writes to the real socket.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// A transport plus the receiver its frames arrive on.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.tx.send(text).map_err(|_| TransportError::Closed)
    }
}
