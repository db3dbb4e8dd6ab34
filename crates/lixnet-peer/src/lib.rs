//! lixnet-peer: the chunked event protocol engine.
//!
//! One [`Peer`] per connection. It splits oversized calls into announced
//! chunk transmissions, reassembles inbound ones, evicts transmissions
//! whose sender went quiet, and routes events and replies.

pub mod abandon;
pub mod correlation;
pub mod diagnostics;
pub mod inbound;
pub mod outbound;
pub mod peer;
pub mod router;
pub mod transport;

pub use abandon::AbandonPolicy;
pub use diagnostics::{AbandonReason, Diagnostic, RejectReason};
pub use peer::{Peer, PeerError, PeerOptions};
pub use router::{EventContext, EventHandler, HandlerError};
pub use transport::{ChannelTransport, Transport, TransportError};
