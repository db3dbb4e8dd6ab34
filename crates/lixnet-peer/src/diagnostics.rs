//! Observable drops.
//!
//! Inbound failures never reach the caller of `handle`; the frame is
//! dropped and the sender hears nothing. Each drop is also published as a
//! [`Diagnostic`] so tests and operators can see it. With no subscriber
//! the event is discarded.

use std::time::Duration;

/// Capacity of the diagnostics broadcast channel. Slow subscribers lag
/// and lose the oldest events.
pub const DIAGNOSTICS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Text that is neither a chunk line nor a valid envelope.
    MalformedFrame { reason: String },
    /// A chunk for a transmission that was never announced, or is gone.
    UnknownTransmission { transmission_id: String },
    /// A chunk whose index is not below the announced chunk count.
    ChunkOutOfRange {
        transmission_id: String,
        index: u32,
        chunk_count: u32,
    },
    /// An announcement that was refused; no launch was sent.
    AnnouncementRejected {
        transmission_id: String,
        reason: RejectReason,
    },
    /// A launch signal for a transmission we are not holding.
    UnknownLaunch { transmission_id: String },
    /// No launch signal came for an outbound transmission; its buffer and
    /// any pending reply were dropped.
    LaunchTimedOut { transmission_id: String },
    /// All chunks arrived but the payload did not parse.
    ReassemblyFailed {
        transmission_id: String,
        error: String,
    },
    /// A reply whose callback id is not registered.
    UnknownCorrelation { callback_id: String },
    /// An event nobody registered a handler for.
    MissingHandler { event: String },
    /// Event data that does not fit the handler's input type.
    InvalidInput { event: String, error: String },
    /// The handler returned an error; no reply was sent.
    HandlerFailed { event: String, error: String },
    /// Evicted by the abandonment detector.
    Abandoned {
        transmission_id: String,
        reason: AbandonReason,
    },
    /// A frame produced while handling inbound traffic could not be sent.
    SendFailed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ZeroChunks,
    TooManyChunks { limit: usize },
    DuplicateId,
    /// The id could not be addressed by a chunk line.
    InvalidId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// No chunk ever arrived, or the newest one is too old.
    Stalled,
    /// Chunks are arriving, but too slowly to finish in time.
    TooSlow { estimate: Duration },
}
