//! Outbound chunking: splitting an oversized payload into chunk lines
//! and holding them until the receiver sends the launch signal.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use lixnet_core::wire::{ChunkLine, SAFETY_MARGIN};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    /// The limit leaves no room for a fragment after the chunk prefix.
    #[error("transmission limit {limit} leaves no room for chunk {index} of {transmission_id}")]
    NoCapacity {
        transmission_id: String,
        index: u32,
        limit: usize,
    },
    /// The next character is wider than the room left in a chunk.
    #[error("chunk {index} has room for {capacity} bytes, next character needs more")]
    CharTooWide { index: u32, capacity: usize },
    #[error("payload needs more than {max} chunks")]
    TooManyChunks { max: usize },
}

/// Fragment bytes available to chunk `index` of a transmission under
/// `limit`: the limit minus the line prefix and the safety margin.
pub fn chunk_capacity(transmission_id: &str, index: u32, limit: usize) -> Result<usize, SplitError> {
    let overhead = ChunkLine::prefix_len(transmission_id, index) + SAFETY_MARGIN;
    match limit.checked_sub(overhead) {
        Some(capacity) if capacity > 0 => Ok(capacity),
        _ => Err(SplitError::NoCapacity {
            transmission_id: transmission_id.to_string(),
            index,
            limit,
        }),
    }
}

/// Cut `payload` into chunk lines that each fit within `limit`.
///
/// Fragments end on UTF-8 character boundaries, so a fragment may be a
/// few bytes short of its capacity. Fails once more than `max_chunks`
/// chunks would be needed.
pub fn split_payload(
    transmission_id: &str,
    limit: usize,
    payload: &str,
    max_chunks: usize,
) -> Result<Vec<ChunkLine>, SplitError> {
    let mut chunks = Vec::new();
    let mut rest = payload;
    let mut index = 0u32;

    while !rest.is_empty() {
        if chunks.len() >= max_chunks {
            return Err(SplitError::TooManyChunks { max: max_chunks });
        }
        let capacity = chunk_capacity(transmission_id, index, limit)?;
        let mut take = capacity.min(rest.len());
        while !rest.is_char_boundary(take) {
            take -= 1;
        }
        if take == 0 {
            return Err(SplitError::CharTooWide { index, capacity });
        }

        let (fragment, tail) = rest.split_at(take);
        chunks.push(ChunkLine {
            transmission_id: transmission_id.to_string(),
            index,
            fragment: fragment.to_string(),
        });
        rest = tail;
        index += 1;
    }

    Ok(chunks)
}

// ── Buffered transmissions ────────────────────────────────────────────────────

/// A chunked transmission waiting for its launch signal.
#[derive(Debug, Clone)]
pub struct OutboundTransmission {
    pub event: String,
    /// Chunk lines in index order.
    pub chunks: Vec<ChunkLine>,
    /// Correlation id of the call, if it expects a reply.
    pub correlation_id: Option<String>,
    pub created_at: Instant,
    expiry: Option<AbortHandle>,
}

impl OutboundTransmission {
    pub fn new(event: impl Into<String>, chunks: Vec<ChunkLine>, correlation_id: Option<String>) -> Self {
        Self {
            event: event.into(),
            chunks,
            correlation_id,
            created_at: Instant::now(),
            expiry: None,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn attach_expiry(&mut self, handle: AbortHandle) {
        self.expiry = Some(handle);
    }

    /// Stop the task that would drop this buffer for want of a launch.
    pub(crate) fn cancel_expiry(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }
}

/// Outbound buffers keyed by transmission id.
pub type OutboundTable = Arc<DashMap<String, OutboundTransmission>>;

pub fn new_outbound_table() -> OutboundTable {
    Arc::new(DashMap::new())
}
