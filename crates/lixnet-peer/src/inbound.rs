//! Inbound reassembly: collecting the chunks of an announced transmission
//! until every index has arrived.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error("chunk {0} is missing")]
    MissingChunk(u32),
    #[error("reassembled payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// What happened to a chunk offered to a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Stored,
    /// Same index seen before; the newer text replaced the older.
    Replaced,
    /// Index not below the announced chunk count; nothing stored.
    OutOfRange,
}

/// An announced transmission being reassembled.
#[derive(Debug)]
pub struct InboundTransmission {
    pub event: String,
    pub chunk_count: u32,
    /// Correlation id from the announcement, if the sender wants a reply.
    pub correlation_id: Option<String>,
    pub announced_at: Instant,
    chunks: BTreeMap<u32, String>,
    arrivals: BTreeMap<u32, Instant>,
    detector: Option<AbortHandle>,
}

impl InboundTransmission {
    pub fn new(event: impl Into<String>, chunk_count: u32, correlation_id: Option<String>) -> Self {
        Self {
            event: event.into(),
            chunk_count,
            correlation_id,
            announced_at: Instant::now(),
            chunks: BTreeMap::new(),
            arrivals: BTreeMap::new(),
            detector: None,
        }
    }

    /// Store a fragment, stamping it with the current time.
    pub fn insert(&mut self, index: u32, fragment: String) -> ChunkOutcome {
        self.insert_at(index, fragment, Instant::now())
    }

    pub fn insert_at(&mut self, index: u32, fragment: String, at: Instant) -> ChunkOutcome {
        if index >= self.chunk_count {
            return ChunkOutcome::OutOfRange;
        }
        self.arrivals.insert(index, at);
        match self.chunks.insert(index, fragment) {
            Some(_) => ChunkOutcome::Replaced,
            None => ChunkOutcome::Stored,
        }
    }

    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    pub fn missing(&self) -> usize {
        (self.chunk_count as usize).saturating_sub(self.chunks.len())
    }

    pub fn is_complete(&self) -> bool {
        self.missing() == 0
    }

    /// Arrival time of the most recently stored chunk.
    pub fn last_arrival(&self) -> Option<Instant> {
        self.arrivals.values().max().copied()
    }

    /// Arrival times sorted oldest first.
    pub fn arrival_times(&self) -> Vec<Instant> {
        let mut times: Vec<Instant> = self.arrivals.values().copied().collect();
        times.sort();
        times
    }

    /// Fragments concatenated in index order, once all are present.
    pub fn assembled_text(&self) -> Result<String, ReassemblyError> {
        let mut text = String::new();
        for index in 0..self.chunk_count {
            let fragment = self
                .chunks
                .get(&index)
                .ok_or(ReassemblyError::MissingChunk(index))?;
            text.push_str(fragment);
        }
        Ok(text)
    }

    /// Reassemble and parse the payload.
    pub fn into_payload(self) -> Result<Value, ReassemblyError> {
        let text = self.assembled_text()?;
        serde_json::from_str(&text).map_err(ReassemblyError::InvalidJson)
    }

    pub(crate) fn attach_detector(&mut self, handle: AbortHandle) {
        self.detector = Some(handle);
    }

    /// Stop the abandonment detector watching this transmission.
    pub(crate) fn cancel_detector(&mut self) {
        if let Some(handle) = self.detector.take() {
            handle.abort();
        }
    }
}

/// Transmissions being reassembled, keyed by transmission id.
pub type InboundTable = Arc<DashMap<String, InboundTransmission>>;

pub fn new_inbound_table() -> InboundTable {
    Arc::new(DashMap::new())
}
