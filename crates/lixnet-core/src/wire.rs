//! The text frames exchanged between two peers.
//!
//! Two kinds of frame share one socket. A *chunk line* carries one
//! fragment of an oversized payload and is plain text:
//!
//!   <transmission id>.<chunk index>.<fragment>
//!
//! Everything else is a JSON object, an *envelope*. The JSON keys are the
//! short names existing peers already speak (`tId`, `rf`, `rb`, ...).
//! Renaming any of them is a breaking change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separates the id, the index and the fragment of a chunk line.
pub const CHUNK_SEPARATOR: char = '.';

/// Bytes of every wire message reserved for the envelope around a payload.
/// Applied both when deciding whether to chunk and when sizing each chunk.
pub const SAFETY_MARGIN: usize = 50;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed chunk line")]
    MalformedChunk,
    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("envelope has no event name")]
    MissingEvent,
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

// ── Chunk lines ───────────────────────────────────────────────────────────────

/// One fragment of a chunked transmission, addressed by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLine {
    pub transmission_id: String,
    pub index: u32,
    /// Raw payload text. May itself contain `.` characters.
    pub fragment: String,
}

impl ChunkLine {
    /// The framing that precedes the fragment: `"<id>.<index>."`.
    pub fn prefix(transmission_id: &str, index: u32) -> String {
        format!("{transmission_id}{CHUNK_SEPARATOR}{index}{CHUNK_SEPARATOR}")
    }

    /// Byte length of [`ChunkLine::prefix`] without allocating it.
    pub fn prefix_len(transmission_id: &str, index: u32) -> usize {
        let digits = index.checked_ilog10().map_or(1, |d| d as usize + 1);
        transmission_id.len() + digits + 2
    }

    pub fn encode(&self) -> String {
        let mut out = Self::prefix(&self.transmission_id, self.index);
        out.push_str(&self.fragment);
        out
    }

    /// Parse `"<id>.<index>.<fragment>"`. The fragment is everything after
    /// the second separator.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let (id, rest) = text
            .split_once(CHUNK_SEPARATOR)
            .ok_or(WireError::MalformedChunk)?;
        let (index, fragment) = rest
            .split_once(CHUNK_SEPARATOR)
            .ok_or(WireError::MalformedChunk)?;

        if id.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WireError::MalformedChunk);
        }
        let index = index.parse().map_err(|_| WireError::MalformedChunk)?;

        Ok(Self {
            transmission_id: id.to_string(),
            index,
            fragment: fragment.to_string(),
        })
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// A JSON protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A named event. With `correlation_id` the sender expects a reply.
    Event {
        event: String,
        data: Value,
        correlation_id: Option<String>,
    },
    /// Announces a chunked transmission. Chunks follow only after the
    /// receiver answers with [`Envelope::Launch`].
    Announce {
        transmission_id: String,
        event: String,
        chunk_count: u32,
        correlation_id: Option<String>,
    },
    /// Receiver → sender: release the buffered chunks of a transmission.
    Launch { transmission_id: String },
    /// The result of a correlated event, keyed by the caller's correlation id.
    Reply { callback_id: String, data: Value },
}

/// On-wire shape shared by every envelope kind. Which fields are present
/// decides the kind; see [`Envelope::from_raw`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    launch: Option<bool>,
    #[serde(rename = "tId", default, skip_serializing_if = "Option::is_none")]
    transmission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event: Option<String>,
    #[serde(rename = "chunkCount", default, skip_serializing_if = "Option::is_none")]
    chunk_count: Option<u32>,
    #[serde(rename = "rb", default, skip_serializing_if = "Option::is_none")]
    callback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(rename = "rf", default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl Envelope {
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self::Event {
            event: event.into(),
            data,
            correlation_id: None,
        }
    }

    pub fn launch(transmission_id: impl Into<String>) -> Self {
        Self::Launch {
            transmission_id: transmission_id.into(),
        }
    }

    pub fn reply(callback_id: impl Into<String>, data: Value) -> Self {
        Self::Reply {
            callback_id: callback_id.into(),
            data,
        }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(&self.to_raw()).map_err(WireError::Encode)
    }

    /// Parse JSON text into an envelope.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(WireError::InvalidJson)?;
        Self::from_raw(raw)
    }

    fn to_raw(&self) -> RawEnvelope {
        match self {
            Self::Event {
                event,
                data,
                correlation_id,
            } => RawEnvelope {
                event: Some(event.clone()),
                data: Some(data.clone()),
                correlation_id: correlation_id.clone(),
                ..RawEnvelope::default()
            },
            Self::Announce {
                transmission_id,
                event,
                chunk_count,
                correlation_id,
            } => RawEnvelope {
                transmission_id: Some(transmission_id.clone()),
                event: Some(event.clone()),
                chunk_count: Some(*chunk_count),
                correlation_id: correlation_id.clone(),
                ..RawEnvelope::default()
            },
            Self::Launch { transmission_id } => RawEnvelope {
                launch: Some(true),
                transmission_id: Some(transmission_id.clone()),
                ..RawEnvelope::default()
            },
            Self::Reply { callback_id, data } => RawEnvelope {
                callback_id: Some(callback_id.clone()),
                data: Some(data.clone()),
                ..RawEnvelope::default()
            },
        }
    }

    /// Precedence: launch, then announcement, then reply, then plain event.
    fn from_raw(raw: RawEnvelope) -> Result<Self, WireError> {
        let transmission_id = raw.transmission_id.filter(|id| !id.is_empty());

        if raw.launch == Some(true) {
            if let Some(transmission_id) = transmission_id {
                return Ok(Self::Launch { transmission_id });
            }
        }

        if let Some(transmission_id) = transmission_id {
            let event = raw.event.ok_or(WireError::MissingEvent)?;
            return Ok(Self::Announce {
                transmission_id,
                event,
                chunk_count: raw.chunk_count.unwrap_or(0),
                correlation_id: raw.correlation_id,
            });
        }

        if let Some(callback_id) = raw.callback_id.filter(|id| !id.is_empty()) {
            return Ok(Self::Reply {
                callback_id,
                data: raw.data.unwrap_or(Value::Null),
            });
        }

        let event = raw.event.ok_or(WireError::MissingEvent)?;
        Ok(Self::Event {
            event,
            data: raw.data.unwrap_or(Value::Null),
            correlation_id: raw.correlation_id.filter(|id| !id.is_empty()),
        })
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// Any text frame received from the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Chunk(ChunkLine),
    Envelope(Envelope),
}

/// Classify and parse one incoming text frame.
///
/// Text whose first non-whitespace character is `{` is an envelope;
/// anything else must be a well-formed chunk line.
pub fn decode(text: &str) -> Result<Frame, WireError> {
    if text.trim_start().starts_with('{') {
        Envelope::decode(text).map(Frame::Envelope)
    } else {
        ChunkLine::parse(text).map(Frame::Chunk)
    }
}
