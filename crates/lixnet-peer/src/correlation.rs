//! Pending calls awaiting a reply, keyed by correlation id.

use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

/// Invoked once with the reply payload.
pub type ReplyCallback = Box<dyn FnOnce(Value) + Send + 'static>;

struct PendingCall {
    event: String,
    registered_at: Instant,
    /// Behind a mutex so the table stays `Sync` while callbacks need only
    /// be `Send`.
    callback: Mutex<ReplyCallback>,
}

/// Registrations live until their reply arrives. There is no timeout: a
/// call whose reply never comes stays registered for the life of the peer.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: DashMap<String, PendingCall>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, correlation_id: String, event: &str, callback: ReplyCallback) {
        self.pending.insert(
            correlation_id,
            PendingCall {
                event: event.to_string(),
                registered_at: Instant::now(),
                callback: Mutex::new(callback),
            },
        );
    }

    /// Drop a registration whose call never made it onto the wire.
    pub fn discard(&self, correlation_id: &str) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    /// Hand `data` to the callback registered under `correlation_id`.
    ///
    /// Returns `false` when nothing is registered, including for a second
    /// reply to the same id. The callback runs after its entry has left the
    /// map, so it may itself issue calls.
    pub fn resolve(&self, correlation_id: &str, data: Value) -> bool {
        let Some((_, call)) = self.pending.remove(correlation_id) else {
            return false;
        };
        tracing::debug!(
            correlation_id,
            event = %call.event,
            waited_ms = call.registered_at.elapsed().as_millis() as u64,
            "reply received"
        );
        let callback = call
            .callback
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        callback(data);
        true
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
