//! The peer, one endpoint of a lixnet connection.
//!
//! A [`Peer`] turns calls into wire frames and wire frames back into
//! handler invocations and reply callbacks. Calls whose envelope would not
//! fit the transmission limit are announced, held until the receiver
//! sends a launch signal, and then flushed as chunk lines.
//!
//! The peer owns no socket. The connection owner attaches a
//! [`Transport`] for outgoing frames and feeds every incoming text frame
//! to [`Peer::handle`].

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use lixnet_core::config::LixnetConfig;
use lixnet_core::ids::{is_valid_id, IdGenerator, RandomIds};
use lixnet_core::wire::{self, ChunkLine, Envelope, Frame, WireError, SAFETY_MARGIN};

use crate::abandon::{self, AbandonPolicy};
use crate::correlation::{CorrelationRegistry, ReplyCallback};
use crate::diagnostics::{Diagnostic, RejectReason, DIAGNOSTICS_CAPACITY};
use crate::inbound::{new_inbound_table, ChunkOutcome, InboundTable, InboundTransmission};
use crate::outbound::{new_outbound_table, split_payload, OutboundTable, OutboundTransmission, SplitError};
use crate::router::{Delivery, EventContext, Router, TypedHandler};
use crate::transport::{Transport, TransportError};

/// Chunk ceiling per transmission unless configured otherwise.
pub const DEFAULT_CHUNKS_LIMIT: usize = 20;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("no transport attached")]
    NoTransport,
    #[error("cannot split payload: {0}")]
    Split(#[source] SplitError),
    #[error("payload needs more than {max} chunks")]
    TooManyChunks { max: usize },
    #[error(transparent)]
    Encode(#[from] WireError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("call was dropped before a reply arrived")]
    Closed,
    #[error("reply does not match the expected type: {0}")]
    DecodeReply(#[source] serde_json::Error),
}

impl From<SplitError> for PeerError {
    fn from(e: SplitError) -> Self {
        match e {
            SplitError::TooManyChunks { max } => PeerError::TooManyChunks { max },
            other => PeerError::Split(other),
        }
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PeerOptions {
    /// `None` disables chunking.
    pub transmission_limit: Option<usize>,
    pub chunks_limit: usize,
    pub abandon: AbandonPolicy,
    pub ids: Arc<dyn IdGenerator>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            transmission_limit: None,
            chunks_limit: DEFAULT_CHUNKS_LIMIT,
            abandon: AbandonPolicy::default(),
            ids: Arc::new(RandomIds::new()),
        }
    }
}

impl PeerOptions {
    pub fn from_config(config: &LixnetConfig) -> Self {
        Self {
            transmission_limit: config.protocol.limit(),
            chunks_limit: config.protocol.transmission_chunks_limit,
            abandon: AbandonPolicy::from_config(&config.abandon),
            ids: Arc::new(RandomIds::new()),
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

// ── Peer ──────────────────────────────────────────────────────────────────────

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    /// Held while enqueueing, so a chunk flush is never interleaved with
    /// frames from another caller.
    send_lock: Mutex<()>,
    /// 0 = unbounded.
    transmission_limit: AtomicUsize,
    chunks_limit: AtomicUsize,
    policy: AbandonPolicy,
    ids: Arc<dyn IdGenerator>,
    inbound: InboundTable,
    outbound: OutboundTable,
    callbacks: CorrelationRegistry,
    router: Router,
    diagnostics: broadcast::Sender<Diagnostic>,
}

impl Drop for PeerInner {
    fn drop(&mut self) {
        for mut entry in self.inbound.iter_mut() {
            entry.value_mut().cancel_detector();
        }
        for mut entry in self.outbound.iter_mut() {
            entry.value_mut().cancel_expiry();
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("transmission_limit", &self.transmission_limit())
            .field("chunks_limit", &self.transmission_chunks_limit())
            .field("inbound", &self.inner.inbound.len())
            .field("outbound", &self.inner.outbound.len())
            .field("pending_calls", &self.inner.callbacks.len())
            .finish()
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self::new()
    }
}

impl Peer {
    pub fn new() -> Self {
        Self::with_options(PeerOptions::default())
    }

    pub fn with_options(options: PeerOptions) -> Self {
        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_CAPACITY);
        Self {
            inner: Arc::new(PeerInner {
                transport: RwLock::new(None),
                send_lock: Mutex::new(()),
                transmission_limit: AtomicUsize::new(options.transmission_limit.unwrap_or(0)),
                chunks_limit: AtomicUsize::new(options.chunks_limit),
                policy: options.abandon,
                ids: options.ids,
                inbound: new_inbound_table(),
                outbound: new_outbound_table(),
                callbacks: CorrelationRegistry::new(),
                router: Router::new(),
                diagnostics,
            }),
        }
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self
            .inner
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }

    /// Detach the transport. Later calls fail with [`PeerError::NoTransport`].
    pub fn clear_transport(&self) {
        *self
            .inner
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// `None` (or `Some(0)`) disables chunking.
    pub fn set_transmission_limit(&self, limit: Option<usize>) {
        self.inner
            .transmission_limit
            .store(limit.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn transmission_limit(&self) -> Option<usize> {
        match self.inner.transmission_limit.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn set_transmission_chunks_limit(&self, limit: usize) {
        self.inner.chunks_limit.store(limit, Ordering::Relaxed);
    }

    pub fn transmission_chunks_limit(&self) -> usize {
        self.inner.chunks_limit.load(Ordering::Relaxed)
    }

    // ── Handlers ──────────────────────────────────────────────────────────────

    /// Register a typed handler for `event`, replacing any earlier one.
    ///
    /// Incoming `data` is deserialized into `I`; the `O` the handler
    /// returns is the reply payload when the caller asked for one.
    pub fn on<I, O, F, Fut>(&self, event: impl Into<String>, f: F)
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        self.inner
            .router
            .register(event, Arc::new(TypedHandler::new(f)));
    }

    /// Names of all events with a registered handler, sorted.
    pub fn events(&self) -> Vec<String> {
        self.inner.router.events()
    }

    // ── Outgoing ──────────────────────────────────────────────────────────────

    /// Fire-and-forget event.
    ///
    /// A chunked call arms its launch timeout on the tokio runtime, so
    /// oversized calls must be made inside one.
    pub fn call<T>(&self, event: &str, input: &T) -> Result<(), PeerError>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_value(input).map_err(WireError::Encode)?;
        self.send_call(event, data, None)
    }

    /// Event whose reply is passed to `on_reply`. If no reply ever comes
    /// the callback is never invoked.
    pub fn call_with_callback<T, F>(&self, event: &str, input: &T, on_reply: F) -> Result<(), PeerError>
    where
        T: Serialize + ?Sized,
        F: FnOnce(Value) + Send + 'static,
    {
        let data = serde_json::to_value(input).map_err(WireError::Encode)?;
        self.send_call(event, data, Some(Box::new(on_reply)))
    }

    /// Call `event` and wait for the reply.
    ///
    /// Fails with [`PeerError::Closed`] when a chunked call is never
    /// launched. Otherwise waits indefinitely: an abandoned transmission or
    /// a failing handler on the other side means no reply. Wrap in
    /// `tokio::time::timeout` when a bound is needed.
    pub async fn request<T, R>(&self, event: &str, input: &T) -> Result<R, PeerError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let (tx, rx) = oneshot::channel();
        self.call_with_callback(event, input, move |data| {
            let _ = tx.send(data);
        })?;
        let data = rx.await.map_err(|_| PeerError::Closed)?;
        serde_json::from_value(data).map_err(PeerError::DecodeReply)
    }

    fn send_call(&self, event: &str, data: Value, callback: Option<ReplyCallback>) -> Result<(), PeerError> {
        let transport = self.transport().ok_or(PeerError::NoTransport)?;

        let correlation_id = callback.map(|cb| {
            let id = self.inner.ids.next_id();
            self.inner.callbacks.register(id.clone(), event, cb);
            id
        });

        let result = self.send_event(&transport, event, data, correlation_id.clone());
        if result.is_err() {
            if let Some(id) = &correlation_id {
                self.inner.callbacks.discard(id);
            }
        }
        result
    }

    fn send_event(
        &self,
        transport: &Arc<dyn Transport>,
        event: &str,
        data: Value,
        correlation_id: Option<String>,
    ) -> Result<(), PeerError> {
        let envelope = Envelope::Event {
            event: event.to_string(),
            data,
            correlation_id,
        };
        let text = envelope.encode()?;

        match (self.transmission_limit(), envelope) {
            (
                Some(limit),
                Envelope::Event {
                    event,
                    data,
                    correlation_id,
                },
            ) if text.len() > limit.saturating_sub(SAFETY_MARGIN) => {
                self.send_chunked(transport, limit, event, &data, correlation_id)
            }
            _ => self.send_frames(transport, [text]),
        }
    }

    fn send_chunked(
        &self,
        transport: &Arc<dyn Transport>,
        limit: usize,
        event: String,
        data: &Value,
        correlation_id: Option<String>,
    ) -> Result<(), PeerError> {
        let payload = serde_json::to_string(data).map_err(WireError::Encode)?;
        let transmission_id = self.inner.ids.next_id();
        let chunks = split_payload(&transmission_id, limit, &payload, self.transmission_chunks_limit())?;
        let chunk_count = u32::try_from(chunks.len()).map_err(|_| PeerError::TooManyChunks {
            max: self.transmission_chunks_limit(),
        })?;

        let announcement = Envelope::Announce {
            transmission_id: transmission_id.clone(),
            event: event.clone(),
            chunk_count,
            correlation_id: correlation_id.clone(),
        }
        .encode()?;

        tracing::debug!(
            transmission_id = %transmission_id,
            event = %event,
            chunk_count,
            bytes = payload.len(),
            "announcing chunked transmission"
        );

        // Buffer first: the launch may come back before send returns.
        let transmission = OutboundTransmission::new(event, chunks, correlation_id);
        let deadline = transmission.created_at + self.inner.policy.launch_timeout;
        self.inner.outbound.insert(transmission_id.clone(), transmission);
        let expiry = self.spawn_launch_timeout(transmission_id.clone(), deadline);
        if let Some(mut t) = self.inner.outbound.get_mut(&transmission_id) {
            t.attach_expiry(expiry.abort_handle());
        }

        if let Err(e) = self.send_frames(transport, [announcement]) {
            expiry.abort();
            self.inner.outbound.remove(&transmission_id);
            return Err(e);
        }
        Ok(())
    }

    /// Drop the buffer for `transmission_id` if it is still waiting for a
    /// launch at `deadline`. A caller waiting on a reply is released.
    fn spawn_launch_timeout(&self, transmission_id: String, deadline: Instant) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let Some((_, transmission)) = inner.outbound.remove(&transmission_id) else {
                return;
            };

            tracing::warn!(
                transmission_id = %transmission_id,
                event = %transmission.event,
                chunks = transmission.chunk_count(),
                "no launch signal, dropping outbound transmission"
            );
            if let Some(correlation_id) = &transmission.correlation_id {
                inner.callbacks.discard(correlation_id);
            }
            let _ = inner
                .diagnostics
                .send(Diagnostic::LaunchTimedOut { transmission_id });
        })
    }

    // ── Incoming ──────────────────────────────────────────────────────────────

    /// Process one incoming text frame.
    ///
    /// Never fails and never blocks: anything that cannot be processed is
    /// logged, published as a [`Diagnostic`], and dropped. Handlers run on
    /// spawned tasks, so this must be called inside a tokio runtime.
    pub fn handle(&self, text: &str) {
        let frame = match wire::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed frame");
                self.emit(Diagnostic::MalformedFrame {
                    reason: e.to_string(),
                });
                return;
            }
        };

        match frame {
            Frame::Chunk(line) => self.on_chunk(line),
            Frame::Envelope(Envelope::Launch { transmission_id }) => self.on_launch(&transmission_id),
            Frame::Envelope(Envelope::Announce {
                transmission_id,
                event,
                chunk_count,
                correlation_id,
            }) => self.on_announce(transmission_id, event, chunk_count, correlation_id),
            Frame::Envelope(Envelope::Reply { callback_id, data }) => {
                if !self.inner.callbacks.resolve(&callback_id, data) {
                    tracing::debug!(callback_id = %callback_id, "reply for unknown correlation id");
                    self.emit(Diagnostic::UnknownCorrelation { callback_id });
                }
            }
            Frame::Envelope(Envelope::Event {
                event,
                data,
                correlation_id,
            }) => self.deliver(Delivery {
                event,
                data,
                correlation_id,
            }),
        }
    }

    fn on_launch(&self, transmission_id: &str) {
        let Some((_, mut transmission)) = self.inner.outbound.remove(transmission_id) else {
            tracing::debug!(transmission_id, "launch for unknown transmission");
            self.emit(Diagnostic::UnknownLaunch {
                transmission_id: transmission_id.to_string(),
            });
            return;
        };
        transmission.cancel_expiry();

        tracing::debug!(
            transmission_id,
            event = %transmission.event,
            chunks = transmission.chunk_count(),
            "launching chunked transmission"
        );

        let lines = transmission.chunks.iter().map(ChunkLine::encode);
        let result = match self.transport() {
            Some(transport) => self.send_frames(&transport, lines),
            None => Err(PeerError::NoTransport),
        };
        if let Err(e) = result {
            tracing::warn!(transmission_id, error = %e, "failed to flush chunks");
            self.emit(Diagnostic::SendFailed {
                error: e.to_string(),
            });
        }
    }

    fn on_announce(
        &self,
        transmission_id: String,
        event: String,
        chunk_count: u32,
        correlation_id: Option<String>,
    ) {
        let limit = self.transmission_chunks_limit();
        let reject = if !is_valid_id(&transmission_id) {
            Some(RejectReason::InvalidId)
        } else if chunk_count == 0 {
            Some(RejectReason::ZeroChunks)
        } else if chunk_count as usize > limit {
            Some(RejectReason::TooManyChunks { limit })
        } else {
            None
        };
        if let Some(reason) = reject {
            self.reject_announcement(transmission_id, reason);
            return;
        }

        let announced_at = match self.inner.inbound.entry(transmission_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                self.reject_announcement(transmission_id, RejectReason::DuplicateId);
                return;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let transmission = InboundTransmission::new(&event, chunk_count, correlation_id);
                let announced_at = transmission.announced_at;
                slot.insert(transmission);
                announced_at
            }
        };

        let detector = abandon::spawn_detector(
            Arc::downgrade(&self.inner.inbound),
            transmission_id.clone(),
            announced_at,
            self.inner.policy,
            self.inner.diagnostics.clone(),
        );
        match self.inner.inbound.get_mut(&transmission_id) {
            Some(mut t) => t.attach_detector(detector.abort_handle()),
            None => detector.abort(),
        }

        tracing::debug!(
            transmission_id = %transmission_id,
            event = %event,
            chunk_count,
            "accepted announcement"
        );

        if let Err(e) = self.send_envelope(&Envelope::launch(transmission_id.clone())) {
            tracing::warn!(transmission_id = %transmission_id, error = %e, "failed to send launch");
            self.emit(Diagnostic::SendFailed {
                error: e.to_string(),
            });
        }
    }

    fn reject_announcement(&self, transmission_id: String, reason: RejectReason) {
        tracing::debug!(transmission_id = %transmission_id, ?reason, "rejected announcement");
        self.emit(Diagnostic::AnnouncementRejected {
            transmission_id,
            reason,
        });
    }

    fn on_chunk(&self, line: ChunkLine) {
        let ChunkLine {
            transmission_id,
            index,
            fragment,
        } = line;

        let (outcome, chunk_count) = match self.inner.inbound.get_mut(&transmission_id) {
            Some(mut t) => (t.insert(index, fragment), t.chunk_count),
            None => {
                tracing::debug!(transmission_id = %transmission_id, index, "chunk for unknown transmission");
                self.emit(Diagnostic::UnknownTransmission { transmission_id });
                return;
            }
        };

        match outcome {
            ChunkOutcome::OutOfRange => {
                tracing::debug!(transmission_id = %transmission_id, index, chunk_count, "chunk index out of range");
                self.emit(Diagnostic::ChunkOutOfRange {
                    transmission_id,
                    index,
                    chunk_count,
                });
                return;
            }
            ChunkOutcome::Replaced => {
                tracing::debug!(transmission_id = %transmission_id, index, "duplicate chunk replaced");
            }
            ChunkOutcome::Stored => {}
        }

        let Some((_, mut transmission)) = self
            .inner
            .inbound
            .remove_if(&transmission_id, |_, t| t.is_complete())
        else {
            return;
        };
        transmission.cancel_detector();

        let event = transmission.event.clone();
        let correlation_id = transmission.correlation_id.clone();
        match transmission.into_payload() {
            Ok(data) => {
                tracing::debug!(transmission_id = %transmission_id, event = %event, "transmission reassembled");
                self.deliver(Delivery {
                    event,
                    data,
                    correlation_id,
                });
            }
            Err(e) => {
                tracing::warn!(transmission_id = %transmission_id, event = %event, error = %e, "reassembly failed");
                self.emit(Diagnostic::ReassemblyFailed {
                    transmission_id,
                    error: e.to_string(),
                });
            }
        }
    }

    fn deliver(&self, delivery: Delivery) {
        self.inner.router.dispatch(delivery, self.clone());
    }

    // ── Plumbing ──────────────────────────────────────────────────────────────

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send_frames<I>(&self, transport: &Arc<dyn Transport>, frames: I) -> Result<(), PeerError>
    where
        I: IntoIterator<Item = String>,
    {
        let _guard = self
            .inner
            .send_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for frame in frames {
            transport.send(frame)?;
        }
        Ok(())
    }

    /// Send a single protocol envelope, unchunked.
    pub(crate) fn send_envelope(&self, envelope: &Envelope) -> Result<(), PeerError> {
        let transport = self.transport().ok_or(PeerError::NoTransport)?;
        let text = envelope.encode()?;
        self.send_frames(&transport, [text])
    }

    pub(crate) fn emit(&self, diagnostic: Diagnostic) {
        let _ = self.inner.diagnostics.send(diagnostic);
    }

    // ── Observation ───────────────────────────────────────────────────────────

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.diagnostics.subscribe()
    }

    /// Calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.callbacks.len()
    }

    /// Ids of inbound transmissions still being reassembled, sorted.
    pub fn inbound_transmissions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.inbound.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Ids of outbound transmissions waiting for their launch signal, sorted.
    pub fn outbound_transmissions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.outbound.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
