//! Routes delivered events to registered handlers.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use lixnet_core::wire::Envelope;

use crate::diagnostics::Diagnostic;
use crate::peer::Peer;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("event data does not match the handler input: {0}")]
    InvalidInput(#[source] serde_json::Error),
    #[error("handler output could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Passed to every handler invocation.
#[derive(Clone)]
pub struct EventContext {
    pub event: String,
    /// The peer the event arrived on. Handlers may call back through it.
    pub peer: Peer,
}

/// Trait for anything that can answer a named event.
///
/// The returned value becomes the reply payload when the sender asked for
/// one. An error means no reply is sent at all.
pub trait EventHandler: Send + Sync {
    fn call(&self, data: Value, ctx: EventContext) -> BoxFuture<'static, Result<Value, HandlerError>>;
}

/// Adapts a typed async closure into an [`EventHandler`].
pub struct TypedHandler<I, O, F> {
    f: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> TypedHandler<I, O, F>
where
    F: Fn(I, EventContext) -> Fut,
    Fut: Future<Output = anyhow::Result<O>>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<I, O, F, Fut> EventHandler for TypedHandler<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I, EventContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    fn call(&self, data: Value, ctx: EventContext) -> BoxFuture<'static, Result<Value, HandlerError>> {
        let input = match serde_json::from_value::<I>(data) {
            Ok(input) => input,
            Err(e) => return Box::pin(async move { Err(HandlerError::InvalidInput(e)) }),
        };
        let fut = (self.f)(input, ctx);
        Box::pin(async move {
            let output = fut.await?;
            serde_json::to_value(output).map_err(HandlerError::Encode)
        })
    }
}

/// An event ready for its handler: either a plain event envelope or a
/// reassembled chunked transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub event: String,
    pub data: Value,
    pub correlation_id: Option<String>,
}

/// Maps event names to handlers. Registering a name again replaces the
/// previous handler.
#[derive(Default)]
pub struct Router {
    handlers: DashMap<String, Arc<dyn EventHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event = event.into();
        if self.handlers.insert(event.clone(), handler).is_some() {
            tracing::debug!(event = %event, "replaced event handler");
        }
    }

    pub fn handler(&self, event: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event).map(|h| Arc::clone(h.value()))
    }

    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run the handler for `delivery` on its own task. When the sender
    /// supplied a correlation id, the handler's result goes back as a
    /// reply envelope through `peer`.
    pub fn dispatch(&self, delivery: Delivery, peer: Peer) {
        let Some(handler) = self.handler(&delivery.event) else {
            tracing::debug!(event = %delivery.event, "no handler for event");
            peer.emit(Diagnostic::MissingHandler {
                event: delivery.event,
            });
            return;
        };

        tokio::spawn(async move {
            let Delivery {
                event,
                data,
                correlation_id,
            } = delivery;
            let ctx = EventContext {
                event: event.clone(),
                peer: peer.clone(),
            };

            match handler.call(data, ctx).await {
                Ok(result) => {
                    let Some(callback_id) = correlation_id else {
                        return;
                    };
                    if let Err(e) = peer.send_envelope(&Envelope::reply(callback_id, result)) {
                        tracing::warn!(event = %event, error = %e, "failed to send reply");
                        peer.emit(Diagnostic::SendFailed {
                            error: e.to_string(),
                        });
                    }
                }
                Err(HandlerError::InvalidInput(e)) => {
                    tracing::debug!(event = %event, error = %e, "rejected event input");
                    peer.emit(Diagnostic::InvalidInput {
                        event,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(event = %event, error = %e, "event handler failed");
                    peer.emit(Diagnostic::HandlerFailed {
                        event,
                        error: e.to_string(),
                    });
                }
            }
        });
    }
}
