//! The named handlers an RPC endpoint serves.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::schema::{Schema, TypedSchema};

/// Anything that can answer an RPC event with already-validated input.
pub trait RpcHandler: Send + Sync {
    fn call(&self, input: Value) -> BoxFuture<'static, anyhow::Result<Value>>;
}

impl<F, Fut> RpcHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, input: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
        Box::pin(self(input))
    }
}

#[derive(Clone)]
pub struct RpcEvent {
    pub handler: Arc<dyn RpcHandler>,
    pub schema: Option<Arc<dyn Schema>>,
}

/// Event name → handler and optional schema. Cheap to clone.
#[derive(Clone, Default)]
pub struct EventCollection {
    events: BTreeMap<String, RpcEvent>,
}

impl EventCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event whose input is passed through unvalidated.
    pub fn event<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: RpcHandler + 'static,
    {
        self.events.insert(
            name.into(),
            RpcEvent {
                handler: Arc::new(handler),
                schema: None,
            },
        );
        self
    }

    /// Add an event whose input must pass `schema` first.
    pub fn event_with_schema<S, H>(mut self, name: impl Into<String>, schema: S, handler: H) -> Self
    where
        S: Schema + 'static,
        H: RpcHandler + 'static,
    {
        self.events.insert(
            name.into(),
            RpcEvent {
                handler: Arc::new(handler),
                schema: Some(Arc::new(schema)),
            },
        );
        self
    }

    /// Add an event with typed input and output. The input schema is
    /// derived from `I`.
    pub fn typed<I, O, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        I: DeserializeOwned + Serialize + Send + 'static,
        O: Serialize + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move |input: Value| {
            let f = Arc::clone(&f);
            async move {
                let input: I = serde_json::from_value(input)?;
                let output = f(input).await?;
                anyhow::Ok(serde_json::to_value(output)?)
            }
        };
        self.event_with_schema(name, TypedSchema::<I>::new(), handler)
    }

    pub fn get(&self, name: &str) -> Option<&RpcEvent> {
        self.events.get(name)
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
