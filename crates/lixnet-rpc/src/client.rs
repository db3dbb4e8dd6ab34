//! HTTP client for an lixnet RPC endpoint.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("failed to reach {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("response from {url} is not JSON: {source}")]
    InvalidResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with an `error` field.
    #[error("{error}")]
    Server {
        status: u16,
        error: String,
        details: Option<Value>,
    },
    #[error("failed to encode input: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("unexpected result type: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Posts `{event, input}` to a single RPC url.
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `event` and decode its `data` into `O`.
    pub async fn call<I, O>(&self, event: &str, input: &I) -> Result<O, RpcClientError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input).map_err(RpcClientError::Encode)?;
        let data = self.call_value(event, input).await?;
        serde_json::from_value(data).map_err(RpcClientError::Decode)
    }

    /// Call `event` and return its raw `data`.
    pub async fn call_value(&self, event: &str, input: Value) -> Result<Value, RpcClientError> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "event": event, "input": input }))
            .send()
            .await
            .map_err(|source| RpcClientError::Http {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        let mut body: Value = response
            .json()
            .await
            .map_err(|source| RpcClientError::InvalidResponse {
                url: self.url.clone(),
                source,
            })?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let error = match error.as_str() {
                Some(s) => s.to_string(),
                None => error.to_string(),
            };
            return Err(RpcClientError::Server {
                status,
                error,
                details: body.get("details").cloned(),
            });
        }

        Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }
}
