//! HTTP RPC dispatch: `{event, input}` in, `{data}` or `{error}` out.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::collection::EventCollection;

/// A dispatch result before it is turned into an HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl RpcResponse {
    fn ok(data: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({ "data": data }),
        }
    }

    fn error(status: StatusCode, error: &str) -> Self {
        Self {
            status,
            body: json!({ "error": error }),
        }
    }

    fn error_with_details(status: StatusCode, error: &str, details: Value) -> Self {
        Self {
            status,
            body: json!({ "error": error, "details": details }),
        }
    }
}

/// Run one RPC request body against `events`.
pub async fn dispatch(events: &EventCollection, body: &[u8]) -> RpcResponse {
    let request: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "rpc request is not valid JSON");
            return RpcResponse::error(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let Some(name) = request.get("event").and_then(Value::as_str) else {
        return RpcResponse::error(StatusCode::BAD_REQUEST, "Event not specified");
    };

    let input = match request.get("input") {
        None | Some(Value::Null) => {
            return RpcResponse::error(StatusCode::BAD_REQUEST, "Input not found");
        }
        Some(input) => input,
    };

    let Some(event) = events.get(name) else {
        tracing::debug!(event = name, "rpc event not found");
        return RpcResponse::error(StatusCode::NOT_FOUND, "Event not found");
    };

    let input = match &event.schema {
        Some(schema) => match schema.parse(input) {
            Ok(validated) => validated,
            Err(issues) => {
                tracing::debug!(event = name, issues = issues.len(), "rpc input rejected");
                return RpcResponse::error_with_details(
                    StatusCode::BAD_REQUEST,
                    "Invalid input",
                    json!(issues),
                );
            }
        },
        None => input.clone(),
    };

    match event.handler.call(input).await {
        Ok(data) => {
            tracing::debug!(event = name, "rpc event handled");
            RpcResponse::ok(data)
        }
        Err(e) => {
            tracing::warn!(event = name, error = %e, "rpc handler failed");
            RpcResponse::error_with_details(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Handler failed",
                json!(format!("{e:#}")),
            )
        }
    }
}

pub async fn handle_rpc(
    State(events): State<EventCollection>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let response = dispatch(&events, &body).await;
    (response.status, Json(response.body))
}
