use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lixnet_rpc::{EventCollection, Kind, ObjectSchema, RpcClientError};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  HTTP RPC over a real socket
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Rect {
    w: f64,
    h: f64,
}

fn events() -> EventCollection {
    EventCollection::new()
        .event("echo", |input: Value| async move { anyhow::Ok(input) })
        .typed("area", |r: Rect| async move { anyhow::Ok(r.w * r.h) })
        .event_with_schema(
            "greet",
            ObjectSchema::new()
                .required("name", Kind::String)
                .optional("times", Kind::Number),
            |input: Value| async move {
                let name = input["name"].as_str().unwrap_or_default().to_string();
                let times = input["times"].as_u64().unwrap_or(1) as usize;
                anyhow::Ok(json!(vec![format!("hi {name}"); times]))
            },
        )
        .event("fail", |_: Value| async move {
            Err::<Value, _>(anyhow::anyhow!("disk on fire"))
        })
}

#[tokio::test]
async fn test_rpc_success_round_trip() {
    let (client, server) = spawn_rpc(events()).await.unwrap();

    let back = client
        .call_value("echo", json!({"nested": [1, 2, {"k": "v"}]}))
        .await
        .unwrap();
    assert_eq!(back, json!({"nested": [1, 2, {"k": "v"}]}));

    let greeting: Vec<String> = client
        .call("greet", &json!({"name": "ada", "times": 2}))
        .await
        .unwrap();
    assert_eq!(greeting, vec!["hi ada", "hi ada"]);

    server.abort();
}

#[tokio::test]
async fn test_rpc_typed_event() {
    let (client, server) = spawn_rpc(events()).await.unwrap();

    let area: f64 = client.call("area", &Rect { w: 3.0, h: 4.5 }).await.unwrap();
    assert_eq!(area, 13.5);

    let err = client.call_value("area", json!({"w": 3.0})).await.unwrap_err();
    match err {
        RpcClientError::Server { status, error, details } => {
            assert_eq!(status, 400);
            assert_eq!(error, "Invalid input");
            assert!(details.is_some());
        }
        other => panic!("expected server error, got {other:?}"),
    }

    server.abort();
}

#[tokio::test]
async fn test_rpc_unknown_event_is_404() {
    let (client, server) = spawn_rpc(events()).await.unwrap();

    let err = client.call_value("nope", json!(1)).await.unwrap_err();
    match err {
        RpcClientError::Server { status, error, details } => {
            assert_eq!(status, 404);
            assert_eq!(error, "Event not found");
            assert!(details.is_none());
        }
        other => panic!("expected server error, got {other:?}"),
    }

    server.abort();
}

#[tokio::test]
async fn test_rpc_null_input_is_rejected() {
    let (client, server) = spawn_rpc(events()).await.unwrap();

    let err = client.call_value("echo", Value::Null).await.unwrap_err();
    assert!(matches!(
        err,
        RpcClientError::Server { status: 400, ref error, .. } if error == "Input not found"
    ));

    // Falsy but present input is fine.
    assert_eq!(client.call_value("echo", json!(false)).await.unwrap(), json!(false));

    server.abort();
}

#[tokio::test]
async fn test_rpc_schema_details_name_every_field() {
    let (client, server) = spawn_rpc(events()).await.unwrap();

    let err = client
        .call_value("greet", json!({"times": "two"}))
        .await
        .unwrap_err();
    let RpcClientError::Server { status, details, .. } = err else {
        panic!("expected server error");
    };
    assert_eq!(status, 400);
    assert_eq!(
        details.unwrap(),
        json!([
            {"path": ["name"], "message": "required"},
            {"path": ["times"], "message": "expected number, received string"},
        ])
    );

    server.abort();
}

#[tokio::test]
async fn test_rpc_handler_failure_is_500() {
    let (client, server) = spawn_rpc(events()).await.unwrap();

    let err = client.call_value("fail", json!({})).await.unwrap_err();
    match err {
        RpcClientError::Server { status, error, details } => {
            assert_eq!(status, 500);
            assert_eq!(error, "Handler failed");
            assert_eq!(details, Some(json!("disk on fire")));
        }
        other => panic!("expected server error, got {other:?}"),
    }

    server.abort();
}

#[tokio::test]
async fn test_rpc_unreachable_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = lixnet_rpc::RpcClient::new(format!("http://{addr}/rpc"));
    let err = client.call_value("echo", json!(1)).await.unwrap_err();
    assert!(matches!(err, RpcClientError::Http { .. }));
}
