//! Malformed input, unknown methods and handler failures.

use parley_lsp::{RequestContext, Server, ServerOptions};
use parley_types::{ErrorCode, ResponseError};
use serde_json::{Value, json};

use crate::common::{RawPipe, TestClient, error_code};

fn failing_server() -> Server {
    Server::builder(ServerOptions::default())
        .request("test/fail", |_params: Value, _cx: RequestContext| async move {
            Err::<Value, _>(
                ResponseError::new(ErrorCode::ContentModified, "stale")
                    .with_data(json!({"retry": true})),
            )
        })
        .request("test/typed", |params: Value, _cx: RequestContext| async move {
            let n: u32 = parley_lsp::parse_params(params)?;
            Ok::<_, ResponseError>(json!(n + 1))
        })
        .build()
}

#[tokio::test]
async fn unknown_request_is_method_not_found() {
    let mut client = TestClient::default_server();
    client.initialize(json!({})).await;
    let reply = client.request("textDocument/hover", json!({})).await;
    assert_eq!(error_code(&reply), -32601);
    assert_eq!(reply["error"]["message"], "Method not found: textDocument/hover");

    let reply = client.request("$/custom", json!({})).await;
    assert_eq!(error_code(&reply), -32601);
}

#[tokio::test]
async fn malformed_json_gets_parse_error_with_null_id() {
    let mut client = TestClient::default_server();
    client.send_raw(b"{\"jsonrpc\": \"2.0\", \"id\": 1,").await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(error_code(&reply), -32700);
}

#[tokio::test]
async fn request_shaped_bad_envelope_gets_parse_error() {
    let mut client = TestClient::default_server();
    client
        .send(json!({"jsonrpc": "1.0", "id": 4, "method": "initialize"}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(error_code(&reply), -32700);
}

#[tokio::test]
async fn other_bad_envelopes_are_dropped() {
    let mut client = TestClient::default_server();
    client.send(json!({"jsonrpc": "2.0", "foo": 1})).await;
    client.send(json!([1, 2, 3])).await;
    client.notify("some/unknownNotification", json!({})).await;

    // The next thing on the wire is the reply to this request.
    let id = client.send_request("test/anything", json!({})).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], id);
    assert_eq!(error_code(&reply), -32002);
}

#[tokio::test]
async fn handler_errors_keep_code_and_data() {
    let mut client = TestClient::start(failing_server());
    client.initialize(json!({})).await;

    let reply = client.request("test/fail", Value::Null).await;
    assert_eq!(error_code(&reply), -32801);
    assert_eq!(reply["error"]["data"], json!({"retry": true}));

    let reply = client.request("test/typed", json!("nope")).await;
    assert_eq!(error_code(&reply), -32602);
    let reply = client.request("test/typed", json!(41)).await;
    assert_eq!(reply["result"], 42);
}

#[tokio::test]
async fn response_for_unknown_id_is_ignored() {
    let mut client = TestClient::default_server();
    client.initialize(json!({})).await;
    client
        .send(json!({"jsonrpc": "2.0", "id": 999, "result": null}))
        .await;
    let reply = client.request("shutdown", Value::Null).await;
    assert_eq!(reply["result"], Value::Null);
}

#[tokio::test]
async fn oversized_frame_is_fatal() {
    let server = Server::builder(ServerOptions {
        max_frame_bytes: 16,
        ..ServerOptions::default()
    })
    .build();
    let mut pipe = RawPipe::start(server);
    pipe.write(b"Content-Length: 1000\r\n\r\n").await;
    let outcome = pipe.task.await.unwrap();
    assert!(outcome.is_err());
}

#[tokio::test]
async fn header_case_and_extra_headers_are_tolerated() {
    let mut pipe = RawPipe::start(Server::builder(ServerOptions::default()).build());
    let body = br#"{"jsonrpc":"2.0","id":"a","method":"shutdown"}"#;
    let frame = format!(
        "content-length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n",
        body.len()
    );
    pipe.write(frame.as_bytes()).await;
    pipe.write(body).await;

    let reply = pipe.output.read_frame().await.unwrap().unwrap();
    let reply: Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(reply["id"], "a");
    assert_eq!(error_code(&reply), -32002);
}
