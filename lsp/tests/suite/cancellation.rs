//! `$/cancelRequest`, concurrent handlers and progress reporting.

use std::time::Duration;

use parley_lsp::{RequestContext, Server, ServerOptions, parse_params};
use parley_types::progress::{WorkDoneProgressBegin, WorkDoneProgressParams};
use parley_types::{ResponseError, methods};
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::common::{TestClient, error_code};

fn slow_server() -> Server {
    Server::builder(ServerOptions::default())
        .request("test/wait", |_params: Value, cx: RequestContext| async move {
            cx.cancellation().cancelled().await;
            Ok::<_, ResponseError>(json!("finished anyway"))
        })
        .request("test/sleep", |params: Value, _cx: RequestContext| async move {
            let ms = params.as_u64().unwrap_or(50);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, ResponseError>(json!(ms))
        })
        .build()
}

#[tokio::test]
async fn cancelled_request_replies_request_cancelled() {
    let mut client = TestClient::start(slow_server());
    client.initialize(json!({})).await;

    // Id 1 went to initialize; burn 2..=4 so the next one is 5.
    for _ in 0..3 {
        client.request("test/sleep", json!(0)).await;
    }
    let id = client.send_request("test/wait", Value::Null).await;
    assert_eq!(id, 5);
    client.notify(methods::CANCEL_REQUEST, json!({"id": 5})).await;

    let reply = client.response(&json!(5)).await;
    assert_eq!(error_code(&reply), -32800);
    assert!(reply.get("result").is_none());
}

#[tokio::test]
async fn cancellation_overrides_a_successful_result() {
    let mut client = TestClient::start(slow_server());
    client.initialize(json!({})).await;

    let id = client.send_request("test/sleep", json!(100)).await;
    client.notify(methods::CANCEL_REQUEST, json!({"id": id})).await;
    let reply = client.response(&json!(id)).await;
    assert_eq!(error_code(&reply), -32800);
}

#[tokio::test]
async fn cancel_for_finished_or_unknown_request_is_ignored() {
    let mut client = TestClient::start(slow_server());
    client.initialize(json!({})).await;

    let reply = client.request("test/sleep", json!(0)).await;
    assert_eq!(reply["result"], 0);
    client
        .notify(methods::CANCEL_REQUEST, json!({"id": reply["id"]}))
        .await;
    client
        .notify(methods::CANCEL_REQUEST, json!({"id": "never-sent"}))
        .await;

    let reply = client.request("shutdown", Value::Null).await;
    assert_eq!(reply["result"], Value::Null);
}

#[tokio::test]
async fn slow_handler_does_not_block_later_requests() {
    let mut client = TestClient::start(slow_server());
    client.initialize(json!({})).await;

    let slow = client.send_request("test/sleep", json!(300)).await;
    let fast = client.send_request("test/sleep", json!(0)).await;

    let first = client.recv().await;
    assert_eq!(first["id"], fast);
    let second = client.response(&json!(slow)).await;
    assert_eq!(second["result"], 300);
}

#[tokio::test]
async fn exactly_one_response_per_cancelled_request() {
    let gate = std::sync::Arc::new(Notify::new());
    let handler_gate = gate.clone();
    let server = Server::builder(ServerOptions::default())
        .request("test/gated", move |_params: Value, _cx: RequestContext| {
            let gate = handler_gate.clone();
            async move {
                gate.notified().await;
                Ok::<_, ResponseError>(Value::Null)
            }
        })
        .build();
    let mut client = TestClient::start(server);
    client.initialize(json!({})).await;

    let id = client.send_request("test/gated", Value::Null).await;
    client.notify(methods::CANCEL_REQUEST, json!({"id": id})).await;
    client.notify(methods::CANCEL_REQUEST, json!({"id": id})).await;
    // Round-trip so both cancels are processed before the handler finishes.
    client.request("test/none", Value::Null).await;
    gate.notify_one();

    let reply = client.response(&json!(id)).await;
    assert_eq!(error_code(&reply), -32800);
    let after = client.request("shutdown", Value::Null).await;
    assert_eq!(after["result"], Value::Null);
    assert!(client.backlog().is_empty(), "unexpected extra messages");
}

#[tokio::test]
async fn work_done_progress_streams_before_response() {
    let server = Server::builder(ServerOptions::default())
        .request("test/index", |params: Value, cx: RequestContext| async move {
            let params: WorkDoneProgressParams = parse_params(params)?;
            let Some(token) = params.work_done_token else {
                return Ok(json!("no progress"));
            };
            let begin = WorkDoneProgressBegin {
                title: "Indexing".into(),
                cancellable: Some(false),
                message: None,
                percentage: Some(0),
            };
            let progress = cx
                .client()
                .work_done_progress(token, begin)
                .await
                .map_err(|e| ResponseError::request_failed(e.to_string()))?;
            let _ = progress.report(Some("halfway".into()), Some(50)).await;
            let _ = progress.end(Some("done".into())).await;
            Ok::<_, ResponseError>(json!("indexed"))
        })
        .build();
    let mut client = TestClient::start(server);
    client.initialize(json!({})).await;

    let id = client
        .send_request("test/index", json!({"workDoneToken": "idx-1"}))
        .await;
    let kinds: Vec<Value> = {
        let mut kinds = Vec::new();
        for _ in 0..3 {
            let message = client.recv().await;
            assert_eq!(message["method"], "$/progress");
            assert_eq!(message["params"]["token"], "idx-1");
            kinds.push(message["params"]["value"]["kind"].clone());
        }
        kinds
    };
    assert_eq!(kinds, vec![json!("begin"), json!("report"), json!("end")]);

    let reply = client.recv().await;
    assert_eq!(reply["id"], id);
    assert_eq!(reply["result"], "indexed");
}
