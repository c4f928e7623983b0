//! Document synchronization through the wire.

use std::time::Duration;

use parley_lsp::{Context, RequestContext, Server, ServerOptions};
use parley_types::lifecycle::{Diagnostic, MessageType};
use parley_types::text::DidChangeTextDocumentParams;
use parley_types::{Position, Range, ResponseError};
use serde_json::{Map, Value, json};

use crate::common::TestClient;

const URI: &str = "file:///tmp/a.txt";

/// Server exposing `test/text` → `{text, version}` or `null` when closed.
fn text_server() -> Server {
    Server::builder(ServerOptions::default())
        .request("test/text", |params: Value, cx: RequestContext| async move {
            let uri = params["uri"].as_str().unwrap_or_default().to_string();
            Ok::<_, ResponseError>(match cx.document(&uri).await {
                Some(doc) => json!({"text": doc.text(), "version": doc.version()}),
                None => Value::Null,
            })
        })
        .build()
}

async fn text_of(client: &mut TestClient) -> Value {
    client.request("test/text", json!({"uri": URI})).await["result"].clone()
}

fn insert(line: u32, character: u32, text: &str) -> Value {
    json!({
        "range": {"start": {"line": line, "character": character}, "end": {"line": line, "character": character}},
        "text": text
    })
}

#[tokio::test]
async fn incremental_insert_splices_text() {
    let mut client = TestClient::start(text_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "abc").await;
    client.change(URI, 2, json!([insert(0, 1, "X")])).await;

    assert_eq!(text_of(&mut client).await, json!({"text": "aXbc", "version": 2}));
}

#[tokio::test]
async fn stale_version_leaves_document_untouched() {
    let mut client = TestClient::start(text_server());
    client.initialize(json!({})).await;
    client.open(URI, 5, "hello").await;
    client.change(URI, 5, json!([{"text": "replaced"}])).await;
    client.change(URI, 3, json!([insert(0, 0, ">")])).await;

    assert_eq!(text_of(&mut client).await, json!({"text": "hello", "version": 5}));
}

#[tokio::test]
async fn full_and_incremental_changes_apply_in_order() {
    let mut client = TestClient::start(text_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "one\ntwo").await;
    client
        .change(
            URI,
            2,
            json!([
                {"text": "first\nsecond\n"},
                insert(1, 6, "!"),
                {"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 5}}, "rangeLength": 5, "text": "1st"}
            ]),
        )
        .await;

    assert_eq!(
        text_of(&mut client).await,
        json!({"text": "1st\nsecond!\n", "version": 2})
    );
}

#[tokio::test]
async fn utf16_positions_count_surrogate_pairs() {
    let mut client = TestClient::start(text_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "a😀b").await;
    // 😀 is two UTF-16 units, so character 3 sits before `b`.
    client.change(URI, 2, json!([insert(0, 3, "_")])).await;
    assert_eq!(text_of(&mut client).await["text"], "a😀_b");
}

#[tokio::test]
async fn save_with_text_resyncs_and_close_forgets() {
    let mut client = TestClient::start(text_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "draft").await;
    client
        .notify(
            "textDocument/didSave",
            json!({"textDocument": {"uri": URI}, "text": "saved"}),
        )
        .await;
    assert_eq!(text_of(&mut client).await, json!({"text": "saved", "version": 1}));

    client
        .notify("textDocument/didClose", json!({"textDocument": {"uri": URI}}))
        .await;
    assert_eq!(text_of(&mut client).await, Value::Null);

    // Reopening after close is allowed.
    client.open(URI, 1, "again").await;
    assert_eq!(text_of(&mut client).await["text"], "again");
}

#[tokio::test]
async fn duplicate_open_keeps_first_document() {
    let mut client = TestClient::start(text_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "first").await;
    client.open(URI, 2, "second").await;
    assert_eq!(text_of(&mut client).await, json!({"text": "first", "version": 1}));
}

#[tokio::test]
async fn will_save_wait_until_defaults_to_no_edits() {
    let mut client = TestClient::start(text_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "x").await;
    client
        .notify(
            "textDocument/willSave",
            json!({"textDocument": {"uri": URI}, "reason": 1}),
        )
        .await;
    let reply = client
        .request(
            "textDocument/willSaveWaitUntil",
            json!({"textDocument": {"uri": URI}, "reason": 1}),
        )
        .await;
    assert_eq!(reply["result"], json!([]));
}

#[tokio::test]
async fn change_handler_sees_updated_document() {
    let server = Server::builder(ServerOptions::default())
        .notification(
            "textDocument/didChange",
            |params: Value, cx: Context| async move {
                let Ok(params) = serde_json::from_value::<DidChangeTextDocumentParams>(params)
                else {
                    return;
                };
                let uri = params.text_document.uri;
                let Some(doc) = cx.document(&uri).await else {
                    return;
                };
                let end = doc.position_at(doc.text().len(), cx.position_encoding());
                let diagnostic = Diagnostic {
                    range: Range::new(Position::new(0, 0), end),
                    severity: Some(3),
                    source: Some("test".into()),
                    message: format!("{} bytes", doc.text().len()),
                    extra: Map::new(),
                };
                let _ = cx
                    .client()
                    .publish_diagnostics(uri, Some(doc.version()), vec![diagnostic])
                    .await;
                let _ = cx.client().log_message(MessageType::Info, "checked").await;
            },
        )
        .build();
    let mut client = TestClient::start(server);
    client.initialize(json!({})).await;
    client.open(URI, 1, "ab").await;
    client.change(URI, 2, json!([insert(0, 2, "\ncd")])).await;

    let published = client.expect_method("textDocument/publishDiagnostics").await;
    let params = &published["params"];
    assert_eq!(params["uri"], URI);
    assert_eq!(params["version"], 2);
    assert_eq!(params["diagnostics"][0]["message"], "5 bytes");
    assert_eq!(
        params["diagnostics"][0]["range"]["end"],
        json!({"line": 1, "character": 2})
    );

    let logged = client.expect_method("window/logMessage").await;
    assert_eq!(logged["params"], json!({"type": 3, "message": "checked"}));
}

#[tokio::test]
async fn open_handler_can_wait_on_client_response() {
    let server = Server::builder(ServerOptions {
        request_timeout: Duration::from_secs(3),
        ..ServerOptions::default()
    })
    .notification(
        "textDocument/didOpen",
        |_params: Value, cx: Context| async move {
            let text = match cx
                .client()
                .send_request("workspace/configuration", json!({"items": [{"section": "parley"}]}))
                .await
            {
                Ok(value) => format!("ok {value}"),
                Err(e) => format!("err {e}"),
            };
            let _ = cx.client().log_message(MessageType::Info, text).await;
        },
    )
    .request("test/ping", |_params: Value, _cx: RequestContext| async move {
        Ok::<_, ResponseError>(json!("pong"))
    })
    .build();
    let mut client = TestClient::start(server);
    client.initialize(json!({})).await;
    client.open(URI, 1, "x").await;

    let outbound = client.expect_method("workspace/configuration").await;
    // The connection keeps serving while the handler waits.
    let ping = client.request("test/ping", Value::Null).await;
    assert_eq!(ping["result"], "pong");

    client
        .send(json!({"jsonrpc": "2.0", "id": outbound["id"], "result": [42]}))
        .await;
    let logged = client.expect_method("window/logMessage").await;
    assert_eq!(logged["params"]["message"], "ok [42]");
}

#[tokio::test]
async fn notification_handlers_run_in_arrival_order() {
    let server = Server::builder(ServerOptions::default())
        .notification(
            "textDocument/didChange",
            |params: Value, cx: Context| async move {
                let version = params["textDocument"]["version"].as_i64().unwrap_or(-1);
                // Early versions take longer; order must still hold.
                let delay = if version < 3 { 30 } else { 0 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let _ = cx
                    .client()
                    .log_message(MessageType::Info, version.to_string())
                    .await;
            },
        )
        .build();
    let mut client = TestClient::start(server);
    client.initialize(json!({})).await;
    client.open(URI, 1, "").await;
    for version in 2..=4 {
        client.change(URI, version, json!([{"text": "t"}])).await;
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let logged = client.expect_method("window/logMessage").await;
        seen.push(logged["params"]["message"].as_str().unwrap().to_string());
    }
    assert_eq!(seen, ["2", "3", "4"]);
}
