//! Built-in semantic token requests backed by a word provider.

use parley_lsp::semantic_tokens::apply_edits;
use parley_lsp::{SemanticToken, Server, ServerOptions, TextDocument};
use parley_types::PositionEncoding;
use parley_types::semantic_tokens::{SemanticTokensEdit, SemanticTokensLegend};
use serde_json::{Value, json};

use crate::common::TestClient;

const URI: &str = "file:///tmp/words.txt";

/// One token per ASCII word; type 1 for capitalized words, else 0.
fn words(document: &TextDocument, _encoding: PositionEncoding) -> Vec<SemanticToken> {
    let mut tokens = Vec::new();
    for (line, text) in document.text().lines().enumerate() {
        let mut start = None;
        for (i, ch) in text.char_indices().chain([(text.len(), ' ')]) {
            match (start, ch.is_ascii_alphanumeric()) {
                (None, true) => start = Some(i),
                (Some(s), false) => {
                    let upper = text[s..].starts_with(|c: char| c.is_ascii_uppercase());
                    tokens.push(SemanticToken::new(
                        line as u32,
                        s as u32,
                        (i - s) as u32,
                        u32::from(upper),
                        0,
                    ));
                    start = None;
                }
                _ => {}
            }
        }
    }
    tokens
}

fn token_server() -> Server {
    Server::builder(ServerOptions::default())
        .semantic_tokens(
            SemanticTokensLegend::new(["variable", "type"], ["declaration"]),
            words,
        )
        .build()
}

async fn full(client: &mut TestClient) -> Value {
    client
        .request(
            "textDocument/semanticTokens/full",
            json!({"textDocument": {"uri": URI}}),
        )
        .await["result"]
        .clone()
}

async fn delta(client: &mut TestClient, previous: &Value) -> Value {
    client
        .request(
            "textDocument/semanticTokens/full/delta",
            json!({"textDocument": {"uri": URI}, "previousResultId": previous}),
        )
        .await["result"]
        .clone()
}

fn data(value: &Value) -> Vec<u32> {
    serde_json::from_value(value["data"].clone()).unwrap()
}

#[tokio::test]
async fn capabilities_advertise_legend_and_delta() {
    let mut client = TestClient::start(token_server());
    let result = client.initialize(json!({})).await;
    let provider = &result["capabilities"]["semanticTokensProvider"];
    assert_eq!(provider["legend"]["tokenTypes"], json!(["variable", "type"]));
    assert_eq!(provider["full"], json!({"delta": true}));
    assert_eq!(provider["range"], true);
}

#[tokio::test]
async fn full_encodes_relative_tuples() {
    let mut client = TestClient::start(token_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "let Foo = bar\n  baz").await;

    let result = full(&mut client).await;
    assert!(result["resultId"].is_string());
    assert_eq!(
        data(&result),
        vec![0, 0, 3, 0, 0, 0, 4, 3, 1, 0, 0, 6, 3, 0, 0, 1, 2, 3, 0, 0]
    );
}

#[tokio::test]
async fn unchanged_document_yields_empty_delta_with_same_id() {
    let mut client = TestClient::start(token_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "alpha beta").await;

    let first = full(&mut client).await;
    let again = full(&mut client).await;
    assert_eq!(first["resultId"], again["resultId"]);

    let result = delta(&mut client, &first["resultId"]).await;
    assert_eq!(result["resultId"], first["resultId"]);
    assert_eq!(result["edits"], json!([]));
}

#[tokio::test]
async fn edit_produces_delta_that_reconstructs_new_tokens() {
    let mut client = TestClient::start(token_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "alpha beta\ngamma").await;
    let first = full(&mut client).await;
    let old = data(&first);

    client
        .change(
            URI,
            2,
            json!([{"range": {"start": {"line": 0, "character": 5}, "end": {"line": 0, "character": 5}}, "text": " Mid"}]),
        )
        .await;

    let result = delta(&mut client, &first["resultId"]).await;
    assert_ne!(result["resultId"], first["resultId"]);
    let edits: Vec<SemanticTokensEdit> = serde_json::from_value(result["edits"].clone()).unwrap();
    assert!(!edits.is_empty());

    let fresh = data(
        &client
            .request(
                "textDocument/semanticTokens/range",
                json!({"textDocument": {"uri": URI}, "range": {"start": {"line": 0, "character": 0}, "end": {"line": 9, "character": 0}}}),
            )
            .await["result"],
    );
    assert_eq!(apply_edits(&old, &edits).unwrap(), fresh);

    // The new id is now the delta base.
    let next = delta(&mut client, &result["resultId"]).await;
    assert_eq!(next["edits"], json!([]));
}

#[tokio::test]
async fn unknown_previous_id_falls_back_to_full() {
    let mut client = TestClient::start(token_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "one two").await;
    let result = delta(&mut client, &json!("does-not-exist")).await;
    assert!(result.get("edits").is_none());
    assert_eq!(data(&result).len(), 10);
}

#[tokio::test]
async fn range_limits_to_overlapping_tokens() {
    let mut client = TestClient::start(token_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "a b\nc d\ne f").await;
    let reply = client
        .request(
            "textDocument/semanticTokens/range",
            json!({"textDocument": {"uri": URI}, "range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 3}}}),
        )
        .await;
    assert_eq!(data(&reply["result"]), vec![1, 0, 1, 0, 0, 0, 2, 1, 0, 0]);
}

#[tokio::test]
async fn close_drops_cached_result() {
    let mut client = TestClient::start(token_server());
    client.initialize(json!({})).await;
    client.open(URI, 1, "x").await;
    let first = full(&mut client).await;

    client
        .notify("textDocument/didClose", json!({"textDocument": {"uri": URI}}))
        .await;
    let reply = client
        .request(
            "textDocument/semanticTokens/full",
            json!({"textDocument": {"uri": URI}}),
        )
        .await;
    assert_eq!(reply["error"]["code"], -32803);

    client.open(URI, 1, "x").await;
    let result = delta(&mut client, &first["resultId"]).await;
    assert!(result.get("edits").is_none(), "expected a full result after reopen");
}
