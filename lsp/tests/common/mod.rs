//! Shared test utilities and fixtures
//!
//! `TestClient` plays the editor side of a connection.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use parley_lsp::{ExitStatus, FrameReader, FrameWriter, Server, ServerOptions};
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream, duplex};
use tokio::task::JoinHandle;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    writer: FrameWriter<DuplexStream>,
    reader: FrameReader<DuplexStream>,
    task: JoinHandle<anyhow::Result<ExitStatus>>,
    next_id: i64,
    /// Messages read while waiting for something else.
    backlog: VecDeque<Value>,
}

impl TestClient {
    pub fn start(server: Server) -> Self {
        let (client_out, server_in) = duplex(256 * 1024);
        let (server_out, client_in) = duplex(256 * 1024);
        let task = tokio::spawn(server.serve(server_in, server_out));
        Self {
            writer: FrameWriter::new(client_out),
            reader: FrameReader::new(client_in),
            task,
            next_id: 1,
            backlog: VecDeque::new(),
        }
    }

    pub fn default_server() -> Self {
        Self::start(Server::builder(ServerOptions::default()).build())
    }

    pub async fn send(&mut self, value: Value) {
        self.send_raw(value.to_string().as_bytes()).await;
    }

    pub async fn send_raw(&mut self, body: &[u8]) {
        self.writer.write_frame(body).await.expect("write frame");
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    /// Send a request and return its id without waiting.
    pub async fn send_request(&mut self, method: &str, params: Value) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        id
    }

    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.send_request(method, params).await;
        self.response(&json!(id)).await
    }

    async fn read(&mut self) -> Value {
        let body = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for server")
            .expect("read frame")
            .expect("server closed output");
        serde_json::from_slice(&body).expect("server sent invalid JSON")
    }

    /// Next message in arrival order.
    pub async fn recv(&mut self) -> Value {
        match self.backlog.pop_front() {
            Some(value) => value,
            None => self.read().await,
        }
    }

    /// Wait for the response with `id`, parking anything else in the backlog.
    pub async fn response(&mut self, id: &Value) -> Value {
        if let Some(pos) = self
            .backlog
            .iter()
            .position(|m| m.get("method").is_none() && m.get("id") == Some(id))
        {
            return self.backlog.remove(pos).expect("position is in bounds");
        }
        loop {
            let message = self.read().await;
            if message.get("method").is_none() && message.get("id") == Some(id) {
                return message;
            }
            self.backlog.push_back(message);
        }
    }

    /// Messages received but not yet consumed.
    pub fn backlog(&self) -> &VecDeque<Value> {
        &self.backlog
    }

    /// Wait for a server-initiated message with `method`.
    pub async fn expect_method(&mut self, method: &str) -> Value {
        if let Some(pos) = self.backlog.iter().position(|m| m["method"] == method) {
            return self.backlog.remove(pos).expect("position is in bounds");
        }
        loop {
            let message = self.read().await;
            if message["method"] == method {
                return message;
            }
            self.backlog.push_back(message);
        }
    }

    /// `initialize` with `capabilities`, then `initialized`. Returns the result.
    pub async fn initialize(&mut self, capabilities: Value) -> Value {
        let reply = self
            .request(
                "initialize",
                json!({"processId": null, "rootUri": null, "capabilities": capabilities}),
            )
            .await;
        self.notify("initialized", json!({})).await;
        reply["result"].clone()
    }

    pub async fn open(&mut self, uri: &str, version: i32, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": uri, "languageId": "plaintext", "version": version, "text": text}}),
        )
        .await;
    }

    pub async fn change(&mut self, uri: &str, version: i32, changes: Value) {
        self.notify(
            "textDocument/didChange",
            json!({"textDocument": {"uri": uri, "version": version}, "contentChanges": changes}),
        )
        .await;
    }

    pub async fn exit(mut self) -> ExitStatus {
        self.notify("exit", Value::Null).await;
        self.finish().await
    }

    /// Wait for the server task to end.
    pub async fn finish(self) -> ExitStatus {
        tokio::time::timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server returned a transport error")
    }

    /// Close the input stream and wait for the server.
    pub async fn hang_up(self) -> anyhow::Result<ExitStatus> {
        let Self { writer, task, .. } = self;
        drop(writer);
        tokio::time::timeout(RECV_TIMEOUT, task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Server plus a raw byte pipe, for framing faults.
pub struct RawPipe {
    pub input: DuplexStream,
    pub output: FrameReader<DuplexStream>,
    pub task: JoinHandle<anyhow::Result<ExitStatus>>,
}

impl RawPipe {
    pub fn start(server: Server) -> Self {
        let (client_out, server_in) = duplex(64 * 1024);
        let (server_out, client_in) = duplex(64 * 1024);
        let task = tokio::spawn(server.serve(server_in, server_out));
        Self {
            input: client_out,
            output: FrameReader::new(client_in),
            task,
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) {
        self.input.write_all(bytes).await.expect("write bytes");
    }
}

pub fn error_code(reply: &Value) -> i64 {
    reply["error"]["code"]
        .as_i64()
        .unwrap_or_else(|| panic!("expected an error reply, got {reply}"))
}
