//! The connection loop: read frames, gate them on the session, dispatch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use futures_util::FutureExt;
use parley_types::capabilities::{
    SaveOptions, SemanticTokensFullOptions, SemanticTokensOptions, TextDocumentSync,
    TextDocumentSyncOptions, WorkDoneProgressOptions,
};
use parley_types::lifecycle::{CancelParams, SetTraceParams};
use parley_types::semantic_tokens::{
    SemanticTokensDeltaParams, SemanticTokensLegend, SemanticTokensParams,
    SemanticTokensRangeParams,
};
use parley_types::text::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, WillSaveTextDocumentParams,
};
use parley_types::{
    InitializeParams, Message, Notification, PositionEncoding, Request, RequestId, Response,
    ResponseError, ServerCapabilities, ServerInfo, TextDocumentSyncKind, methods,
};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinSet;

use crate::cancel::CancellationToken;
use crate::client::{ClientHandle, WRITER_CHANNEL_CAPACITY, WriterCommand};
use crate::codec::{DEFAULT_MAX_FRAME_BYTES, FrameReader, FrameWriter};
use crate::documents::DocumentStore;
use crate::handler::{
    Context, HandlerTable, NotificationHandler, RequestContext, RequestHandler, SharedDocuments,
    parse_params,
};
use crate::pending::{PendingCalls, ResolveError};
use crate::semantic_tokens::{self, SemanticTokensCache, SemanticTokensProvider};
use crate::session::{ExitStatus, Session};

/// Default timeout for server-to-client requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub server_info: Option<ServerInfo>,
    pub sync_kind: TextDocumentSyncKind,
    /// Encodings the server can work in, most preferred first.
    pub position_encodings: Vec<PositionEncoding>,
    pub max_frame_bytes: usize,
    pub request_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            server_info: None,
            sync_kind: TextDocumentSyncKind::Incremental,
            position_encodings: vec![PositionEncoding::Utf16],
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct TokenSupport {
    provider: Arc<dyn SemanticTokensProvider>,
    cache: Mutex<SemanticTokensCache>,
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, ResponseError> {
    serde_json::to_value(value).map_err(|e| ResponseError::internal_error(e.to_string()))
}

impl TokenSupport {
    async fn compute(&self, cx: &RequestContext, uri: &str) -> Result<Vec<u32>, ResponseError> {
        let document = cx
            .document(uri)
            .await
            .ok_or_else(|| ResponseError::request_failed(format!("document not open: {uri}")))?;
        let tokens = self.provider.tokens(&document, cx.position_encoding());
        Ok(semantic_tokens::encode(&tokens))
    }

    async fn full(
        self: Arc<Self>,
        params: Value,
        cx: RequestContext,
    ) -> Result<Value, ResponseError> {
        let params: SemanticTokensParams = parse_params(params)?;
        let uri = params.text_document.uri;
        let data = self.compute(&cx, &uri).await?;
        let tokens = self.cache.lock().await.full(&uri, data);
        to_result(&tokens)
    }

    async fn delta(
        self: Arc<Self>,
        params: Value,
        cx: RequestContext,
    ) -> Result<Value, ResponseError> {
        let params: SemanticTokensDeltaParams = parse_params(params)?;
        let uri = params.text_document.uri;
        let data = self.compute(&cx, &uri).await?;
        let result = self
            .cache
            .lock()
            .await
            .delta(&uri, &params.previous_result_id, data);
        to_result(&result)
    }

    async fn range(
        self: Arc<Self>,
        params: Value,
        cx: RequestContext,
    ) -> Result<Value, ResponseError> {
        let params: SemanticTokensRangeParams = parse_params(params)?;
        let uri = params.text_document.uri;
        let document = cx
            .document(&uri)
            .await
            .ok_or_else(|| ResponseError::request_failed(format!("document not open: {uri}")))?;
        let all = self.provider.tokens(&document, cx.position_encoding());
        let tokens = semantic_tokens::tokens_in_range(&all, params.range);
        to_result(&parley_types::semantic_tokens::SemanticTokens {
            result_id: None,
            data: semantic_tokens::encode(&tokens),
        })
    }
}

/// Collects handlers and capabilities, then builds a [`Server`].
pub struct ServerBuilder {
    options: ServerOptions,
    capabilities: ServerCapabilities,
    handlers: HandlerTable,
    tokens: Option<(SemanticTokensLegend, Arc<TokenSupport>)>,
}

impl ServerBuilder {
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            capabilities: ServerCapabilities::default(),
            handlers: HandlerTable::new(),
            tokens: None,
        }
    }

    /// Base capabilities. Sync, encoding and semantic tokens are filled in by
    /// the engine on top of these.
    #[must_use]
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn request(mut self, method: impl Into<String>, handler: impl RequestHandler) -> Self {
        self.handlers.on_request(method, handler);
        self
    }

    /// Notification handlers for document sync methods run after the engine
    /// has updated its own store.
    #[must_use]
    pub fn notification(
        mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler,
    ) -> Self {
        self.handlers.on_notification(method, handler);
        self
    }

    /// Serve `full`, `full/delta` and `range` semantic token requests from `provider`.
    #[must_use]
    pub fn semantic_tokens(
        mut self,
        legend: SemanticTokensLegend,
        provider: impl SemanticTokensProvider,
    ) -> Self {
        let support = Arc::new(TokenSupport {
            provider: Arc::new(provider),
            cache: Mutex::new(SemanticTokensCache::new()),
        });
        let s = support.clone();
        self.handlers.on_request(
            methods::SEMANTIC_TOKENS_FULL,
            move |params: Value, cx: RequestContext| s.clone().full(params, cx),
        );
        let s = support.clone();
        self.handlers.on_request(
            methods::SEMANTIC_TOKENS_FULL_DELTA,
            move |params: Value, cx: RequestContext| s.clone().delta(params, cx),
        );
        let s = support.clone();
        self.handlers.on_request(
            methods::SEMANTIC_TOKENS_RANGE,
            move |params: Value, cx: RequestContext| s.clone().range(params, cx),
        );
        self.tokens = Some((legend, support));
        self
    }

    #[must_use]
    pub fn build(self) -> Server {
        let mut capabilities = self.capabilities;
        let wait_until = self.handlers.handles_request(methods::WILL_SAVE_WAIT_UNTIL);
        capabilities.text_document_sync = Some(TextDocumentSync::Options(TextDocumentSyncOptions {
            open_close: Some(true),
            change: Some(self.options.sync_kind),
            will_save: Some(true),
            will_save_wait_until: Some(wait_until),
            save: Some(SaveOptions {
                include_text: Some(true),
            }),
        }));

        let tokens = self.tokens.map(|(legend, support)| {
            capabilities.semantic_tokens_provider = Some(SemanticTokensOptions {
                work_done_progress: WorkDoneProgressOptions::default(),
                legend,
                range: Some(true),
                full: Some(SemanticTokensFullOptions::Delta { delta: Some(true) }),
            });
            support
        });

        Server {
            options: self.options,
            capabilities,
            handlers: Arc::new(self.handlers),
            tokens,
        }
    }
}

pub struct Server {
    options: ServerOptions,
    capabilities: ServerCapabilities,
    handlers: Arc<HandlerTable>,
    tokens: Option<Arc<TokenSupport>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.options)
            .field("handlers", &self.handlers)
            .field("semantic_tokens", &self.tokens.is_some())
            .finish_non_exhaustive()
    }
}

impl Server {
    #[must_use]
    pub fn builder(options: ServerOptions) -> ServerBuilder {
        ServerBuilder::new(options)
    }

    #[must_use]
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Run one connection until `exit` or end of input.
    ///
    /// Returns how the session ended; transport faults (truncated frames,
    /// oversized frames, read errors) are the error case.
    pub async fn serve<R, W>(self, input: R, output: W) -> Result<ExitStatus>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(output);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(message) => {
                        if let Err(e) = writer.write_message(&message).await {
                            tracing::warn!("LSP write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let session = Session::new();
        let pending = Arc::new(Mutex::new(PendingCalls::new()));
        let client = ClientHandle::new(
            writer_tx.clone(),
            pending.clone(),
            session.subscribe_trace(),
            self.options.request_timeout,
        );
        let mut tasks = JoinSet::new();
        let notifications = spawn_notification_worker(&mut tasks);
        let mut conn = Connection {
            server: self,
            session,
            client,
            pending,
            documents: Arc::new(RwLock::new(DocumentStore::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tasks,
            notifications,
        };

        let mut reader = FrameReader::with_limit(input, conn.server.options.max_frame_bytes);
        let outcome = loop {
            let frame = match reader.read_message().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("client closed input");
                    break Ok(ExitStatus::ConnectionClosed);
                }
                Err(e) => break Err(e.context("reading from client")),
            };
            match frame {
                Ok(message) => {
                    if let Some(status) = conn.handle_message(message).await {
                        break Ok(status);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable message");
                    if let Some(reply) = e.reply() {
                        conn.send(reply).await;
                    }
                }
            }
            while conn.tasks.try_join_next().is_some() {}
        };

        conn.tasks.abort_all();
        conn.pending.lock().await.abandon_all();
        let _ = writer_tx.send(WriterCommand::Shutdown).await;
        writer_handle.await.context("joining writer task")?;

        if let Ok(status) = &outcome {
            tracing::info!(?status, "connection finished");
        }
        outcome
    }
}

/// A notification handler call waiting for the notification worker.
struct QueuedNotification {
    method: String,
    params: Value,
    handler: Arc<dyn NotificationHandler>,
    cx: Context,
}

/// Runs notification handlers one at a time, in arrival order, off the
/// reader loop. The reader keeps resolving client responses while a handler
/// awaits one.
fn spawn_notification_worker(
    tasks: &mut JoinSet<()>,
) -> mpsc::UnboundedSender<QueuedNotification> {
    let (tx, mut rx) = mpsc::unbounded_channel::<QueuedNotification>();
    tasks.spawn(async move {
        while let Some(queued) = rx.recv().await {
            let QueuedNotification {
                method,
                params,
                handler,
                cx,
            } = queued;
            let outcome = AssertUnwindSafe(handler.call(params, cx))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                tracing::error!(method = %method, "notification handler panicked");
            }
        }
    });
    tx
}

struct Connection {
    server: Server,
    session: Session,
    client: ClientHandle,
    pending: Arc<Mutex<PendingCalls>>,
    documents: SharedDocuments,
    in_flight: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
    tasks: JoinSet<()>,
    notifications: mpsc::UnboundedSender<QueuedNotification>,
}

impl Connection {
    async fn send(&self, message: Message) {
        if self.client.send(message).await.is_err() {
            tracing::debug!("writer closed; dropping outbound message");
        }
    }

    async fn reply(&self, id: RequestId, result: Result<Value, ResponseError>) {
        self.send(Response::from_result(id, result).into()).await;
    }

    fn context(&self) -> Context {
        Context::new(
            self.client.clone(),
            self.documents.clone(),
            self.session.negotiated().unwrap_or_default(),
        )
    }

    /// Returns the exit status once the session is over.
    async fn handle_message(&mut self, message: Message) -> Option<ExitStatus> {
        match message {
            Message::Request(request) => {
                self.handle_request(request).await;
                None
            }
            Message::Notification(notification) => self.handle_notification(notification).await,
            Message::Response(response) => {
                match self.pending.lock().await.resolve(response) {
                    Ok(_) => {}
                    Err(e @ ResolveError::Cancelled { .. }) => tracing::debug!("{e}"),
                    Err(e) => tracing::warn!("{e}"),
                }
                None
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        let Request { id, method, params } = request;
        let params = params.unwrap_or(Value::Null);

        self.trace_received(format!("Received request '{method} - ({id})'."), &params)
            .await;

        if let Err(error) = self.session.admit_request(&method) {
            tracing::debug!(
                method = %method,
                id = %id,
                state = ?self.session.state(),
                "request rejected"
            );
            self.reply(id, Err(error)).await;
            return;
        }

        match method.as_str() {
            methods::INITIALIZE => {
                let result = parse_params::<InitializeParams>(params).and_then(|params| {
                    self.session.initialize(
                        params,
                        self.server.capabilities.clone(),
                        self.server.options.server_info.clone(),
                        &self.server.options.position_encodings,
                    )
                });
                let result = result.and_then(|r| to_result(&r));
                self.reply(id, result).await;
            }
            methods::SHUTDOWN => {
                self.session.shutdown();
                self.reply(id, Ok(Value::Null)).await;
            }
            _ => match self.server.handlers.request(&method) {
                Some(handler) => self.spawn_request(id, method, params, handler).await,
                None if method == methods::WILL_SAVE_WAIT_UNTIL => {
                    self.reply(id, Ok(Value::Array(Vec::new()))).await;
                }
                None => {
                    tracing::debug!(method = %method, "no handler for request");
                    self.reply(id, Err(ResponseError::method_not_found(&method)))
                        .await;
                }
            },
        }
    }

    async fn spawn_request(
        &mut self,
        id: RequestId,
        method: String,
        params: Value,
        handler: Arc<dyn RequestHandler>,
    ) {
        let token = CancellationToken::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains_key(&id) {
                drop(in_flight);
                tracing::warn!(id = %id, method = %method, "duplicate in-flight request id");
                self.reply(
                    id,
                    Err(ResponseError::invalid_request("request id already in flight")),
                )
                .await;
                return;
            }
            in_flight.insert(id.clone(), token.clone());
        }

        let cx = RequestContext::new(id.clone(), token.clone(), self.context());
        let client = self.client.clone();
        let in_flight = self.in_flight.clone();
        self.tasks.spawn(async move {
            let outcome = AssertUnwindSafe(handler.call(params, cx))
                .catch_unwind()
                .await;
            let mut result = outcome.unwrap_or_else(|_| {
                tracing::error!(method = %method, id = %id, "request handler panicked");
                Err(ResponseError::internal_error(format!(
                    "handler for {method} panicked"
                )))
            });

            in_flight.lock().await.remove(&id);
            if token.is_cancelled() {
                tracing::debug!(method = %method, id = %id, "request cancelled");
                result = Err(ResponseError::request_cancelled());
            }
            if client
                .send(Response::from_result(id, result).into())
                .await
                .is_err()
            {
                tracing::debug!(method = %method, "writer closed before response");
            }
        });
    }

    async fn handle_notification(&mut self, notification: Notification) -> Option<ExitStatus> {
        let Notification { method, params } = notification;
        let params = params.unwrap_or(Value::Null);

        if !self.session.admit_notification(&method) {
            tracing::debug!(
                method = %method,
                state = ?self.session.state(),
                "notification dropped"
            );
            return None;
        }

        self.trace_received(format!("Received notification '{method}'."), &params)
            .await;

        match method.as_str() {
            methods::EXIT => return Some(self.session.exit()),
            methods::INITIALIZED => self.session.initialized(),
            methods::CANCEL_REQUEST => match serde_json::from_value::<CancelParams>(params) {
                Ok(CancelParams { id }) => match self.in_flight.lock().await.get(&id) {
                    Some(token) => token.cancel(),
                    None => tracing::trace!(id = %id, "cancel for request not in flight"),
                },
                Err(e) => tracing::warn!(error = %e, "bad $/cancelRequest params"),
            },
            methods::SET_TRACE => match serde_json::from_value::<SetTraceParams>(params) {
                Ok(p) => self.session.set_trace(p.value),
                Err(e) => tracing::warn!(error = %e, "bad $/setTrace params"),
            },
            methods::DID_OPEN
            | methods::DID_CHANGE
            | methods::DID_SAVE
            | methods::DID_CLOSE
            | methods::WILL_SAVE => {
                self.sync_document(&method, params.clone()).await;
                self.queue_notification(&method, params);
            }
            _ => {
                if self.server.handlers.notification(&method).is_some() {
                    self.queue_notification(&method, params);
                } else {
                    tracing::trace!(method = %method, "ignoring notification");
                }
            }
        }
        None
    }

    /// Apply a document sync notification. Errors are logged and the
    /// notification dropped.
    async fn sync_document(&self, method: &str, params: Value) {
        let encoding = self.session.position_encoding();
        let outcome: Result<(), String> = match method {
            methods::DID_OPEN => match serde_json::from_value::<DidOpenTextDocumentParams>(params) {
                Ok(p) => self.documents.write().await.open(p).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            methods::DID_CHANGE => {
                match serde_json::from_value::<DidChangeTextDocumentParams>(params) {
                    Ok(p) => self
                        .documents
                        .write()
                        .await
                        .change(p, encoding)
                        .map(drop)
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
            methods::DID_SAVE => match serde_json::from_value::<DidSaveTextDocumentParams>(params) {
                Ok(p) => self.documents.write().await.save(p).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            methods::DID_CLOSE => {
                match serde_json::from_value::<DidCloseTextDocumentParams>(params) {
                    Ok(p) => {
                        let uri = p.text_document.uri;
                        if let Some(tokens) = &self.server.tokens {
                            tokens.cache.lock().await.invalidate(&uri);
                        }
                        self.documents
                            .write()
                            .await
                            .close(&uri)
                            .map(drop)
                            .map_err(|e| e.to_string())
                    }
                    Err(e) => Err(e.to_string()),
                }
            }
            _ => match serde_json::from_value::<WillSaveTextDocumentParams>(params) {
                Ok(p) => {
                    tracing::debug!(uri = %p.text_document.uri, reason = ?p.reason, "willSave");
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            },
        };

        if let Err(error) = outcome {
            tracing::warn!(method, %error, "document sync notification dropped");
        }
    }

    fn queue_notification(&self, method: &str, params: Value) {
        let Some(handler) = self.server.handlers.notification(method) else {
            return;
        };
        let queued = QueuedNotification {
            method: method.to_string(),
            params,
            handler,
            cx: self.context(),
        };
        if self.notifications.send(queued).is_err() {
            tracing::warn!(method, "notification worker stopped; handler skipped");
        }
    }

    async fn trace_received(&self, message: String, params: &Value) {
        if let Err(e) = self
            .client
            .log_trace(message, || format!("Params: {params}"))
            .await
        {
            tracing::debug!(error = %e, "dropping $/logTrace");
        }
    }
}
