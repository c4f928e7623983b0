//! User-registered request and notification handlers.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parley_types::{PositionEncoding, RequestId, ResponseError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::cancel::CancellationToken;
use crate::client::ClientHandle;
use crate::documents::{DocumentStore, TextDocument};
use crate::session::Negotiated;

pub type SharedDocuments = Arc<RwLock<DocumentStore>>;

/// What every handler can reach: the client, the open documents and the
/// negotiated session parameters.
#[derive(Debug, Clone)]
pub struct Context {
    client: ClientHandle,
    documents: SharedDocuments,
    negotiated: Arc<Negotiated>,
}

impl Context {
    pub(crate) fn new(
        client: ClientHandle,
        documents: SharedDocuments,
        negotiated: Arc<Negotiated>,
    ) -> Self {
        Self {
            client,
            documents,
            negotiated,
        }
    }

    #[must_use]
    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    #[must_use]
    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    #[must_use]
    pub fn position_encoding(&self) -> PositionEncoding {
        self.negotiated.position_encoding
    }

    /// Snapshot of an open document.
    pub async fn document(&self, uri: &str) -> Option<TextDocument> {
        self.documents.read().await.get(uri).cloned()
    }

    #[must_use]
    pub fn documents(&self) -> &SharedDocuments {
        &self.documents
    }
}

/// Context for one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: RequestId,
    cancel: CancellationToken,
    context: Context,
}

impl RequestContext {
    pub(crate) fn new(id: RequestId, cancel: CancellationToken, context: Context) -> Self {
        Self {
            id,
            cancel,
            context,
        }
    }

    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Fires when the client sends `$/cancelRequest` for this id.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Deref for RequestContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.context
    }
}

pub trait RequestHandler: Send + Sync + 'static {
    fn call(
        &self,
        params: Value,
        cx: RequestContext,
    ) -> BoxFuture<'static, Result<Value, ResponseError>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ResponseError>> + Send + 'static,
{
    fn call(
        &self,
        params: Value,
        cx: RequestContext,
    ) -> BoxFuture<'static, Result<Value, ResponseError>> {
        Box::pin(self(params, cx))
    }
}

pub trait NotificationHandler: Send + Sync + 'static {
    fn call(&self, params: Value, cx: Context) -> BoxFuture<'static, ()>;
}

impl<F, Fut> NotificationHandler for F
where
    F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, params: Value, cx: Context) -> BoxFuture<'static, ()> {
        Box::pin(self(params, cx))
    }
}

/// Handlers keyed by exact method name.
#[derive(Default, Clone)]
pub struct HandlerTable {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler, replacing any previous one for `method`.
    pub fn on_request(&mut self, method: impl Into<String>, handler: impl RequestHandler) {
        let method = method.into();
        if self.requests.insert(method.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(method = %method, "replaced request handler");
        }
    }

    pub fn on_notification(
        &mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler,
    ) {
        let method = method.into();
        if self
            .notifications
            .insert(method.clone(), Arc::new(handler))
            .is_some()
        {
            tracing::debug!(method = %method, "replaced notification handler");
        }
    }

    #[must_use]
    pub fn request(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        self.requests.get(method).cloned()
    }

    #[must_use]
    pub fn notification(&self, method: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.notifications.get(method).cloned()
    }

    #[must_use]
    pub fn handles_request(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("requests", &self.requests.keys().collect::<Vec<_>>())
            .field("notifications", &self.notifications.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Deserialize handler params, mapping failure to `InvalidParams`.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ResponseError> {
    serde_json::from_value(params).map_err(|e| ResponseError::invalid_params(e.to_string()))
}
