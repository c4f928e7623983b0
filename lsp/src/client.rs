//! Outbound side of the connection: everything the server sends unprompted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parley_types::lifecycle::{
    CancelParams, Diagnostic, LogMessageParams, LogTraceParams, MessageType, PublishDiagnosticsParams,
    Registration, RegistrationParams, ShowMessageParams, Unregistration, UnregistrationParams,
};
use parley_types::progress::{
    ProgressParams, WorkDoneProgress, WorkDoneProgressBegin, WorkDoneProgressCreateParams,
    WorkDoneProgressEnd, WorkDoneProgressReport,
};
use parley_types::{
    Message, Notification, ProgressToken, Request, RequestId, ResponseError, TraceValue, methods,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};

use crate::pending::PendingCalls;
use crate::progress::{ProgressError, ProgressTracker};

pub(crate) const WRITER_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub(crate) enum WriterCommand {
    Send(Message),
    Shutdown,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("client answered {method} with an error: {error}")]
    Response {
        method: String,
        error: ResponseError,
    },
    #[error("{method} abandoned: connection closed before a response")]
    Abandoned { method: String },
    #[error("{method} timed out after {timeout:?}")]
    TimedOut { method: String, timeout: Duration },
    #[error("connection writer is closed")]
    Disconnected,
    #[error("failed to serialize params: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Cloneable handle for talking to the client.
///
/// Handlers receive one through their context; it stays valid for the life
/// of the connection and fails with [`CallError::Disconnected`] after.
#[derive(Clone)]
pub struct ClientHandle {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: Arc<Mutex<PendingCalls>>,
    progress: Arc<Mutex<ProgressTracker>>,
    trace: watch::Receiver<TraceValue>,
    next_progress_token: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("trace", &*self.trace.borrow())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn to_params<P: Serialize>(params: P) -> Result<Option<Value>, CallError> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

impl ClientHandle {
    pub(crate) fn new(
        writer_tx: mpsc::Sender<WriterCommand>,
        pending: Arc<Mutex<PendingCalls>>,
        trace: watch::Receiver<TraceValue>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            writer_tx,
            pending,
            progress: Arc::new(Mutex::new(ProgressTracker::new())),
            trace,
            next_progress_token: Arc::new(AtomicU64::new(1)),
            request_timeout,
        }
    }

    pub(crate) async fn send(&self, message: Message) -> Result<(), CallError> {
        self.writer_tx
            .send(WriterCommand::Send(message))
            .await
            .map_err(|_| CallError::Disconnected)
    }

    /// Current trace level as last set by the client.
    #[must_use]
    pub fn trace(&self) -> TraceValue {
        *self.trace.borrow()
    }

    /// Send a request and wait for the client's answer.
    ///
    /// On timeout, or when the returned future is dropped first, the request
    /// is cancelled with `$/cancelRequest` and its pending entry dropped; a
    /// late response is then logged and ignored.
    pub async fn send_request<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> Result<Value, CallError> {
        let params = to_params(params)?;
        let (id, rx) = self.pending.lock().await.issue(method);
        let mut guard = CallGuard {
            client: self,
            id: Some(id.clone()),
        };
        tracing::debug!(id = %id, method, "sending request to client");

        if let Err(e) = self.send(Request::new(id.clone(), method, params).into()).await {
            guard.disarm();
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let outcome = tokio::time::timeout(self.request_timeout, rx).await;
        guard.disarm();
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(CallError::Response {
                method: method.to_string(),
                error,
            }),
            Ok(Err(_)) => Err(CallError::Abandoned {
                method: method.to_string(),
            }),
            Err(_) => {
                tracing::warn!(id = %id, method, "client request timed out");
                self.cancel_call(&id).await;
                Err(CallError::TimedOut {
                    method: method.to_string(),
                    timeout: self.request_timeout,
                })
            }
        }
    }

    /// Forget a pending outbound request and tell the client to stop on it.
    async fn cancel_call(&self, id: &RequestId) {
        let Some(method) = self.pending.lock().await.cancel(id) else {
            return;
        };
        tracing::debug!(id = %id, method = %method, "cancelling client request");
        let params = CancelParams { id: id.clone() };
        if let Err(e) = self
            .send_notification(methods::CANCEL_REQUEST, params)
            .await
        {
            tracing::debug!(error = %e, "could not send $/cancelRequest");
        }
    }

    pub async fn send_notification<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> Result<(), CallError> {
        let params = to_params(params)?;
        self.send(Notification::new(method, params).into()).await
    }

    pub async fn log_message(
        &self,
        typ: MessageType,
        message: impl Into<String>,
    ) -> Result<(), CallError> {
        let params = LogMessageParams {
            typ,
            message: message.into(),
        };
        self.send_notification(methods::LOG_MESSAGE, params).await
    }

    pub async fn show_message(
        &self,
        typ: MessageType,
        message: impl Into<String>,
    ) -> Result<(), CallError> {
        let params = ShowMessageParams {
            typ,
            message: message.into(),
        };
        self.send_notification(methods::SHOW_MESSAGE, params).await
    }

    pub async fn publish_diagnostics(
        &self,
        uri: impl Into<String>,
        version: Option<i32>,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<(), CallError> {
        let params = PublishDiagnosticsParams {
            uri: uri.into(),
            version,
            diagnostics,
        };
        self.send_notification(methods::PUBLISH_DIAGNOSTICS, params)
            .await
    }

    pub async fn register_capability(
        &self,
        registrations: Vec<Registration>,
    ) -> Result<(), CallError> {
        self.send_request(
            methods::REGISTER_CAPABILITY,
            RegistrationParams { registrations },
        )
        .await
        .map(drop)
    }

    pub async fn unregister_capability(
        &self,
        unregistrations: Vec<Unregistration>,
    ) -> Result<(), CallError> {
        self.send_request(
            methods::UNREGISTER_CAPABILITY,
            UnregistrationParams { unregistrations },
        )
        .await
        .map(drop)
    }

    /// `$/logTrace`, sent only when the client enabled tracing.
    ///
    /// `verbose` is evaluated and attached only at `verbose` level.
    pub async fn log_trace(
        &self,
        message: impl Into<String>,
        verbose: impl FnOnce() -> String,
    ) -> Result<(), CallError> {
        let level = self.trace();
        if level == TraceValue::Off {
            return Ok(());
        }
        let params = LogTraceParams {
            message: message.into(),
            verbose: (level == TraceValue::Verbose).then(verbose),
        };
        self.send_notification(methods::LOG_TRACE, params).await
    }

    /// Ask the client for a progress token, then begin reporting on it.
    pub async fn create_work_done_progress(
        &self,
        begin: WorkDoneProgressBegin,
    ) -> Result<WorkDoneProgressHandle, CallError> {
        let n = self.next_progress_token.fetch_add(1, Ordering::Relaxed);
        let token = ProgressToken::String(format!("parley/{n}"));
        self.progress.lock().await.create(token.clone())?;

        let params = WorkDoneProgressCreateParams {
            token: token.clone(),
        };
        if let Err(e) = self
            .send_request(methods::WORK_DONE_PROGRESS_CREATE, params)
            .await
        {
            self.progress.lock().await.discard(&token);
            return Err(e);
        }
        self.work_done_progress(token, begin).await
    }

    /// Begin reporting on a token the client supplied as `workDoneToken`.
    pub async fn work_done_progress(
        &self,
        token: ProgressToken,
        begin: WorkDoneProgressBegin,
    ) -> Result<WorkDoneProgressHandle, CallError> {
        self.progress_notification(&token, WorkDoneProgress::Begin(begin))
            .await?;
        Ok(WorkDoneProgressHandle {
            client: self.clone(),
            token,
        })
    }

    async fn progress_notification(
        &self,
        token: &ProgressToken,
        value: WorkDoneProgress,
    ) -> Result<(), CallError> {
        self.progress.lock().await.advance(token, &value)?;
        let params = ProgressParams {
            token: token.clone(),
            value: serde_json::to_value(&value)?,
        };
        self.send_notification(methods::PROGRESS, params).await
    }
}

/// Cancels an outbound call whose future is dropped while still waiting.
struct CallGuard<'a> {
    client: &'a ClientHandle,
    id: Option<RequestId>,
}

impl CallGuard<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let client = self.client.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { client.cancel_call(&id).await });
            }
            Err(_) => tracing::debug!(id = %id, "no runtime to cancel dropped request"),
        }
    }
}

/// A begun work-done progress stream. `end` consumes it.
#[derive(Debug)]
pub struct WorkDoneProgressHandle {
    client: ClientHandle,
    token: ProgressToken,
}

impl WorkDoneProgressHandle {
    #[must_use]
    pub fn token(&self) -> &ProgressToken {
        &self.token
    }

    pub async fn report(
        &self,
        message: Option<String>,
        percentage: Option<u32>,
    ) -> Result<(), CallError> {
        let report = WorkDoneProgressReport {
            cancellable: None,
            message,
            percentage: percentage.map(|p| p.min(100)),
        };
        self.client
            .progress_notification(&self.token, WorkDoneProgress::Report(report))
            .await
    }

    pub async fn end(self, message: Option<String>) -> Result<(), CallError> {
        self.client
            .progress_notification(
                &self.token,
                WorkDoneProgress::End(WorkDoneProgressEnd { message }),
            )
            .await
    }
}
