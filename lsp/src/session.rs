//! Connection lifecycle and the values negotiated during `initialize`.

use std::sync::Arc;

use parley_types::lifecycle::{ClientInfo, WorkspaceFolder};
use parley_types::{
    ClientCapabilities, DocumentUri, InitializeParams, InitializeResult, PositionEncoding,
    ResponseError, ServerCapabilities, ServerInfo, TraceValue, methods,
};
use serde_json::Value;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Initializing,
    Active,
    ShuttingDown,
    Exited,
}

/// How the connection ended; maps to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// `exit` after `shutdown`.
    Clean,
    /// `exit` without a preceding `shutdown`.
    ShutdownSkipped,
    /// The input stream ended before `exit`.
    ConnectionClosed,
}

impl ExitStatus {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::ShutdownSkipped | Self::ConnectionClosed => 1,
        }
    }
}

/// Client facts fixed by `initialize`, shared read-only with handlers.
#[derive(Debug, Clone, Default)]
pub struct Negotiated {
    pub client_capabilities: ClientCapabilities,
    pub position_encoding: PositionEncoding,
    pub client_info: Option<ClientInfo>,
    pub root_uri: Option<DocumentUri>,
    pub workspace_folders: Vec<WorkspaceFolder>,
    pub initialization_options: Option<Value>,
}

/// First server preference the client offers. A client that lists nothing
/// only speaks UTF-16.
#[must_use]
pub fn negotiate_encoding(
    preferred: &[PositionEncoding],
    client: &ClientCapabilities,
) -> PositionEncoding {
    let offered = client.position_encodings();
    if offered.is_empty() {
        return PositionEncoding::Utf16;
    }
    preferred
        .iter()
        .copied()
        .find(|e| offered.contains(e))
        .unwrap_or(PositionEncoding::Utf16)
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    negotiated: Option<Arc<Negotiated>>,
    trace: watch::Sender<TraceValue>,
    shutdown_requested: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        let (trace, _) = watch::channel(TraceValue::Off);
        Self {
            state: SessionState::Unstarted,
            negotiated: None,
            trace,
            shutdown_requested: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn negotiated(&self) -> Option<Arc<Negotiated>> {
        self.negotiated.clone()
    }

    #[must_use]
    pub fn position_encoding(&self) -> PositionEncoding {
        self.negotiated
            .as_ref()
            .map_or(PositionEncoding::Utf16, |n| n.position_encoding)
    }

    #[must_use]
    pub fn subscribe_trace(&self) -> watch::Receiver<TraceValue> {
        self.trace.subscribe()
    }

    /// Gate an inbound request on the lifecycle state.
    pub fn admit_request(&self, method: &str) -> Result<(), ResponseError> {
        match (self.state, method) {
            (SessionState::Unstarted, methods::INITIALIZE) => Ok(()),
            (SessionState::Unstarted | SessionState::Initializing, _)
                if method != methods::INITIALIZE =>
            {
                Err(ResponseError::server_not_initialized())
            }
            (SessionState::Active, m) if m != methods::INITIALIZE => Ok(()),
            (SessionState::ShuttingDown, methods::SHUTDOWN) => Ok(()),
            (SessionState::ShuttingDown, _) => Err(ResponseError::invalid_request(format!(
                "server is shutting down; {method} rejected"
            ))),
            (SessionState::Exited, _) => Err(ResponseError::invalid_request("server has exited")),
            _ => Err(ResponseError::invalid_request(
                "initialize may only be sent once",
            )),
        }
    }

    /// Whether an inbound notification should be processed at all.
    #[must_use]
    pub fn admit_notification(&self, method: &str) -> bool {
        match self.state {
            SessionState::Exited => false,
            _ if method == methods::EXIT => true,
            SessionState::Unstarted | SessionState::ShuttingDown => false,
            SessionState::Initializing => method == methods::INITIALIZED,
            SessionState::Active => true,
        }
    }

    /// Record the client's parameters and build the reply.
    pub fn initialize(
        &mut self,
        params: InitializeParams,
        mut capabilities: ServerCapabilities,
        server_info: Option<ServerInfo>,
        preferred_encodings: &[PositionEncoding],
    ) -> Result<InitializeResult, ResponseError> {
        if self.state != SessionState::Unstarted {
            return Err(ResponseError::invalid_request(
                "initialize may only be sent once",
            ));
        }

        let position_encoding = negotiate_encoding(preferred_encodings, &params.capabilities);
        capabilities.position_encoding = Some(position_encoding);
        if let Some(trace) = params.trace {
            self.set_trace(trace);
        }

        tracing::info!(
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            encoding = position_encoding.as_str(),
            process_id = ?params.process_id,
            "initialize"
        );

        self.negotiated = Some(Arc::new(Negotiated {
            client_capabilities: params.capabilities,
            position_encoding,
            client_info: params.client_info,
            root_uri: params.root_uri,
            workspace_folders: params.workspace_folders.unwrap_or_default(),
            initialization_options: params.initialization_options,
        }));
        self.state = SessionState::Initializing;

        Ok(InitializeResult {
            capabilities,
            server_info,
        })
    }

    pub fn initialized(&mut self) {
        if self.state == SessionState::Initializing {
            tracing::debug!("session active");
            self.state = SessionState::Active;
        } else {
            tracing::warn!(state = ?self.state, "unexpected initialized notification");
        }
    }

    /// Idempotent; only the first call changes state.
    pub fn shutdown(&mut self) {
        if self.state != SessionState::ShuttingDown {
            tracing::debug!("shutdown requested");
        }
        self.state = SessionState::ShuttingDown;
        self.shutdown_requested = true;
    }

    pub fn exit(&mut self) -> ExitStatus {
        self.state = SessionState::Exited;
        if self.shutdown_requested {
            ExitStatus::Clean
        } else {
            tracing::warn!("exit received without shutdown");
            ExitStatus::ShutdownSkipped
        }
    }

    pub fn set_trace(&mut self, value: TraceValue) {
        tracing::debug!(trace = ?value, "trace level set");
        self.trace.send_replace(value);
    }
}
