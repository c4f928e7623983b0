//! Wire data model for the parley LSP engine.
//!
//! Pure serde types with no IO and no async: JSON-RPC envelopes, error codes,
//! positions, capability records and the payloads of the methods the engine
//! routes itself. Open-ended protocol data (`LSPAny`, `experimental`,
//! feature params and results) is carried as order-preserving
//! [`serde_json::Value`] and never interpreted here.

#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod message;
pub mod methods;
pub mod progress;
pub mod semantic_tokens;
pub mod text;

pub use capabilities::{ClientCapabilities, ServerCapabilities, TextDocumentSyncKind};
pub use error::{ErrorCode, ResponseError};
pub use ids::{ProgressToken, RequestId};
pub use lifecycle::{InitializeParams, InitializeResult, ServerInfo, TraceValue};
pub use message::{
    EnvelopeError, JSONRPC_VERSION, Message, Notification, Request, Response, ResponseBody,
};
pub use text::{DocumentUri, Position, PositionEncoding, Range};
