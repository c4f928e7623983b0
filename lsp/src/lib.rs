//! Protocol engine for language servers.
//!
//! Reads `Content-Length` framed JSON-RPC from any async stream, enforces the
//! `initialize`/`shutdown`/`exit` lifecycle, keeps open documents in sync and
//! answers semantic token requests with minimal deltas. Feature requests are
//! routed to handlers registered on a [`ServerBuilder`].

pub mod cancel;
pub mod client;
pub mod codec;
pub mod documents;
pub mod handler;
pub mod pending;
pub mod progress;
pub mod semantic_tokens;
pub mod server;
pub mod session;

pub use cancel::CancellationToken;
pub use client::{CallError, ClientHandle, WorkDoneProgressHandle};
pub use codec::{DecodeError, FrameReader, FrameWriter};
pub use documents::{DocumentStore, Lines, SyncError, TextDocument};
pub use handler::{Context, RequestContext, parse_params};
pub use semantic_tokens::{SemanticToken, SemanticTokensProvider};
pub use server::{Server, ServerBuilder, ServerOptions};
pub use session::{ExitStatus, Negotiated};
