//! Table of server-to-client requests awaiting a response.

use std::collections::HashMap;
use std::time::Instant;

use parley_types::{RequestId, Response, ResponseError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

pub type CallResult = Result<Value, ResponseError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("response for unknown request id {id:?}")]
    UnknownId { id: Option<RequestId> },
    /// The waiter gave up and `$/cancelRequest` went out; the client answered anyway.
    #[error("late response for cancelled {method} request {id}")]
    Cancelled { id: RequestId, method: String },
}

#[derive(Debug)]
struct PendingRequest {
    method: String,
    issued_at: Instant,
    responder: oneshot::Sender<CallResult>,
}

/// Outstanding outbound requests keyed by id.
///
/// Ids are numeric and never reused within a connection. Dropping an entry
/// drops its responder, so waiters observe abandonment rather than hanging.
#[derive(Debug)]
pub struct PendingCalls {
    next_id: i64,
    entries: HashMap<RequestId, PendingRequest>,
    /// Cancelled ids whose response has not arrived yet, with their method.
    cancelled: HashMap<RequestId, String>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            cancelled: HashMap::new(),
        }
    }
}

impl PendingCalls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and register a waiter for `method`.
    pub fn issue(&mut self, method: &str) -> (RequestId, oneshot::Receiver<CallResult>) {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        let (responder, rx) = oneshot::channel();
        self.entries.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                issued_at: Instant::now(),
                responder,
            },
        );
        (id, rx)
    }

    /// Route an inbound response to its waiter. Returns the method it answered.
    pub fn resolve(&mut self, response: Response) -> Result<String, ResolveError> {
        let Some(id) = response.id.clone() else {
            return Err(ResolveError::UnknownId { id: None });
        };
        let Some(entry) = self.entries.remove(&id) else {
            return Err(match self.cancelled.remove(&id) {
                Some(method) => ResolveError::Cancelled { id, method },
                None => ResolveError::UnknownId { id: Some(id) },
            });
        };
        tracing::trace!(
            id = %id,
            method = %entry.method,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            "response received"
        );
        // Waiter may have given up already.
        let _ = entry.responder.send(response.into_result());
        Ok(entry.method)
    }

    /// Stop waiting for `id`. Its waiter sees the channel close and a late
    /// response resolves to [`ResolveError::Cancelled`]. Returns the method
    /// when the id was pending; the caller owes the client `$/cancelRequest`.
    pub fn cancel(&mut self, id: &RequestId) -> Option<String> {
        let entry = self.entries.remove(id)?;
        self.cancelled.insert(id.clone(), entry.method.clone());
        Some(entry.method)
    }

    pub fn remove(&mut self, id: &RequestId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drop every entry; each waiter sees its channel close.
    pub fn abandon_all(&mut self) -> usize {
        let count = self.entries.len();
        for (id, entry) in self.entries.drain() {
            tracing::debug!(id = %id, method = %entry.method, "abandoning pending request");
        }
        self.cancelled.clear();
        count
    }

    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
