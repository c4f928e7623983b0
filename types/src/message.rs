//! JSON-RPC 2.0 envelopes: requests, notifications and responses.
//!
//! Envelope validation lives in [`Message::from_value`] so that callers can
//! tell malformed JSON apart from well-formed JSON with a bad envelope.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{ErrorCode, ResponseError};
use crate::ids::RequestId;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Either a result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Result(Value),
    Error(ResponseError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` only when the id of the offending request could not be recovered.
    pub id: Option<RequestId>,
    pub body: ResponseBody,
}

impl Response {
    #[must_use]
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            body: ResponseBody::Result(result),
        }
    }

    #[must_use]
    pub fn error(id: Option<RequestId>, error: ResponseError) -> Self {
        Self {
            id,
            body: ResponseBody::Error(error),
        }
    }

    #[must_use]
    pub fn from_result(id: RequestId, outcome: Result<Value, ResponseError>) -> Self {
        match outcome {
            Ok(result) => Self::ok(id, result),
            Err(error) => Self::error(Some(id), error),
        }
    }

    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match &self.body {
            ResponseBody::Result(_) => None,
            ResponseBody::Error(error) => Some(error.code),
        }
    }

    pub fn into_result(self) -> Result<Value, ResponseError> {
        match self.body {
            ResponseBody::Result(value) => Ok(value),
            ResponseBody::Error(error) => Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

/// Well-formed JSON that is not a valid JSON-RPC 2.0 envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid JSON-RPC envelope: {reason}")]
pub struct EnvelopeError {
    pub reason: String,
    /// The object carried both `method` and `id`, so the sender expects a reply.
    pub request_shaped: bool,
}

fn parse_id(value: Value) -> Option<RequestId> {
    match value {
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        Value::String(s) => Some(RequestId::String(s)),
        _ => None,
    }
}

impl Message {
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Validate and classify a decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut obj) = value else {
            return Err(EnvelopeError {
                reason: "message is not a JSON object".to_string(),
                request_shaped: false,
            });
        };

        let request_shaped = obj.contains_key("method") && obj.contains_key("id");
        let invalid = |reason: String| EnvelopeError {
            reason,
            request_shaped,
        };

        match obj.remove("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            Some(other) => return Err(invalid(format!("unsupported jsonrpc version {other}"))),
            None => return Err(invalid("missing jsonrpc field".to_string())),
        }

        let id = obj.remove("id");
        let method = obj.remove("method");
        let params = obj.remove("params");
        let result = obj.remove("result");
        let error = obj.remove("error");

        match method {
            Some(Value::String(method)) => {
                if result.is_some() || error.is_some() {
                    return Err(invalid(format!("{method} carries a result or error")));
                }
                match id {
                    None => Ok(Self::Notification(Notification { method, params })),
                    Some(id) => {
                        let id = parse_id(id).ok_or_else(|| {
                            invalid("request id must be an integer or a string".to_string())
                        })?;
                        Ok(Self::Request(Request { id, method, params }))
                    }
                }
            }
            Some(_) => Err(invalid("method must be a string".to_string())),
            None => {
                let id = match id {
                    None => return Err(invalid("message has neither method nor id".to_string())),
                    Some(Value::Null) => None,
                    Some(id) => Some(parse_id(id).ok_or_else(|| {
                        invalid("response id must be an integer, a string or null".to_string())
                    })?),
                };
                let body = match (result, error) {
                    (Some(result), None) => ResponseBody::Result(result),
                    (None, Some(error)) => {
                        let error = serde_json::from_value(error)
                            .map_err(|e| invalid(format!("malformed error object: {e}")))?;
                        ResponseBody::Error(error)
                    }
                    (Some(_), Some(_)) => {
                        return Err(invalid("response carries both result and error".to_string()));
                    }
                    (None, None) => {
                        return Err(invalid(
                            "response carries neither result nor error".to_string(),
                        ));
                    }
                };
                Ok(Self::Response(Response { id, body }))
            }
        }
    }

    /// Build the JSON object for this message, `jsonrpc` first.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request(req) => {
                obj.insert("id".into(), id_value(Some(&req.id)));
                obj.insert("method".into(), Value::from(req.method.as_str()));
                if let Some(params) = &req.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Notification(notif) => {
                obj.insert("method".into(), Value::from(notif.method.as_str()));
                if let Some(params) = &notif.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response(resp) => {
                obj.insert("id".into(), id_value(resp.id.as_ref()));
                match &resp.body {
                    ResponseBody::Result(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    ResponseBody::Error(error) => {
                        let error = serde_json::to_value(error).unwrap_or(Value::Null);
                        obj.insert("error".into(), error);
                    }
                }
            }
        }
        Value::Object(obj)
    }
}

fn id_value(id: Option<&RequestId>) -> Value {
    match id {
        Some(RequestId::Number(n)) => Value::from(*n),
        Some(RequestId::String(s)) => Value::from(s.as_str()),
        None => Value::Null,
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}
