//! Capability records exchanged during `initialize`.
//!
//! Client capabilities are kept as an opaque JSON bag: the engine never
//! computes an intersection, feature code asks [`ClientCapabilities::supports`]
//! before using a client-gated protocol field. Server capabilities are typed
//! for the parts the engine drives itself (sync, encoding, semantic tokens) and
//! opaque for every other provider.
//!
//! Option groups that the protocol composes through interface inheritance are
//! plain records embedded with `#[serde(flatten)]`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::semantic_tokens::SemanticTokensLegend;
use crate::text::PositionEncoding;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientCapabilities(Value);

impl ClientCapabilities {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Look up a dotted path such as `textDocument.completion.completionItem`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.0, |node, key| node.as_object()?.get(key))
    }

    /// `true` when the flag at `path` is `true` or names a present object.
    #[must_use]
    pub fn supports(&self, path: &str) -> bool {
        matches!(self.get(path), Some(Value::Bool(true) | Value::Object(_)))
    }

    /// Encodings offered in `general.positionEncodings`, unknown names skipped.
    #[must_use]
    pub fn position_encodings(&self) -> Vec<PositionEncoding> {
        self.get("general.positionEncodings")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(PositionEncoding::from_wire)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// How document changes are sent to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TextDocumentSyncKind {
    None,
    Full,
    #[default]
    Incremental,
}

impl TryFrom<u8> for TextDocumentSyncKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Full),
            2 => Ok(Self::Incremental),
            other => Err(format!("unknown text document sync kind {other}")),
        }
    }
}

impl From<TextDocumentSyncKind> for u8 {
    fn from(value: TextDocumentSyncKind) -> Self {
        match value {
            TextDocumentSyncKind::None => 0,
            TextDocumentSyncKind::Full => 1,
            TextDocumentSyncKind::Incremental => 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_text: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentSyncOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_close: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<TextDocumentSyncKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub will_save: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub will_save_wait_until: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save: Option<SaveOptions>,
}

/// `textDocumentSync` may be a bare kind number or an options object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextDocumentSync {
    Kind(TextDocumentSyncKind),
    Options(TextDocumentSyncOptions),
}

impl TextDocumentSync {
    #[must_use]
    pub fn change_kind(&self) -> TextDocumentSyncKind {
        match self {
            Self::Kind(kind) => *kind,
            Self::Options(options) => options.change.unwrap_or(TextDocumentSyncKind::None),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkDoneProgressOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_done_progress: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// `documentSelector` is mandatory on the wire but may be `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentRegistrationOptions {
    #[serde(default)]
    pub document_selector: Option<Vec<DocumentFilter>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRegistrationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SemanticTokensFullOptions {
    Bool(bool),
    Delta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticTokensOptions {
    #[serde(flatten)]
    pub work_done_progress: WorkDoneProgressOptions,
    pub legend: SemanticTokensLegend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<SemanticTokensFullOptions>,
}

impl SemanticTokensOptions {
    #[must_use]
    pub fn supports_delta(&self) -> bool {
        matches!(
            self.full,
            Some(SemanticTokensFullOptions::Delta { delta: Some(true) })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticTokensRegistrationOptions {
    #[serde(flatten)]
    pub text_document: TextDocumentRegistrationOptions,
    #[serde(flatten)]
    pub options: SemanticTokensOptions,
    #[serde(flatten)]
    pub static_registration: StaticRegistrationOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentChangeRegistrationOptions {
    #[serde(flatten)]
    pub text_document: TextDocumentRegistrationOptions,
    pub sync_kind: TextDocumentSyncKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_encoding: Option<PositionEncoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_document_sync: Option<TextDocumentSync>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_tokens_provider: Option<SemanticTokensOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    /// Providers the engine passes through without interpreting
    /// (`hoverProvider`, `completionProvider`, ...).
    #[serde(flatten)]
    pub providers: Map<String, Value>,
}

impl ServerCapabilities {
    /// Advertise an opaque provider entry.
    #[must_use]
    pub fn with_provider(mut self, name: impl Into<String>, value: Value) -> Self {
        self.providers.insert(name.into(), value);
        self
    }
}
