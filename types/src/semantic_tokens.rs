//! Semantic token wire shapes and the legend that maps names to codes.

use serde::{Deserialize, Serialize};

use crate::progress::{PartialResultParams, WorkDoneProgressParams};
use crate::text::{Range, TextDocumentIdentifier};

/// Token type and modifier names; their positions are the wire codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensLegend {
    pub token_types: Vec<String>,
    pub token_modifiers: Vec<String>,
}

impl SemanticTokensLegend {
    pub fn new<T, M>(token_types: T, token_modifiers: M) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            token_types: token_types.into_iter().map(Into::into).collect(),
            token_modifiers: token_modifiers.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn type_index(&self, name: &str) -> Option<u32> {
        self.token_types
            .iter()
            .position(|t| t == name)
            .map(|i| i as u32)
    }

    #[must_use]
    pub fn type_name(&self, index: u32) -> Option<&str> {
        self.token_types.get(index as usize).map(String::as_str)
    }

    /// Pack modifier names into a bitset; bit k set means modifier k present.
    ///
    /// Returns `None` if a name is not in the legend or the legend has more
    /// than 32 modifiers at that position.
    #[must_use]
    pub fn modifier_bitset(&self, names: &[&str]) -> Option<u32> {
        names.iter().try_fold(0u32, |bits, name| {
            let index = self.token_modifiers.iter().position(|m| m == name)?;
            let bit = 1u32.checked_shl(u32::try_from(index).ok()?)?;
            Some(bits | bit)
        })
    }

    /// Unpack a bitset into modifier names, ignoring bits beyond the legend.
    #[must_use]
    pub fn modifier_names(&self, bits: u32) -> Vec<&str> {
        self.token_modifiers
            .iter()
            .take(32)
            .enumerate()
            .filter(|(i, _)| bits & (1 << i) != 0)
            .map(|(_, name)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    pub data: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensEdit {
    pub start: u32,
    pub delete_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    pub edits: Vec<SemanticTokensEdit>,
}

/// Reply to `textDocument/semanticTokens/full/delta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SemanticTokensFullDeltaResult {
    Tokens(SemanticTokens),
    Delta(SemanticTokensDelta),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensParams {
    #[serde(flatten)]
    pub work_done: WorkDoneProgressParams,
    #[serde(flatten)]
    pub partial_result: PartialResultParams,
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensDeltaParams {
    #[serde(flatten)]
    pub work_done: WorkDoneProgressParams,
    #[serde(flatten)]
    pub partial_result: PartialResultParams,
    pub text_document: TextDocumentIdentifier,
    pub previous_result_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensRangeParams {
    #[serde(flatten)]
    pub work_done: WorkDoneProgressParams,
    #[serde(flatten)]
    pub partial_result: PartialResultParams,
    pub text_document: TextDocumentIdentifier,
    pub range: Range,
}
