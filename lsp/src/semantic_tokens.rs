//! Semantic token encoding and array deltas.
//!
//! Tokens travel as a flat `u32` array of 5-tuples
//! `[deltaLine, deltaStart, length, tokenType, tokenModifiers]`, where
//! `deltaStart` is relative to the previous token only when both sit on the
//! same line. Deltas between two results are computed over that flat array,
//! not over tokens, so an unchanged re-encoding always yields zero edits.

use std::collections::HashMap;

use parley_types::{DocumentUri, PositionEncoding, Range};
use parley_types::semantic_tokens::{
    SemanticTokens, SemanticTokensDelta, SemanticTokensEdit, SemanticTokensFullDeltaResult,
};
use similar::{Algorithm, DiffTag, capture_diff_slices};
use thiserror::Error;

use crate::documents::TextDocument;

const TUPLE_LEN: usize = 5;

/// A token with absolute coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemanticToken {
    pub line: u32,
    pub start: u32,
    pub length: u32,
    pub token_type: u32,
    pub token_modifiers: u32,
}

impl SemanticToken {
    #[must_use]
    pub const fn new(
        line: u32,
        start: u32,
        length: u32,
        token_type: u32,
        token_modifiers: u32,
    ) -> Self {
        Self {
            line,
            start,
            length,
            token_type,
            token_modifiers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenDataError {
    #[error("token data length {len} is not a multiple of 5")]
    Truncated { len: usize },
    #[error("token {index} overflows absolute coordinates")]
    Overflow { index: usize },
    #[error("edit at {start} deleting {delete_count} exceeds data length {len}")]
    EditOutOfBounds {
        start: u32,
        delete_count: u32,
        len: usize,
    },
    #[error("edits overlap at {start}")]
    OverlappingEdits { start: u32 },
}

/// Encode tokens into the relative flat form, sorting by (line, start) first.
#[must_use]
pub fn encode(tokens: &[SemanticToken]) -> Vec<u32> {
    let mut sorted = tokens.to_vec();
    sorted.sort_by_key(|t| (t.line, t.start));

    let mut data = Vec::with_capacity(sorted.len() * TUPLE_LEN);
    let (mut prev_line, mut prev_start) = (0u32, 0u32);
    for token in sorted {
        let delta_line = token.line - prev_line;
        let delta_start = if delta_line == 0 {
            token.start - prev_start
        } else {
            token.start
        };
        data.extend([
            delta_line,
            delta_start,
            token.length,
            token.token_type,
            token.token_modifiers,
        ]);
        prev_line = token.line;
        prev_start = token.start;
    }
    data
}

/// Reconstruct absolute tokens from the relative flat form.
pub fn decode(data: &[u32]) -> Result<Vec<SemanticToken>, TokenDataError> {
    if data.len() % TUPLE_LEN != 0 {
        return Err(TokenDataError::Truncated { len: data.len() });
    }

    let mut tokens = Vec::with_capacity(data.len() / TUPLE_LEN);
    let (mut line, mut start) = (0u32, 0u32);
    for (index, chunk) in data.chunks_exact(TUPLE_LEN).enumerate() {
        let overflow = TokenDataError::Overflow { index };
        line = line.checked_add(chunk[0]).ok_or_else(|| overflow.clone())?;
        start = if chunk[0] == 0 {
            start.checked_add(chunk[1]).ok_or(overflow)?
        } else {
            chunk[1]
        };
        tokens.push(SemanticToken::new(line, start, chunk[2], chunk[3], chunk[4]));
    }
    Ok(tokens)
}

/// Minimal edit script turning `old` into `new`.
///
/// Adjacent changes are merged into one edit; `start` offsets refer to `old`.
#[must_use]
pub fn diff(old: &[u32], new: &[u32]) -> Vec<SemanticTokensEdit> {
    if old == new {
        return Vec::new();
    }

    let mut edits = Vec::new();
    let mut current: Option<(usize, usize, Vec<u32>)> = None;

    for op in capture_diff_slices(Algorithm::Myers, old, new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            if let Some(edit) = current.take() {
                edits.push(into_edit(edit));
            }
            continue;
        }
        let (_, delete_count, data) =
            current.get_or_insert_with(|| (old_range.start, 0, Vec::new()));
        *delete_count += old_range.len();
        data.extend_from_slice(&new[new_range]);
    }
    if let Some(edit) = current {
        edits.push(into_edit(edit));
    }
    edits
}

fn into_edit((start, delete_count, data): (usize, usize, Vec<u32>)) -> SemanticTokensEdit {
    SemanticTokensEdit {
        start: start as u32,
        delete_count: delete_count as u32,
        data: (!data.is_empty()).then_some(data),
    }
}

/// Apply edits whose offsets refer to `data`.
pub fn apply_edits(data: &[u32], edits: &[SemanticTokensEdit]) -> Result<Vec<u32>, TokenDataError> {
    let mut sorted: Vec<&SemanticTokensEdit> = edits.iter().collect();
    sorted.sort_by_key(|e| e.start);

    let mut out = Vec::with_capacity(data.len());
    let mut cursor = 0usize;
    for edit in sorted {
        let start = edit.start as usize;
        let end = start + edit.delete_count as usize;
        if end > data.len() {
            return Err(TokenDataError::EditOutOfBounds {
                start: edit.start,
                delete_count: edit.delete_count,
                len: data.len(),
            });
        }
        if start < cursor {
            return Err(TokenDataError::OverlappingEdits { start: edit.start });
        }
        out.extend_from_slice(&data[cursor..start]);
        if let Some(insert) = &edit.data {
            out.extend_from_slice(insert);
        }
        cursor = end;
    }
    out.extend_from_slice(&data[cursor..]);
    Ok(out)
}

#[derive(Debug, Clone)]
struct CachedTokens {
    result_id: String,
    data: Vec<u32>,
}

/// Last full token array sent per document, keyed by result id.
#[derive(Debug, Default)]
pub struct SemanticTokensCache {
    next_result_id: u64,
    entries: HashMap<DocumentUri, CachedTokens>,
}

impl SemanticTokensCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_result_id(&mut self) -> String {
        self.next_result_id += 1;
        self.next_result_id.to_string()
    }

    /// Record a full result. Unchanged data keeps the previous result id.
    pub fn full(&mut self, uri: &str, data: Vec<u32>) -> SemanticTokens {
        if let Some(entry) = self.entries.get(uri)
            && entry.data == data
        {
            return SemanticTokens {
                result_id: Some(entry.result_id.clone()),
                data,
            };
        }

        let result_id = self.fresh_result_id();
        self.entries.insert(
            uri.to_string(),
            CachedTokens {
                result_id: result_id.clone(),
                data: data.clone(),
            },
        );
        SemanticTokens {
            result_id: Some(result_id),
            data,
        }
    }

    /// Answer a delta request.
    ///
    /// Falls back to a full result when `previous_result_id` is not the id
    /// cached for `uri`.
    pub fn delta(
        &mut self,
        uri: &str,
        previous_result_id: &str,
        data: Vec<u32>,
    ) -> SemanticTokensFullDeltaResult {
        let edits = match self.entries.get(uri) {
            Some(entry) if entry.result_id == previous_result_id => diff(&entry.data, &data),
            _ => {
                tracing::debug!(
                    uri,
                    previous_result_id,
                    "unknown previous semantic tokens result; sending full"
                );
                return SemanticTokensFullDeltaResult::Tokens(self.full(uri, data));
            }
        };

        if edits.is_empty() {
            return SemanticTokensFullDeltaResult::Delta(SemanticTokensDelta {
                result_id: Some(previous_result_id.to_string()),
                edits,
            });
        }

        let result_id = self.fresh_result_id();
        self.entries.insert(
            uri.to_string(),
            CachedTokens {
                result_id: result_id.clone(),
                data,
            },
        );
        SemanticTokensFullDeltaResult::Delta(SemanticTokensDelta {
            result_id: Some(result_id),
            edits,
        })
    }

    /// Drop the cached array for a closed document.
    pub fn invalidate(&mut self, uri: &str) -> bool {
        self.entries.remove(uri).is_some()
    }

    #[must_use]
    pub fn result_id(&self, uri: &str) -> Option<&str> {
        self.entries.get(uri).map(|e| e.result_id.as_str())
    }
}

/// Computes tokens for an open document.
///
/// Token columns and lengths must be counted in `encoding`, the one
/// negotiated with the client.
pub trait SemanticTokensProvider: Send + Sync + 'static {
    fn tokens(&self, document: &TextDocument, encoding: PositionEncoding) -> Vec<SemanticToken>;
}

impl<F> SemanticTokensProvider for F
where
    F: Fn(&TextDocument, PositionEncoding) -> Vec<SemanticToken> + Send + Sync + 'static,
{
    fn tokens(&self, document: &TextDocument, encoding: PositionEncoding) -> Vec<SemanticToken> {
        self(document, encoding)
    }
}

/// Keep tokens that overlap `range`.
#[must_use]
pub fn tokens_in_range(tokens: &[SemanticToken], range: Range) -> Vec<SemanticToken> {
    let range = range.normalized();
    tokens
        .iter()
        .filter(|t| {
            let end = t.start.saturating_add(t.length);
            let after_start = t.line > range.start.line
                || (t.line == range.start.line && end > range.start.character);
            let before_end = t.line < range.end.line
                || (t.line == range.end.line && t.start < range.end.character);
            after_start && before_end
        })
        .copied()
        .collect()
}
