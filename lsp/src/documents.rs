//! Document synchronization: per-document text and version state.
//!
//! Documents move `Closed -> Open -> Closed`. Changes for one document are
//! applied strictly in arrival order and every accepted `didChange` must carry
//! a version greater than the current one.

use std::collections::HashMap;

use parley_types::text::{
    DidChangeTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    TextDocumentContentChangeEvent, TextDocumentItem,
};
use parley_types::{DocumentUri, Position, PositionEncoding};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("document {uri} is already open")]
    AlreadyOpen { uri: DocumentUri },
    #[error("document {uri} is not open")]
    NotOpen { uri: DocumentUri },
    #[error("stale change for {uri}: version {received} is not after {current}")]
    StaleVersion {
        uri: DocumentUri,
        current: i32,
        received: i32,
    },
}

/// Byte range of `line` excluding its terminator, or `None` past the last line.
///
/// Lines end at `\n`, `\r\n` or a lone `\r`.
fn line_bounds(text: &str, line: u32) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut current = 0u32;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' | b'\r' => {
                if current == line {
                    return Some((start, i));
                }
                i += if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
                    2
                } else {
                    1
                };
                current += 1;
                start = i;
            }
            _ => i += 1,
        }
    }

    (current == line).then_some((start, bytes.len()))
}

/// Iterator over the lines of a document. Splits on `\n`, `\r\n` and a lone
/// `\r`; text ending in a terminator has a final empty line.
#[derive(Debug, Clone)]
pub struct Lines<'a> {
    rest: Option<&'a str>,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        match rest.find(['\n', '\r']) {
            Some(i) => {
                let len = if rest[i..].starts_with("\r\n") { 2 } else { 1 };
                self.rest = Some(&rest[i + len..]);
                Some(&rest[..i])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

/// Convert a position to a byte offset into `text`.
///
/// A character past the end of its line clamps to the line end; a position
/// inside a multi-unit character rounds down to that character's start; a
/// line past the last line clamps to the end of the text.
#[must_use]
pub fn position_to_offset(text: &str, position: Position, encoding: PositionEncoding) -> usize {
    let Some((start, end)) = line_bounds(text, position.line) else {
        return text.len();
    };

    let target = position.character as usize;
    let mut units = 0usize;
    for (idx, ch) in text[start..end].char_indices() {
        if units >= target {
            return start + idx;
        }
        units += encoding.units(ch);
        if units > target {
            return start + idx;
        }
    }
    end
}

/// Convert a byte offset into a position. Offsets past the end clamp to the end.
#[must_use]
pub fn offset_to_position(text: &str, offset: usize, encoding: PositionEncoding) -> Position {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }

    let bytes = text.as_bytes();
    let mut line = 0u32;
    let mut line_start = 0usize;
    let mut line_end = offset;
    let mut i = 0usize;

    while i < offset {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                if i + 1 == offset {
                    // Between `\r` and `\n`: still the end of this line.
                    line_end = i;
                    break;
                }
                i += 2;
                line += 1;
                line_start = i;
            }
            b'\n' | b'\r' => {
                i += 1;
                line += 1;
                line_start = i;
            }
            _ => i += 1,
        }
    }

    let character: usize = text[line_start..line_end]
        .chars()
        .map(|ch| encoding.units(ch))
        .sum();
    Position::new(line, character as u32)
}

/// An open text document as last synchronized by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    uri: DocumentUri,
    language_id: String,
    version: i32,
    text: String,
}

impl TextDocument {
    #[must_use]
    pub fn new(item: TextDocumentItem) -> Self {
        Self {
            uri: item.uri,
            language_id: item.language_id,
            version: item.version,
            text: item.text,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn line_count(&self) -> u32 {
        self.lines().count() as u32
    }

    /// Lines without their terminators, numbered the way positions are.
    #[must_use]
    pub fn lines(&self) -> Lines<'_> {
        Lines {
            rest: Some(&self.text),
        }
    }

    #[must_use]
    pub fn offset_at(&self, position: Position, encoding: PositionEncoding) -> usize {
        position_to_offset(&self.text, position, encoding)
    }

    #[must_use]
    pub fn position_at(&self, offset: usize, encoding: PositionEncoding) -> Position {
        offset_to_position(&self.text, offset, encoding)
    }

    fn apply_change(&mut self, change: TextDocumentContentChangeEvent, encoding: PositionEncoding) {
        match change {
            TextDocumentContentChangeEvent::Full { text } => self.text = text,
            TextDocumentContentChangeEvent::Incremental { range, text, .. } => {
                let range = range.normalized();
                let start = position_to_offset(&self.text, range.start, encoding);
                let end = position_to_offset(&self.text, range.end, encoding);
                self.text
                    .replace_range(start.min(end)..start.max(end), &text);
            }
        }
    }
}

/// All open documents, keyed by URI.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: HashMap<DocumentUri, TextDocument>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, params: DidOpenTextDocumentParams) -> Result<(), SyncError> {
        let item = params.text_document;
        if self.docs.contains_key(&item.uri) {
            return Err(SyncError::AlreadyOpen { uri: item.uri });
        }
        self.docs.insert(item.uri.clone(), TextDocument::new(item));
        Ok(())
    }

    /// Apply a `didChange` and return the new version.
    ///
    /// A rejected change leaves the document untouched. Once the version is
    /// accepted no individual change can fail, so the array applies whole.
    pub fn change(
        &mut self,
        params: DidChangeTextDocumentParams,
        encoding: PositionEncoding,
    ) -> Result<i32, SyncError> {
        let uri = params.text_document.uri;
        let received = params.text_document.version;
        let Some(doc) = self.docs.get_mut(&uri) else {
            return Err(SyncError::NotOpen { uri });
        };
        if received <= doc.version {
            return Err(SyncError::StaleVersion {
                uri,
                current: doc.version,
                received,
            });
        }

        for change in params.content_changes {
            doc.apply_change(change, encoding);
        }
        doc.version = received;
        Ok(received)
    }

    /// Handle `didSave`. Included text replaces the content without changing the version.
    pub fn save(&mut self, params: DidSaveTextDocumentParams) -> Result<(), SyncError> {
        let uri = params.text_document.uri;
        let Some(doc) = self.docs.get_mut(&uri) else {
            return Err(SyncError::NotOpen { uri });
        };
        if let Some(text) = params.text
            && text != doc.text
        {
            tracing::debug!(uri = %uri, "didSave text differs from tracked buffer; resyncing");
            doc.text = text;
        }
        Ok(())
    }

    pub fn close(&mut self, uri: &str) -> Result<TextDocument, SyncError> {
        self.docs.remove(uri).ok_or_else(|| SyncError::NotOpen {
            uri: uri.to_string(),
        })
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&TextDocument> {
        self.docs.get(uri)
    }

    #[must_use]
    pub fn is_open(&self, uri: &str) -> bool {
        self.docs.contains_key(uri)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
