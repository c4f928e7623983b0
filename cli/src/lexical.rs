//! Language-agnostic token classifier backing the bundled server.
//!
//! Recognizes line comments (`//`, `#`), double-quoted strings, numbers,
//! a small keyword set and identifiers. Good enough to exercise the token
//! delta path against any plain-text buffer.

use parley_lsp::{SemanticToken, TextDocument};
use parley_types::PositionEncoding;
use parley_types::semantic_tokens::SemanticTokensLegend;

pub const COMMENT: u32 = 0;
pub const STRING: u32 = 1;
pub const NUMBER: u32 = 2;
pub const KEYWORD: u32 = 3;
pub const VARIABLE: u32 = 4;

const KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "else", "false", "fn", "for", "if", "import", "in",
    "let", "loop", "match", "return", "true", "type", "while",
];

#[must_use]
pub fn legend() -> SemanticTokensLegend {
    SemanticTokensLegend::new(
        ["comment", "string", "number", "keyword", "variable"],
        Vec::<String>::new(),
    )
}

/// Tokens for every line of `document`, columns counted in `encoding`.
pub fn tokens(document: &TextDocument, encoding: PositionEncoding) -> Vec<SemanticToken> {
    let mut out = Vec::new();
    for (line, text) in document.lines().enumerate() {
        scan_line(line as u32, text, encoding, &mut out);
    }
    out
}

fn width(text: &str, encoding: PositionEncoding) -> u32 {
    match encoding {
        PositionEncoding::Utf8 => text.len() as u32,
        PositionEncoding::Utf16 => text.chars().map(char::len_utf16).sum::<usize>() as u32,
        PositionEncoding::Utf32 => text.chars().count() as u32,
    }
}

fn scan_line(line: u32, text: &str, encoding: PositionEncoding, out: &mut Vec<SemanticToken>) {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut push = |start: usize, end: usize, kind: u32| {
        out.push(SemanticToken::new(
            line,
            width(&text[..start], encoding),
            width(&text[start..end], encoding),
            kind,
            0,
        ));
    };

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'#' || text[i..].starts_with("//") {
            push(i, text.len(), COMMENT);
            return;
        }
        if b == b'"' {
            let mut end = i + 1;
            let mut escaped = false;
            while end < bytes.len() {
                match bytes[end] {
                    b'\\' if !escaped => escaped = true,
                    b'"' if !escaped => {
                        end += 1;
                        break;
                    }
                    _ => escaped = false,
                }
                end += 1;
            }
            let end = end.min(bytes.len());
            push(i, end, STRING);
            i = end;
            continue;
        }
        if b.is_ascii_digit() {
            let end = run(bytes, i, |c| c.is_ascii_alphanumeric() || c == b'.' || c == b'_');
            push(i, end, NUMBER);
            i = end;
            continue;
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            let end = run(bytes, i, |c| c.is_ascii_alphanumeric() || c == b'_');
            let kind = if KEYWORDS.contains(&&text[i..end]) {
                KEYWORD
            } else {
                VARIABLE
            };
            push(i, end, kind);
            i = end;
            continue;
        }
        // Skip the whole code point so slicing stays on char boundaries.
        i += text[i..].chars().next().map_or(1, char::len_utf8);
    }
}

fn run(bytes: &[u8], start: usize, accept: impl Fn(u8) -> bool) -> usize {
    let mut end = start;
    while end < bytes.len() && accept(bytes[end]) {
        end += 1;
    }
    end
}
