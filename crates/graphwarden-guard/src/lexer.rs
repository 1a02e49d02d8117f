//! Literal- and comment-aware splitting of query text.
//!
//! Cypher has three quoted forms: `'string'`, `"string"`, and `` `name` ``.
//! Strings escape with a backslash; backtick names escape a backtick by
//! doubling it. Comments are `// to end of line` and `/* block */`. Comment
//! markers inside a quoted span are plain text, and quotes inside a comment
//! do not open a literal.
//!
//! Unterminated literals and block comments run to the end of the text.

use std::ops::Range;

/// What a run of query text is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Code,
    Literal,
    Comment,
}

/// Split `text` into consecutive spans covering every byte.
pub fn spans(text: &str) -> Vec<(SpanKind, Range<usize>)> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let end = match (bytes[i], bytes.get(i + 1)) {
            (b'\'' | b'"' | b'`', _) => Some((SpanKind::Literal, literal_end(bytes, i))),
            (b'/', Some(b'/')) => Some((SpanKind::Comment, line_end(bytes, i))),
            (b'/', Some(b'*')) => Some((SpanKind::Comment, block_end(bytes, i))),
            _ => None,
        };
        match end {
            Some((kind, end)) => {
                if start < i {
                    out.push((SpanKind::Code, start..i));
                }
                out.push((kind, i..end));
                i = end;
                start = end;
            }
            None => i += 1,
        }
    }
    if start < bytes.len() {
        out.push((SpanKind::Code, start..bytes.len()));
    }
    out
}

/// Drop comments and collapse whitespace outside literals. Literals are
/// kept verbatim.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for (kind, range) in spans(text) {
        let piece = &text[range];
        match kind {
            SpanKind::Comment => pending_space = true,
            SpanKind::Literal => {
                push_separator(&mut out, &mut pending_space);
                out.push_str(piece);
            }
            SpanKind::Code => {
                for c in piece.chars() {
                    if c.is_whitespace() {
                        pending_space = true;
                    } else {
                        push_separator(&mut out, &mut pending_space);
                        out.push(c);
                    }
                }
            }
        }
    }
    out
}

/// `text` with every literal and comment byte blanked to a space.
///
/// Byte offsets are preserved, so a match found here can be applied to
/// the original text.
pub fn code_only(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (kind, range) in spans(text) {
        let piece = &text[range];
        match kind {
            SpanKind::Code => out.push_str(piece),
            SpanKind::Literal | SpanKind::Comment => out.push_str(&" ".repeat(piece.len())),
        }
    }
    out
}

fn push_separator(out: &mut String, pending_space: &mut bool) {
    if *pending_space && !out.is_empty() {
        out.push(' ');
    }
    *pending_space = false;
}

fn literal_end(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote != b'`' => i += 2,
            b if b == quote => {
                if quote == b'`' && bytes.get(i + 1) == Some(&b'`') {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn line_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| start + offset)
}

fn block_end(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |offset| start + 2 + offset + 2)
}
