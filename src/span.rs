//! Evidence span location.
//!
//! Offsets are counted in Unicode scalar values (`char`s), not bytes, so a
//! span can be applied to the sentence by anyone reading the JSONL output
//! without knowing the encoding.

use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` character range, serialized as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan(pub usize, pub usize);

impl CharSpan {
    pub fn start(&self) -> usize {
        self.0
    }

    pub fn end(&self) -> usize {
        self.1
    }

    /// Slice the span out of `text`, counting characters.
    /// Reversed spans (`end < start`) yield `None`.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.1 < self.0 {
            return None;
        }
        let mut indices = text.char_indices().map(|(i, _)| i).chain([text.len()]);
        let start = indices.nth(self.0)?;
        let end = if self.1 == self.0 {
            start
        } else {
            indices.nth(self.1 - self.0 - 1)?
        };
        text.get(start..end)
    }
}

/// Locate `term` inside `sentence`.
///
/// An exact match returns offsets into `sentence`. When that fails, both
/// strings are stripped of all whitespace and searched again; a hit there
/// returns offsets into the *collapsed* sentence, which only line up with
/// the input when no whitespace precedes the match. Callers treat such
/// spans as approximate.
pub fn find_span(sentence: &str, term: &str) -> Option<CharSpan> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }

    if let Some(span) = char_find(sentence, term) {
        return Some(span);
    }

    let collapsed_sentence = strip_whitespace(sentence);
    let collapsed_term = strip_whitespace(term);
    char_find(&collapsed_sentence, &collapsed_term)
}

fn char_find(haystack: &str, needle: &str) -> Option<CharSpan> {
    let byte_idx = haystack.find(needle)?;
    let start = haystack[..byte_idx].chars().count();
    Some(CharSpan(start, start + needle.chars().count()))
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
