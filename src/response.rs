//! Recovery of a JSON value from raw model completions.
//!
//! Models asked for "JSON only" still sometimes prepend reasoning or a
//! friendly preamble. The parser tries the whole text first, then the
//! leftmost `{...}` / `[...]` block that runs to the end of the text.

use std::sync::LazyLock;

use miette::Diagnostic;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Characters of the offending text kept in a parse diagnostic.
pub const HEAD_CHARS: usize = 240;

static TRAILING_JSON_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\{.*\}|\[.*\])\s*$").unwrap());

/// The completion did not contain a parseable JSON value.
#[derive(Debug, Error, Diagnostic)]
#[error("JSON parse failed (head): {head}")]
#[diagnostic(
    code(absa::response::parse),
    help(
        "The model returned text without a trailing JSON object or array. \
         Lower the temperature or check that the model honours format=json."
    )
)]
pub struct ResponseError {
    /// First characters of the text, for operator debugging.
    pub head: String,
}

impl ResponseError {
    fn from_text(text: &str) -> Self {
        Self {
            head: text.chars().take(HEAD_CHARS).collect(),
        }
    }
}

/// Parse `text` as JSON, tolerating commentary before the payload.
pub fn extract_json(text: &str) -> Result<Value, ResponseError> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    let block = TRAILING_JSON_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ResponseError::from_text(text))?;

    serde_json::from_str(block.as_str()).map_err(|_| ResponseError::from_text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_parses_directly() {
        let value = extract_json(r#"{"aspects":[{"term":"핏"}]}"#).unwrap();
        assert_eq!(value, json!({"aspects": [{"term": "핏"}]}));
    }

    #[test]
    fn preamble_is_skipped() {
        let value = extract_json("Sure, here it is:\n{\"aspects\":[]}").unwrap();
        assert_eq!(value, json!({"aspects": []}));
    }

    #[test]
    fn trailing_whitespace_is_allowed() {
        let value = extract_json("결과:\n[1, 2, 3]\n\n  ").unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn prose_fails_cleanly() {
        let err = extract_json("I cannot help with that.").unwrap_err();
        assert_eq!(err.head, "I cannot help with that.");
    }

    #[test]
    fn trailing_prose_after_json_fails() {
        assert!(extract_json("{\"aspects\":[]} hope this helps").is_err());
    }

    #[test]
    fn unbalanced_block_fails() {
        assert!(extract_json("here: {\"aspects\": [} ]").is_err());
    }

    #[test]
    fn diagnostic_head_is_truncated_by_chars() {
        let text = "가".repeat(HEAD_CHARS * 2);
        let err = extract_json(&text).unwrap_err();
        assert_eq!(err.head.chars().count(), HEAD_CHARS);
        assert!(err.to_string().starts_with("JSON parse failed (head): 가"));
    }
}
