//! Records, canonical aspects, and error-log entries as they appear in the
//! batch, output, and error JSONL streams.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::category::Category;
use crate::span::CharSpan;

/// Record identifier, unique within a corpus.
pub type Rid = i64;

/// Sentiment polarity of one aspect. Serialized as `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i64")]
pub enum Polarity {
    Negative,
    Neutral,
    Positive,
}

impl Polarity {
    /// Coerce an untrusted JSON value into a polarity.
    ///
    /// Integers are taken as-is, reals are truncated, booleans count as 1/0
    /// and strings are parsed after trimming. Anything unparseable or outside
    /// `{-1, 0, 1}` becomes [`Polarity::Neutral`].
    pub fn coerce(raw: &Value) -> Polarity {
        let number = match raw {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        number
            .and_then(|n| Polarity::try_from(n).ok())
            .unwrap_or(Polarity::Neutral)
    }

    pub fn value(self) -> i8 {
        match self {
            Polarity::Negative => -1,
            Polarity::Neutral => 0,
            Polarity::Positive => 1,
        }
    }
}

impl From<Polarity> for i8 {
    fn from(p: Polarity) -> i8 {
        p.value()
    }
}

impl TryFrom<i64> for Polarity {
    type Error = String;

    fn try_from(n: i64) -> Result<Self, Self::Error> {
        match n {
            -1 => Ok(Polarity::Negative),
            0 => Ok(Polarity::Neutral),
            1 => Ok(Polarity::Positive),
            other => Err(format!("polarity must be -1, 0 or 1, got {other}")),
        }
    }
}

/// One canonical, persisted aspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aspect {
    pub term: String,
    pub category: Category,
    pub polarity: Polarity,
    /// Justifying substring; currently always the term itself.
    pub evidence: String,
    pub evidence_span: Option<CharSpan>,
    pub annotator: String,
    pub confidence: f64,
}

/// A record together with its weak labels, one line of a `seeds_*.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub rid: Rid,
    pub sentence: String,
    pub aspects: Vec<Aspect>,
}

/// A batch input line after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rid: Rid,
    /// Review text exactly as it appears in the batch line.
    pub text: String,
}

/// Why a record was rejected. Tags are stable; they are grepped by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedLine,
    MissingOrInvalidRid,
    EmptySentence,
    InvalidResponse,
    EmptyAspects,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedLine => "malformed_line",
            ErrorKind::MissingOrInvalidRid => "missing_or_invalid_rid",
            ErrorKind::EmptySentence => "empty_sentence",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::EmptyAspects => "empty_aspects",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of an `errors_*.log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// The identifier as found in the input; `null` when absent.
    pub rid: Value,
    pub error: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ErrorEntry {
    pub fn new(rid: impl Into<Value>, error: ErrorKind) -> Self {
        Self {
            rid: rid.into(),
            error,
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Outcome of validating one batch line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Record(Record),
    Rejected(ErrorEntry),
}

impl Record {
    /// Validate one batch line.
    ///
    /// `rid` may be an integer, an integral float or a numeric string. The
    /// text is read from `sentence`, falling back to `text`.
    pub fn parse_line(line: &str) -> ParsedLine {
        let value: Value = match serde_json::from_str(line) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                return ParsedLine::Rejected(
                    ErrorEntry::new(Value::Null, ErrorKind::MalformedLine)
                        .with_raw(Value::String(line.to_string())),
                );
            }
        };

        let raw_rid = value.get("rid").cloned().unwrap_or(Value::Null);
        let Some(rid) = coerce_rid(&raw_rid) else {
            return ParsedLine::Rejected(
                ErrorEntry::new(raw_rid, ErrorKind::MissingOrInvalidRid).with_raw(value),
            );
        };

        // Whitespace only decides emptiness; the stored text stays verbatim so
        // spans index the sentence as written.
        let text = ["sentence", "text"]
            .iter()
            .filter_map(|key| value.get(*key).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return ParsedLine::Rejected(ErrorEntry::new(rid, ErrorKind::EmptySentence));
        }

        ParsedLine::Record(Record {
            rid,
            text: text.to_string(),
        })
    }
}

fn coerce_rid(raw: &Value) -> Option<Rid> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
