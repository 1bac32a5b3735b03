//! Top-level diagnostic error type.
//!
//! Each subsystem defines its own error enum with miette `#[diagnostic]`
//! derives (codes, help text, source chains). `AbsaError` wraps them so the
//! binary can surface any of them with full context.

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::corpus::CorpusError;
use crate::labeling::LabelError;
use crate::llm::LlmError;

#[derive(Debug, Error, Diagnostic)]
pub enum AbsaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),
}

pub type AbsaResult<T> = std::result::Result<T, AbsaError>;
