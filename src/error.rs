//! Error types for the table generator and runtime parser.

use thiserror::Error;

/// Errors that can occur during grammar analysis, table generation,
/// table serialization, and parsing.
#[derive(Error, Debug)]
pub enum SdtError {
    #[error("Invalid grammar description: {0}")]
    InvalidFormat(String),

    #[error("Invalid production: {0}")]
    InvalidProduction(String),

    #[error("Empty grammar input")]
    EmptyInput,

    #[error("Undefined start symbol {0}")]
    UndefinedStart(String),

    #[error("Shift-Reduce conflict cannot be resolved (state {state} on {token})")]
    ShiftReduceConflict { state: usize, token: String },

    #[error("Reduce-Reduce conflict cannot be resolved (state {state})")]
    ReduceReduceConflict { state: usize },

    #[error("state {0} has no valid error repair value")]
    MissingContinuation(usize),

    #[error("unresolved grammar conflict; tables not generated")]
    UnresolvedConflict,

    #[error("Syntax error")]
    FatalSyntax,

    #[error("Malformed table file: {0}")]
    BadTableFile(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, SdtError>;
