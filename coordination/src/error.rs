//! Error types for the coordination core

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The clarifying-questions section exists but cannot be parsed.
///
/// Never fatal: the analyzer reports the issue as not ready instead.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum MalformedQuestionFormat {
    #[error("section has no numbered questions")]
    NoQuestions,

    #[error("question {0} is numbered more than once")]
    DuplicateIndex(u32),
}

/// A closed pull request could not be mapped to the issue it completes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pull request #{pr_number} references no issue (branch `{head_branch}`)")]
pub struct LinkResolutionError {
    pub pr_number: u64,
    pub head_branch: String,
}

/// Error type for spawn ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Unsupported ledger schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// A raw webhook payload could not be normalized.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid {event} payload: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}
