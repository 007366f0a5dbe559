//! Dispatch error taxonomy with retry classification.
//!
//! Every failure of the impure shell is represented here. The retry runner
//! asks `retry_category()` instead of matching on strings.
//!
//! ## Retry categories
//!
//! | Category           | Retriable | Notes |
//! |--------------------|-----------|-------|
//! | Transient          | yes       | network errors, timeouts, 5xx |
//! | RateLimit          | yes       | longer back-off |
//! | LinkResolution     | no        | PR needs human correction |
//! | LabelVerification  | no        | next event repairs the labels |
//! | External           | no        | tracker rejected the request |
//! | Ledger             | no        | local persistence failure |
//! | Configuration      | no        | bad config or event payload |

use std::fmt;

use coordination::{IngestError, IssueId, LedgerError, LinkResolutionError};
use thiserror::Error;

/// Classification used by the retry runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Network hiccup, command timeout, server error; retried with back-off.
    Transient,
    /// Tracker API rate limit; retried with a longer back-off.
    RateLimit,
    /// A pull request could not be linked to an issue.
    LinkResolution,
    /// Labels did not match the plan after applying it.
    LabelVerification,
    /// The tracker answered with a permanent failure.
    External,
    /// The spawn ledger could not be read or written.
    Ledger,
    /// Invalid configuration or input.
    Configuration,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit)
    }

    /// Multiplier applied to the base back-off delay.
    pub fn backoff_factor(self) -> u32 {
        match self {
            Self::RateLimit => 4,
            _ => 1,
        }
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::LinkResolution => write!(f, "link_resolution"),
            Self::LabelVerification => write!(f, "label_verification"),
            Self::External => write!(f, "external"),
            Self::Ledger => write!(f, "ledger"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Unified error type for dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    // ── Retriable ─────────────────────────────────────────────────────────
    /// Tracker call failed in a way that may succeed on retry.
    #[error("Transient tracker failure [{operation}]: {message}")]
    Transient { operation: String, message: String },

    /// Tracker API rate limit.
    #[error("Rate limited [{operation}]: {message}")]
    RateLimit { operation: String, message: String },

    // ── Non-retriable ─────────────────────────────────────────────────────
    /// The retry budget ran out on a retriable failure.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<DispatchError>,
    },

    #[error(transparent)]
    LinkResolution(#[from] LinkResolutionError),

    /// Labels read back after a mutation do not match the plan.
    #[error("Label verification failed on #{issue}: missing {missing:?}, stale {stale:?}")]
    LabelVerification {
        issue: IssueId,
        missing: Vec<String>,
        stale: Vec<String>,
    },

    /// The tracker rejected the request (not found, permission, bad input).
    #[error("Tracker error [{operation}]: {message}")]
    External { operation: String, message: String },

    #[error("Spawn ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The blocking ledger task panicked or was aborted.
    #[error("Spawn ledger task failed: {0}")]
    LedgerTask(#[from] tokio::task::JoinError),

    #[error("Invalid event: {0}")]
    Ingest(#[from] IngestError),

    /// Configuration is invalid or missing required fields.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DispatchError {
    /// Classify this error for retry logic.
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Transient { .. } => RetryCategory::Transient,
            Self::RateLimit { .. } => RetryCategory::RateLimit,
            Self::RetriesExhausted { .. } => RetryCategory::External,
            Self::LinkResolution(_) => RetryCategory::LinkResolution,
            Self::LabelVerification { .. } => RetryCategory::LabelVerification,
            Self::External { .. } => RetryCategory::External,
            Self::Ledger(_) | Self::LedgerTask(_) => RetryCategory::Ledger,
            Self::Ingest(_) => RetryCategory::Configuration,
            Self::Configuration(_) => RetryCategory::Configuration,
        }
    }

    /// Returns `true` if the retry runner may try again after this error.
    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn rate_limit(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RateLimit {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn external(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retriable() {
        let err = DispatchError::transient("issue view", "connection reset by peer");
        assert!(err.is_retriable());
        assert_eq!(err.retry_category(), RetryCategory::Transient);
    }

    #[test]
    fn test_rate_limit_backs_off_longer() {
        let err = DispatchError::rate_limit("issue edit", "API rate limit exceeded");
        assert!(err.is_retriable());
        assert!(
            err.retry_category().backoff_factor() > RetryCategory::Transient.backoff_factor()
        );
    }

    #[test]
    fn test_link_resolution_not_retriable() {
        let err = DispatchError::from(LinkResolutionError {
            pr_number: 4,
            head_branch: "main".into(),
        });
        assert!(!err.is_retriable());
        assert_eq!(err.retry_category(), RetryCategory::LinkResolution);
    }

    #[test]
    fn test_exhausted_is_terminal() {
        let err = DispatchError::RetriesExhausted {
            attempts: 4,
            last: Box::new(DispatchError::transient("issue view", "timeout")),
        };
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("4 attempts"));
    }

    #[tokio::test]
    async fn test_panicked_ledger_task_is_ledger_error() {
        let join_err = tokio::task::spawn_blocking(|| panic!("ledger file vanished"))
            .await
            .unwrap_err();
        let err = DispatchError::from(join_err);
        assert_eq!(err.retry_category(), RetryCategory::Ledger);
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_verification_failure_not_retriable() {
        let err = DispatchError::LabelVerification {
            issue: 3,
            missing: vec!["ready:work".into()],
            stale: Vec::new(),
        };
        assert!(!err.is_retriable());
    }
}
