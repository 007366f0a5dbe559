//! Event Ingestor
//!
//! Webhook deliveries arrive in several shapes (`issues`, `issue_comment`,
//! `pull_request`). They are normalized into a single [`IssueEvent`] before
//! the lifecycle engine sees them.
//!
//! ```text
//! (event name, JSON payload) ──► ingest() ──► Some(IssueEvent) | None (ignored)
//! ```

pub mod ingest;
pub mod types;

pub use ingest::ingest;
pub use types::{IssueEvent, IssueEventKind};
