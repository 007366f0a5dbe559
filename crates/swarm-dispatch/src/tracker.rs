//! Issue tracker surfaces the dispatcher consumes.

use async_trait::async_trait;
use coordination::{IssueId, IssueSnapshot, PullRequestInfo};

use crate::errors::DispatchResult;

/// Read and write access to the issue tracker.
///
/// Implementations report failures as [`DispatchError`](crate::errors::DispatchError)
/// so the retry runner can tell transient failures from permanent ones.
/// Bounding and retrying calls is the caller's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueTracker: Send + Sync {
    // ── Read surface ──────────────────────────────────────────────────────
    async fn fetch_issue(&self, issue: IssueId) -> DispatchResult<IssueSnapshot>;

    /// Every open issue, with body and comments.
    async fn list_open_issues(&self) -> DispatchResult<Vec<IssueSnapshot>>;

    async fn fetch_pull_request(&self, number: u64) -> DispatchResult<PullRequestInfo>;

    // ── Write surface ─────────────────────────────────────────────────────
    async fn add_label(&self, issue: IssueId, label: &str) -> DispatchResult<()>;

    async fn remove_label(&self, issue: IssueId, label: &str) -> DispatchResult<()>;

    /// Comment on an issue or pull request.
    async fn post_comment(&self, issue: IssueId, body: &str) -> DispatchResult<()>;

    async fn close_issue(&self, issue: IssueId) -> DispatchResult<()>;
}
