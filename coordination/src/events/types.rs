//! Normalized event types

use serde::{Deserialize, Serialize};

use crate::issue::{IssueId, PullRequestInfo};

/// What happened to the issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IssueEventKind {
    /// Issue opened, edited, reopened, labeled or unlabeled.
    IssueChanged { action: String },
    /// Comment created or edited.
    CommentChanged { action: String },
    /// An agent signalled that it began work.
    WorkStarted,
    /// A pull request closed (merged or not).
    PullRequestClosed { pull_request: PullRequestInfo },
}

/// A normalized event.
///
/// `issue` is `None` only for pull-request events, whose issue has to be
/// resolved from the PR metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub issue: Option<IssueId>,
    pub kind: IssueEventKind,
}

impl IssueEvent {
    pub fn issue_changed(issue: IssueId, action: impl Into<String>) -> Self {
        Self {
            issue: Some(issue),
            kind: IssueEventKind::IssueChanged {
                action: action.into(),
            },
        }
    }

    pub fn comment_changed(issue: IssueId, action: impl Into<String>) -> Self {
        Self {
            issue: Some(issue),
            kind: IssueEventKind::CommentChanged {
                action: action.into(),
            },
        }
    }

    pub fn work_started(issue: IssueId) -> Self {
        Self {
            issue: Some(issue),
            kind: IssueEventKind::WorkStarted,
        }
    }

    pub fn pull_request_closed(pull_request: PullRequestInfo) -> Self {
        Self {
            issue: None,
            kind: IssueEventKind::PullRequestClosed { pull_request },
        }
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self.kind {
            IssueEventKind::IssueChanged { .. } => "issue_changed",
            IssueEventKind::CommentChanged { .. } => "comment_changed",
            IssueEventKind::WorkStarted => "work_started",
            IssueEventKind::PullRequestClosed { .. } => "pull_request_closed",
        }
    }
}
