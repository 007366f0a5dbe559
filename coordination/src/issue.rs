//! Issue data model
//!
//! A read-only view of what the external tracker reports for an issue at the
//! start of an event. Nothing here is authoritative between events: every
//! decision is recomputed from a fresh snapshot.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric issue identifier as used by the tracker (`#123`).
pub type IssueId = u64;

/// Open/closed flag of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Open,
    Closed,
}

impl IssueStatus {
    /// Parse the tracker's state string (`OPEN`, `open`, `CLOSED`, ...).
    pub fn from_tracker(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("closed") {
            Self::Closed
        } else {
            Self::Open
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A single comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl IssueComment {
    pub fn new(body: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            body: body.into(),
            created_at,
        }
    }
}

/// Snapshot of an issue as fetched from the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSnapshot {
    pub id: IssueId,
    pub title: String,
    pub body: String,
    /// Comments in the order the tracker returned them.
    pub comments: Vec<IssueComment>,
    pub labels: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub status: IssueStatus,
}

impl IssueSnapshot {
    pub fn is_open(&self) -> bool {
        self.status == IssueStatus::Open
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Comments sorted chronologically. Ties keep tracker order.
    pub fn comments_chronological(&self) -> Vec<&IssueComment> {
        let mut sorted: Vec<&IssueComment> = self.comments.iter().collect();
        sorted.sort_by_key(|c| c.created_at);
        sorted
    }
}

/// What the pull-request read surface reports when a PR closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub merged: bool,
    pub body: String,
    pub head_branch: String,
}
