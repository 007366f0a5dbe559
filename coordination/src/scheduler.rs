//! Priority Scheduler
//!
//! Picks the next `ready:work` issue when an agent frees up. Ordering is
//! priority class first (critical → none), then oldest creation time, then
//! lowest issue number.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::issue::IssueSnapshot;
use crate::lifecycle::{infer_state, labels, IssueState};
use crate::readiness;

/// Priority derived from `priority:*` labels. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Critical,
    High,
    Medium,
    None,
}

impl PriorityClass {
    /// Highest priority among the labels; `None` when no priority label.
    pub fn from_labels<'a>(issue_labels: impl IntoIterator<Item = &'a String>) -> Self {
        issue_labels
            .into_iter()
            .filter_map(|l| match l.as_str() {
                labels::PRIORITY_CRITICAL => Some(Self::Critical),
                labels::PRIORITY_HIGH => Some(Self::High),
                labels::PRIORITY_MEDIUM => Some(Self::Medium),
                _ => None,
            })
            .min()
            .unwrap_or(Self::None)
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Whether the issue is open and currently in `ReadyWork`.
pub fn is_ready_work(issue: &IssueSnapshot) -> bool {
    if !issue.is_open() || !issue.has_label(labels::READY_WORK) {
        return false;
    }
    let report = readiness::analyze_issue(issue);
    infer_state(&issue.labels, Some(&report)).state == IssueState::ReadyWork
}

/// Select the next issue to hand to an agent.
///
/// Returns `None` when nothing is ready; callers treat that as idle.
pub fn select_next(candidates: &[IssueSnapshot]) -> Option<&IssueSnapshot> {
    candidates
        .iter()
        .filter(|issue| is_ready_work(issue))
        .min_by_key(|issue| {
            (
                PriorityClass::from_labels(&issue.labels),
                issue.created_at,
                issue.id,
            )
        })
}
