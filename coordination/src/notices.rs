//! Comments the orchestrator itself posts on issues.
//!
//! Every orchestrator comment starts with a fixed marker line so that
//! downstream consumers can parse it and the readiness analyzer can skip it.

use crate::issue::IssueId;

/// First line of a spawn trigger comment.
pub const SPAWN_MARKER: &str = "ORCHESTRATOR-SPAWN-AGENT";
/// First line of the comment posted when answers unblock an issue.
pub const RESUMED_MARKER: &str = "ORCHESTRATOR-RESUMED";
/// First line of the comment posted when a merged PR completes an issue.
pub const COMPLETED_MARKER: &str = "ORCHESTRATOR-COMPLETED";
/// First line of the comment posted on a PR that references no issue.
pub const LINK_ERROR_MARKER: &str = "ORCHESTRATOR-LINK-ERROR";

const ALL_MARKERS: [&str; 4] = [
    SPAWN_MARKER,
    RESUMED_MARKER,
    COMPLETED_MARKER,
    LINK_ERROR_MARKER,
];

/// Whether a comment body was written by the orchestrator.
pub fn is_orchestrator_comment(body: &str) -> bool {
    let first = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    ALL_MARKERS.contains(&first.trim())
}

/// Posted when the last clarifying question gets answered.
pub fn resumed_comment(issue: IssueId, total_questions: usize) -> String {
    format!(
        "{RESUMED_MARKER}\n\
         All {total_questions} clarifying question(s) on #{issue} have answers. \
         Moving to `ready:work`; an agent will pick this up."
    )
}

/// Posted when a merged pull request completes the issue.
pub fn completed_comment(issue: IssueId, pr_number: u64) -> String {
    format!("{COMPLETED_MARKER}\nCompleted by #{pr_number}. Closing #{issue}.")
}

/// Posted on a pull request whose closing could not be linked to an issue.
pub fn link_error_comment(pr_number: u64, head_branch: &str) -> String {
    format!(
        "{LINK_ERROR_MARKER}\n\
         Could not find the issue that #{pr_number} completes. Reference it in the \
         description (`Closes #<issue>`) or use a branch named `<prefix>/<issue>-...` \
         (current branch: `{head_branch}`), then mark the issue complete by hand."
    )
}
