//! Pull request → issue resolution.
//!
//! A closing keyword reference (`Closes #12`) wins over a bare `#12`
//! mention; the branch name convention `<prefix>/<issue>-<slug>` is the
//! fallback when the body has no reference at all.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::LinkResolutionError;
use crate::issue::{IssueId, PullRequestInfo};

static CLOSING_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s*:?\s+#(\d+)\b")
        .expect("CLOSING_REF regex should compile")
});

static ANY_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w&])#(\d+)\b").expect("ANY_REF regex should compile"));

static BRANCH_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/]+/(\d+)(?:-|$)").expect("BRANCH_REF regex should compile"));

fn first_capture(re: &Regex, text: &str) -> Option<IssueId> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<IssueId>().ok())
        .find(|id| *id > 0)
}

/// Where the issue reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    ClosingKeyword,
    BodyMention,
    BranchName,
}

/// Resolve the issue a pull request completes, and where the reference came from.
pub fn resolve_with_source(
    pr: &PullRequestInfo,
) -> Result<(IssueId, LinkSource), LinkResolutionError> {
    if let Some(id) = first_capture(&CLOSING_REF, &pr.body) {
        return Ok((id, LinkSource::ClosingKeyword));
    }
    if let Some(id) = first_capture(&ANY_REF, &pr.body) {
        return Ok((id, LinkSource::BodyMention));
    }
    if let Some(id) = first_capture(&BRANCH_REF, &pr.head_branch) {
        return Ok((id, LinkSource::BranchName));
    }
    Err(LinkResolutionError {
        pr_number: pr.number,
        head_branch: pr.head_branch.clone(),
    })
}

/// Resolve the issue a pull request completes.
pub fn resolve_issue(pr: &PullRequestInfo) -> Result<IssueId, LinkResolutionError> {
    resolve_with_source(pr).map(|(id, _)| id)
}
