//! `IssueTracker` backed by the GitHub CLI (`gh`).
//!
//! Every call shells out with `--json` output where the CLI supports it and
//! maps stderr onto the retry categories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordination::{IssueComment, IssueId, IssueSnapshot, IssueStatus, PullRequestInfo};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{DispatchError, DispatchResult};
use crate::tracker::IssueTracker;

const ISSUE_FIELDS: &str = "number,title,body,labels,comments,createdAt,state";
const PR_FIELDS: &str = "number,state,body,headRefName";
/// `gh issue list` defaults to 30 results.
const LIST_LIMIT: &str = "1000";

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhComment {
    #[serde(default)]
    body: String,
    created_at: DateTime<Utc>,
}

/// An issue as returned by `gh issue view --json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhIssue {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    comments: Vec<GhComment>,
    created_at: DateTime<Utc>,
    state: String,
}

impl From<GhIssue> for IssueSnapshot {
    fn from(raw: GhIssue) -> Self {
        IssueSnapshot {
            id: raw.number,
            title: raw.title,
            body: raw.body,
            comments: raw
                .comments
                .into_iter()
                .map(|c| IssueComment::new(c.body, c.created_at))
                .collect(),
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
            created_at: raw.created_at,
            status: IssueStatus::from_tracker(&raw.state),
        }
    }
}

/// A pull request as returned by `gh pr view --json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: u64,
    state: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    head_ref_name: String,
}

/// Classify a failed `gh` invocation from its stderr.
pub fn classify_failure(operation: &str, stderr: &str) -> DispatchError {
    let lower = stderr.to_ascii_lowercase();
    let message = stderr.trim().to_string();
    if lower.contains("rate limit") || lower.contains("http 429") {
        DispatchError::rate_limit(operation, message)
    } else if lower.contains("http 500")
        || lower.contains("http 502")
        || lower.contains("http 503")
        || lower.contains("http 504")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("tls handshake")
        || lower.contains("unexpected eof")
        || lower.contains("could not resolve host")
    {
        DispatchError::transient(operation, message)
    } else {
        DispatchError::external(operation, message)
    }
}

/// Bridge to the GitHub CLI.
///
/// `gh` handles authentication and API versioning, so we shell out rather
/// than speak REST directly.
pub struct GhCliTracker {
    bin: String,
    repo: Option<String>,
}

impl GhCliTracker {
    pub fn new(bin: impl Into<String>, repo: Option<String>) -> Self {
        Self {
            bin: bin.into(),
            repo,
        }
    }

    fn repo_args(&self) -> Vec<String> {
        match &self.repo {
            Some(repo) => vec!["--repo".to_string(), repo.clone()],
            None => Vec::new(),
        }
    }

    /// Run `gh <args>` and return stdout.
    async fn run(&self, operation: &str, args: Vec<String>) -> DispatchResult<Vec<u8>> {
        debug!(operation, ?args, "Running gh");
        let output = Command::new(&self.bin)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DispatchError::Configuration(format!(
                    "`{}` not found. Is the GitHub CLI installed?",
                    self.bin
                )),
                _ => DispatchError::transient(operation, format!("Failed to run gh: {e}")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(operation, &stderr));
        }
        Ok(output.stdout)
    }

    async fn run_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        args: Vec<String>,
    ) -> DispatchResult<T> {
        let stdout = self.run(operation, args).await?;
        serde_json::from_slice(&stdout).map_err(|e| {
            DispatchError::external(operation, format!("Failed to parse gh output: {e}"))
        })
    }

    async fn edit_label(&self, issue: IssueId, flag: &str, label: &str) -> DispatchResult<()> {
        let mut args = vec![
            "issue".to_string(),
            "edit".to_string(),
            issue.to_string(),
            flag.to_string(),
            label.to_string(),
        ];
        args.extend(self.repo_args());
        self.run("issue edit", args).await.map(|_| ())
    }
}

#[async_trait]
impl IssueTracker for GhCliTracker {
    async fn fetch_issue(&self, issue: IssueId) -> DispatchResult<IssueSnapshot> {
        let mut args = vec![
            "issue".to_string(),
            "view".to_string(),
            issue.to_string(),
            "--json".to_string(),
            ISSUE_FIELDS.to_string(),
        ];
        args.extend(self.repo_args());
        let raw: GhIssue = self.run_json("issue view", args).await?;
        Ok(raw.into())
    }

    async fn list_open_issues(&self) -> DispatchResult<Vec<IssueSnapshot>> {
        let mut args = vec![
            "issue".to_string(),
            "list".to_string(),
            "--state".to_string(),
            "open".to_string(),
            "--limit".to_string(),
            LIST_LIMIT.to_string(),
            "--json".to_string(),
            ISSUE_FIELDS.to_string(),
        ];
        args.extend(self.repo_args());
        let raw: Vec<GhIssue> = self.run_json("issue list", args).await?;
        Ok(raw.into_iter().map(IssueSnapshot::from).collect())
    }

    async fn fetch_pull_request(&self, number: u64) -> DispatchResult<PullRequestInfo> {
        let mut args = vec![
            "pr".to_string(),
            "view".to_string(),
            number.to_string(),
            "--json".to_string(),
            PR_FIELDS.to_string(),
        ];
        args.extend(self.repo_args());
        let raw: GhPullRequest = self.run_json("pr view", args).await?;
        Ok(PullRequestInfo {
            number: raw.number,
            merged: raw.state.eq_ignore_ascii_case("merged"),
            body: raw.body,
            head_branch: raw.head_ref_name,
        })
    }

    async fn add_label(&self, issue: IssueId, label: &str) -> DispatchResult<()> {
        self.edit_label(issue, "--add-label", label).await
    }

    async fn remove_label(&self, issue: IssueId, label: &str) -> DispatchResult<()> {
        self.edit_label(issue, "--remove-label", label).await
    }

    async fn post_comment(&self, issue: IssueId, body: &str) -> DispatchResult<()> {
        // The issues comment endpoint also accepts pull request numbers.
        let repo = self.repo.as_deref().unwrap_or("{owner}/{repo}");
        let args = vec![
            "api".to_string(),
            "--method".to_string(),
            "POST".to_string(),
            format!("repos/{repo}/issues/{issue}/comments"),
            "-f".to_string(),
            format!("body={body}"),
        ];
        self.run("issue comment", args).await.map(|_| ())
    }

    async fn close_issue(&self, issue: IssueId) -> DispatchResult<()> {
        let mut args = vec!["issue".to_string(), "close".to_string(), issue.to_string()];
        args.extend(self.repo_args());
        self.run("issue close", args).await.map(|_| ())
    }
}
