//! Webhook payload normalization.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::types::IssueEvent;
use crate::error::IngestError;
use crate::issue::PullRequestInfo;
use crate::lifecycle::labels;

#[derive(Debug, Deserialize)]
struct IssueRef {
    number: u64,
    /// Present when the "issue" is really a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LabelRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IssuesPayload {
    action: String,
    issue: IssueRef,
    #[serde(default)]
    label: Option<LabelRef>,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    action: String,
    issue: IssueRef,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    number: u64,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    body: Option<String>,
    head: HeadRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRequestRef,
}

fn parse<T: DeserializeOwned>(event: &str, payload: &serde_json::Value) -> Result<T, IngestError> {
    T::deserialize(payload).map_err(|source| IngestError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

/// Normalize one webhook delivery.
///
/// Returns `Ok(None)` for deliveries the orchestrator does not act on
/// (unknown event names, unrelated actions, comments on pull requests).
pub fn ingest(event_name: &str, payload: &serde_json::Value) -> Result<Option<IssueEvent>, IngestError> {
    let event = match event_name {
        "issues" => {
            let p: IssuesPayload = parse(event_name, payload)?;
            match p.action.as_str() {
                "labeled"
                    if p.label.as_ref().map(|l| l.name.as_str()) == Some(labels::IN_PROGRESS) =>
                {
                    Some(IssueEvent::work_started(p.issue.number))
                }
                "opened" | "edited" | "reopened" | "labeled" | "unlabeled" => {
                    Some(IssueEvent::issue_changed(p.issue.number, p.action.clone()))
                }
                _ => None,
            }
        }
        "issue_comment" => {
            let p: CommentPayload = parse(event_name, payload)?;
            if p.issue.pull_request.is_some() {
                None
            } else {
                match p.action.as_str() {
                    "created" | "edited" => Some(IssueEvent::comment_changed(p.issue.number, p.action.clone())),
                    _ => None,
                }
            }
        }
        "pull_request" => {
            let p: PullRequestPayload = parse(event_name, payload)?;
            (p.action == "closed").then(|| {
                IssueEvent::pull_request_closed(PullRequestInfo {
                    number: p.pull_request.number,
                    merged: p.pull_request.merged,
                    body: p.pull_request.body.unwrap_or_default(),
                    head_branch: p.pull_request.head.branch,
                })
            })
        }
        _ => None,
    };

    if event.is_none() {
        debug!(event = event_name, "Delivery ignored");
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::IssueEventKind;

    #[test]
    fn test_issue_opened() {
        let event = ingest("issues", &json!({"action": "opened", "issue": {"number": 5}}))
            .unwrap()
            .unwrap();
        assert_eq!(event, IssueEvent::issue_changed(5, "opened"));
    }

    #[test]
    fn test_in_progress_label_is_work_started() {
        let payload = json!({
            "action": "labeled",
            "issue": {"number": 5},
            "label": {"name": "status:in-progress"}
        });
        let event = ingest("issues", &payload).unwrap().unwrap();
        assert_eq!(event.kind, IssueEventKind::WorkStarted);

        let payload = json!({
            "action": "labeled",
            "issue": {"number": 5},
            "label": {"name": "bug"}
        });
        let event = ingest("issues", &payload).unwrap().unwrap();
        assert_eq!(event.label(), "issue_changed");
    }

    #[test]
    fn test_closed_issue_action_is_ignored() {
        let payload = json!({"action": "closed", "issue": {"number": 5}});
        assert!(ingest("issues", &payload).unwrap().is_none());
    }

    #[test]
    fn test_comment_on_issue_and_on_pr() {
        let on_issue = json!({"action": "created", "issue": {"number": 8}, "comment": {"body": "A1: x"}});
        assert_eq!(
            ingest("issue_comment", &on_issue).unwrap(),
            Some(IssueEvent::comment_changed(8, "created"))
        );

        let on_pr = json!({
            "action": "created",
            "issue": {"number": 9, "pull_request": {"url": "https://example.invalid"}},
        });
        assert!(ingest("issue_comment", &on_pr).unwrap().is_none());
    }

    #[test]
    fn test_pull_request_closed() {
        let payload = json!({
            "action": "closed",
            "number": 77,
            "pull_request": {
                "number": 77,
                "merged": true,
                "body": "Closes #123",
                "head": {"ref": "agent/123-add-cache"}
            }
        });
        let event = ingest("pull_request", &payload).unwrap().unwrap();
        assert_eq!(event.issue, None);
        let IssueEventKind::PullRequestClosed { pull_request } = event.kind else {
            panic!("expected a pull request event");
        };
        assert!(pull_request.merged);
        assert_eq!(pull_request.head_branch, "agent/123-add-cache");
        assert_eq!(pull_request.body, "Closes #123");
    }

    #[test]
    fn test_pull_request_with_null_body() {
        let payload = json!({
            "action": "closed",
            "pull_request": {"number": 1, "merged": false, "body": null, "head": {"ref": "x"}}
        });
        let event = ingest("pull_request", &payload).unwrap().unwrap();
        let IssueEventKind::PullRequestClosed { pull_request } = event.kind else {
            panic!("expected a pull request event");
        };
        assert!(pull_request.body.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let err = ingest("issues", &json!({"action": "opened"})).unwrap_err();
        assert!(matches!(err, IngestError::InvalidPayload { .. }));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        assert!(ingest("push", &json!({})).unwrap().is_none());
    }
}
