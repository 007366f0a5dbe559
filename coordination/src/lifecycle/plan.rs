//! Transition planning — what must change on the tracker for one event.

use serde::{Deserialize, Serialize};

use super::labels;
use super::state::{infer_state, is_legal_transition, IssueState, LabelConflict};
use crate::issue::{IssueId, IssueSnapshot};
use crate::notices;
use crate::readiness::ReadinessReport;

/// Why the engine is looking at the issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Issue opened/edited/(un)labeled or a comment created/edited.
    Evaluate { via_comment: bool },
    /// An agent signalled that it began work.
    WorkStarted,
    /// A merged pull request completed the issue.
    Completed { pr_number: u64 },
}

/// The mutations one event needs.
///
/// `remove` is applied before `add` so an interrupted pair leaves the issue
/// with no lifecycle label, which the next event repairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub issue: IssueId,
    pub from: IssueState,
    pub to: IssueState,
    pub remove: Vec<String>,
    pub add: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub close: bool,
    /// Ask the spawn coordinator for an agent.
    pub spawn: bool,
    /// The readiness transition starts a new spawn generation.
    pub fresh_readiness: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<LabelConflict>,
    pub reason: String,
}

impl TransitionPlan {
    fn unchanged(issue: IssueId, state: IssueState, reason: impl Into<String>) -> Self {
        Self {
            issue,
            from: state,
            to: state,
            remove: Vec::new(),
            add: Vec::new(),
            comment: None,
            close: false,
            spawn: false,
            fresh_readiness: false,
            conflict: None,
            reason: reason.into(),
        }
    }

    /// Whether applying the plan would call the write surface.
    pub fn is_noop(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty() && self.comment.is_none() && !self.close
    }

    pub fn changes_labels(&self) -> bool {
        !self.remove.is_empty() || !self.add.is_empty()
    }

    /// Whether the state change follows the transition table.
    pub fn is_legal(&self) -> bool {
        is_legal_transition(self.from, self.to)
    }

    /// Human-readable rendering for dry-run output.
    pub fn describe(&self) -> String {
        let mut lines = vec![format!(
            "#{}: {} -> {} ({})",
            self.issue, self.from, self.to, self.reason
        )];
        if let Some(conflict) = &self.conflict {
            lines.push(format!("  repair: {conflict}"));
        }
        for label in &self.remove {
            lines.push(format!("  - remove label `{label}`"));
        }
        for label in &self.add {
            lines.push(format!("  + add label `{label}`"));
        }
        if let Some(comment) = &self.comment {
            let first = comment.lines().next().unwrap_or("");
            lines.push(format!("  comment: {first}"));
        }
        if self.close {
            lines.push("  close issue".to_string());
        }
        if self.spawn {
            lines.push(format!(
                "  spawn agent ({} readiness)",
                if self.fresh_readiness { "new" } else { "existing" }
            ));
        }
        if self.is_noop() && !self.spawn {
            lines.push("  no mutation".to_string());
        }
        lines.join("\n")
    }
}

/// Plan the mutations for `issue` given its readiness and the trigger.
pub fn plan_transition(
    issue: &IssueSnapshot,
    readiness: &ReadinessReport,
    trigger: Trigger,
) -> TransitionPlan {
    let inferred = infer_state(&issue.labels, Some(readiness));
    let from = inferred.state;

    let mut plan = match trigger {
        Trigger::Evaluate { via_comment } => plan_evaluate(issue, readiness, from, via_comment),
        Trigger::WorkStarted => plan_work_started(issue, from),
        Trigger::Completed { pr_number } => plan_completed(issue, from, pr_number),
    };
    plan.conflict = inferred.conflict;
    plan
}

fn plan_evaluate(
    issue: &IssueSnapshot,
    readiness: &ReadinessReport,
    from: IssueState,
    via_comment: bool,
) -> TransitionPlan {
    if !issue.is_open() {
        return TransitionPlan::unchanged(issue.id, from, "issue is closed");
    }

    let (to, reason) = if from.is_sticky() {
        (from, format!("{from} is not re-evaluated"))
    } else if readiness.ready {
        (IssueState::ReadyWork, readiness.summary())
    } else {
        (IssueState::WaitingAnswers, readiness.summary())
    };

    let (remove, add) = label_diff(issue, to);
    let resumed = via_comment && from == IssueState::WaitingAnswers && to == IssueState::ReadyWork;
    let comment = (resumed && !add.is_empty())
        .then(|| notices::resumed_comment(issue.id, readiness.total_questions));

    TransitionPlan {
        issue: issue.id,
        from,
        to,
        remove,
        add,
        comment,
        close: false,
        spawn: to == IssueState::ReadyWork,
        fresh_readiness: to == IssueState::ReadyWork && !from.is_ready_epoch(),
        conflict: None,
        reason,
    }
}

fn plan_work_started(issue: &IssueSnapshot, from: IssueState) -> TransitionPlan {
    if !issue.is_open() {
        return TransitionPlan::unchanged(issue.id, from, "issue is closed");
    }
    if from.is_terminal() {
        return TransitionPlan::unchanged(issue.id, from, "issue already completed");
    }

    let to = IssueState::InProgress;
    let (remove, add) = label_diff(issue, to);
    TransitionPlan {
        issue: issue.id,
        from,
        to,
        remove,
        add,
        comment: None,
        close: false,
        spawn: false,
        fresh_readiness: false,
        conflict: None,
        reason: "agent started work".to_string(),
    }
}

fn plan_completed(issue: &IssueSnapshot, from: IssueState, pr_number: u64) -> TransitionPlan {
    let to = IssueState::Completed;
    let (remove, add) = label_diff(issue, to);
    let comment = (!add.is_empty()).then(|| notices::completed_comment(issue.id, pr_number));

    TransitionPlan {
        issue: issue.id,
        from,
        to,
        remove,
        add,
        comment,
        close: issue.is_open(),
        spawn: false,
        fresh_readiness: false,
        conflict: None,
        reason: format!("merged #{pr_number}"),
    }
}

/// Labels to remove and add so that exactly `to`'s label is present.
fn label_diff(issue: &IssueSnapshot, to: IssueState) -> (Vec<String>, Vec<String>) {
    let target = to.label();
    let remove = labels::STATE_LABELS
        .iter()
        .filter(|l| Some(**l) != target && issue.has_label(l))
        .map(|l| l.to_string())
        .collect();
    let add = target
        .filter(|l| !issue.has_label(l))
        .map(|l| vec![l.to_string()])
        .unwrap_or_default();
    (remove, add)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::issue::{IssueComment, IssueStatus};
    use crate::readiness::analyze_issue;

    const QUESTIONS: &str = "Clarifying Questions: 1. Which DB? 2. Which region?";

    fn issue(labels: &[&str], comments: &[&str]) -> IssueSnapshot {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        IssueSnapshot {
            id: 42,
            title: "Provision storage".into(),
            body: QUESTIONS.into(),
            comments: comments
                .iter()
                .enumerate()
                .map(|(i, b)| IssueComment::new(*b, created + chrono::Duration::minutes(i as i64)))
                .collect(),
            labels: labels.iter().map(|l| l.to_string()).collect::<BTreeSet<_>>(),
            created_at: created,
            status: IssueStatus::Open,
        }
    }

    fn evaluate(issue: &IssueSnapshot, via_comment: bool) -> TransitionPlan {
        plan_transition(issue, &analyze_issue(issue), Trigger::Evaluate { via_comment })
    }

    /// Apply a plan's label changes locally, like the tracker would.
    fn apply(issue: &mut IssueSnapshot, plan: &TransitionPlan) {
        for l in &plan.remove {
            issue.labels.remove(l);
        }
        for l in &plan.add {
            issue.labels.insert(l.clone());
        }
        if let Some(c) = &plan.comment {
            let at = Utc::now();
            issue.comments.push(IssueComment::new(c.clone(), at));
        }
        if plan.close {
            issue.status = IssueStatus::Closed;
        }
    }

    #[test]
    fn test_unanswered_draft_goes_to_waiting() {
        let plan = evaluate(&issue(&[], &[]), false);
        assert_eq!(plan.from, IssueState::Draft);
        assert_eq!(plan.to, IssueState::WaitingAnswers);
        assert_eq!(plan.add, vec!["waiting:answers"]);
        assert!(plan.remove.is_empty());
        assert!(!plan.spawn);
        assert!(plan.comment.is_none());
    }

    #[test]
    fn test_answered_comment_resumes_waiting_issue() {
        let issue = issue(&["waiting:answers"], &["A1: Postgres", "Answer 2: us-west"]);
        let plan = evaluate(&issue, true);
        assert_eq!(plan.to, IssueState::ReadyWork);
        assert_eq!(plan.remove, vec!["waiting:answers"]);
        assert_eq!(plan.add, vec!["ready:work"]);
        assert!(plan.spawn);
        assert!(plan.fresh_readiness);
        assert!(plan
            .comment
            .as_deref()
            .unwrap()
            .starts_with(notices::RESUMED_MARKER));
        assert!(plan.is_legal());
    }

    #[test]
    fn test_partial_answers_leave_waiting_untouched() {
        let plan = evaluate(&issue(&["waiting:answers"], &["A1: Postgres"]), true);
        assert_eq!(plan.to, IssueState::WaitingAnswers);
        assert!(plan.is_noop());
        assert!(!plan.spawn);
    }

    #[test]
    fn test_second_evaluation_is_noop() {
        let mut issue = issue(&["waiting:answers"], &["A1: pg", "A2: eu"]);
        let first = evaluate(&issue, true);
        apply(&mut issue, &first);

        let second = evaluate(&issue, true);
        assert!(second.is_noop(), "{}", second.describe());
        assert_eq!(second.from, IssueState::ReadyWork);
        assert!(second.spawn);
        assert!(!second.fresh_readiness);
    }

    #[test]
    fn test_edit_that_adds_questions_reverts_ready() {
        let mut issue = issue(&["ready:work"], &["A1: pg", "A2: eu"]);
        issue.body = format!("{QUESTIONS} 3. Which backup policy?");
        let plan = evaluate(&issue, false);
        assert_eq!(plan.to, IssueState::WaitingAnswers);
        assert_eq!(plan.remove, vec!["ready:work"]);
        assert!(plan.is_legal());
    }

    #[test]
    fn test_in_progress_is_sticky_on_edit() {
        let plan = evaluate(&issue(&["status:in-progress"], &[]), false);
        assert_eq!(plan.to, IssueState::InProgress);
        assert!(plan.is_noop());
        assert!(!plan.spawn);
    }

    #[test]
    fn test_conflicting_labels_are_repaired() {
        let plan = evaluate(
            &issue(&["waiting:answers", "ready:work"], &["A1: pg", "A2: eu"]),
            false,
        );
        assert_eq!(plan.to, IssueState::ReadyWork);
        assert_eq!(plan.remove, vec!["waiting:answers"]);
        assert!(plan.add.is_empty());
        assert!(plan.conflict.is_some());
        assert!(!plan.fresh_readiness);
    }

    #[test]
    fn test_closed_issue_is_ignored() {
        let mut closed = issue(&[], &[]);
        closed.status = IssueStatus::Closed;
        let plan = evaluate(&closed, false);
        assert!(plan.is_noop());
        assert!(!plan.spawn);
    }

    #[test]
    fn test_work_started_moves_ready_to_in_progress() {
        let issue = issue(&["ready:work"], &[]);
        let plan = plan_transition(&issue, &analyze_issue(&issue), Trigger::WorkStarted);
        assert_eq!(plan.from, IssueState::ReadyWork);
        assert_eq!(plan.to, IssueState::InProgress);
        assert_eq!(plan.remove, vec!["ready:work"]);
        assert_eq!(plan.add, vec!["status:in-progress"]);
    }

    #[test]
    fn test_work_started_after_completion_is_ignored() {
        let issue = issue(&["status:completed"], &[]);
        let plan = plan_transition(&issue, &analyze_issue(&issue), Trigger::WorkStarted);
        assert_eq!(plan.to, IssueState::Completed);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_completion_closes_and_comments_once() {
        let mut issue = issue(&["status:in-progress"], &[]);
        let report = analyze_issue(&issue);
        let plan = plan_transition(&issue, &report, Trigger::Completed { pr_number: 7 });
        assert_eq!(plan.to, IssueState::Completed);
        assert_eq!(plan.remove, vec!["status:in-progress"]);
        assert_eq!(plan.add, vec!["status:completed"]);
        assert!(plan.close);
        assert!(plan.comment.is_some());

        apply(&mut issue, &plan);
        let again = plan_transition(&issue, &report, Trigger::Completed { pr_number: 7 });
        assert!(again.is_noop());
    }

    #[test]
    fn test_completion_of_auto_closed_issue_still_labels() {
        let mut issue = issue(&["status:in-progress"], &[]);
        issue.status = IssueStatus::Closed;
        let plan = plan_transition(
            &issue,
            &analyze_issue(&issue),
            Trigger::Completed { pr_number: 7 },
        );
        assert_eq!(plan.add, vec!["status:completed"]);
        assert!(!plan.close);
    }

    #[test]
    fn test_describe_mentions_mutations() {
        let plan = evaluate(&issue(&[], &[]), false);
        let text = plan.describe();
        assert!(text.contains("Draft -> WaitingAnswers"));
        assert!(text.contains("+ add label `waiting:answers`"));
    }
}
