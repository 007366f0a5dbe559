//! Issue states and inference from the label set.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::labels;
use crate::readiness::ReadinessReport;

/// Lifecycle state of an issue, inferred from its labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    /// No lifecycle label yet.
    Draft,
    /// Clarifying questions are still open.
    WaitingAnswers,
    /// Ready for an agent to pick up.
    ReadyWork,
    /// An agent has started.
    InProgress,
    /// A merged pull request completed the issue. Terminal.
    Completed,
}

impl IssueState {
    /// The label that marks this state. `Draft` has none.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Draft => None,
            Self::WaitingAnswers => Some(labels::WAITING_ANSWERS),
            Self::ReadyWork => Some(labels::READY_WORK),
            Self::InProgress => Some(labels::IN_PROGRESS),
            Self::Completed => Some(labels::COMPLETED),
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            labels::WAITING_ANSWERS => Some(Self::WaitingAnswers),
            labels::READY_WORK => Some(Self::ReadyWork),
            labels::IN_PROGRESS => Some(Self::InProgress),
            labels::COMPLETED => Some(Self::Completed),
            _ => None,
        }
    }

    /// States reached only after a readiness transition already happened.
    ///
    /// Entering `ReadyWork` from outside this set starts a new spawn
    /// generation.
    pub fn is_ready_epoch(self) -> bool {
        matches!(self, Self::ReadyWork | Self::InProgress | Self::Completed)
    }

    /// States that readiness re-evaluation must not move the issue out of.
    pub fn is_sticky(self) -> bool {
        matches!(self, Self::InProgress | Self::Completed)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Completed
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "Draft"),
            Self::WaitingAnswers => write!(f, "WaitingAnswers"),
            Self::ReadyWork => write!(f, "ReadyWork"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
        }
    }
}

/// Legal transitions between issue states.
///
/// ```text
/// Draft → WaitingAnswers | ReadyWork
/// WaitingAnswers → ReadyWork
/// ReadyWork → WaitingAnswers | InProgress
/// InProgress → Completed
/// ```
///
/// Staying in the same state is always legal (label repair only).
pub fn is_legal_transition(from: IssueState, to: IssueState) -> bool {
    use IssueState::*;

    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (Draft, WaitingAnswers)
            | (Draft, ReadyWork)
            | (WaitingAnswers, ReadyWork)
            // Body edited with new questions after it was ready
            | (ReadyWork, WaitingAnswers)
            | (ReadyWork, InProgress)
            | (InProgress, Completed)
    )
}

/// More than one lifecycle label was present on the issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConflict {
    /// The lifecycle labels found, in vocabulary order.
    pub present: Vec<String>,
    /// The state the engine settled on.
    pub resolved: IssueState,
}

impl fmt::Display for LabelConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conflicting labels [{}] resolved as {}",
            self.present.join(", "),
            self.resolved
        )
    }
}

/// Result of [`infer_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredState {
    pub state: IssueState,
    pub conflict: Option<LabelConflict>,
}

/// Infer the current state from the label set.
///
/// When several lifecycle labels are present the later lifecycle stage wins
/// (`Completed` over `InProgress` over the rest). For the
/// `waiting:answers` + `ready:work` pair the readiness report decides; with
/// no report the issue is treated as waiting.
pub fn infer_state(
    issue_labels: &BTreeSet<String>,
    readiness: Option<&ReadinessReport>,
) -> InferredState {
    let present: Vec<IssueState> = labels::STATE_LABELS
        .iter()
        .filter(|l| issue_labels.contains(**l))
        .filter_map(|l| IssueState::from_label(l))
        .collect();

    match present.as_slice() {
        [] => InferredState {
            state: IssueState::Draft,
            conflict: None,
        },
        [only] => InferredState {
            state: *only,
            conflict: None,
        },
        many => {
            let resolved = if many.contains(&IssueState::Completed) {
                IssueState::Completed
            } else if many.contains(&IssueState::InProgress) {
                IssueState::InProgress
            } else if readiness.is_some_and(|r| r.ready) {
                IssueState::ReadyWork
            } else {
                IssueState::WaitingAnswers
            };
            InferredState {
                state: resolved,
                conflict: Some(LabelConflict {
                    present: many
                        .iter()
                        .filter_map(|s| s.label())
                        .map(String::from)
                        .collect(),
                    resolved,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness;

    fn label_set(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_no_state_label_is_draft() {
        let inferred = infer_state(&label_set(&["bug", "priority:high"]), None);
        assert_eq!(inferred.state, IssueState::Draft);
        assert!(inferred.conflict.is_none());
    }

    #[test]
    fn test_single_label_maps_to_state() {
        for state in [
            IssueState::WaitingAnswers,
            IssueState::ReadyWork,
            IssueState::InProgress,
            IssueState::Completed,
        ] {
            let label = state.label().unwrap();
            let inferred = infer_state(&label_set(&[label]), None);
            assert_eq!(inferred.state, state);
            assert!(inferred.conflict.is_none());
        }
    }

    #[test]
    fn test_waiting_and_ready_tie_break_uses_readiness() {
        let tampered = label_set(&["waiting:answers", "ready:work"]);
        let unanswered = readiness::analyze("Clarifying Questions: 1. Which DB?", &[]);
        let answered = readiness::analyze("Clarifying Questions: 1. Which DB?", &["A1: pg"]);

        let inferred = infer_state(&tampered, Some(&unanswered));
        assert_eq!(inferred.state, IssueState::WaitingAnswers);
        assert!(inferred.conflict.is_some());

        let inferred = infer_state(&tampered, Some(&answered));
        assert_eq!(inferred.state, IssueState::ReadyWork);
        let conflict = inferred.conflict.unwrap();
        assert_eq!(conflict.present, vec!["waiting:answers", "ready:work"]);
        assert_eq!(conflict.resolved, IssueState::ReadyWork);
    }

    #[test]
    fn test_later_stage_wins_conflicts() {
        let inferred = infer_state(&label_set(&["ready:work", "status:in-progress"]), None);
        assert_eq!(inferred.state, IssueState::InProgress);

        let inferred = infer_state(
            &label_set(&["status:in-progress", "status:completed", "waiting:answers"]),
            None,
        );
        assert_eq!(inferred.state, IssueState::Completed);
    }

    #[test]
    fn test_legal_transitions() {
        use IssueState::*;
        assert!(is_legal_transition(Draft, WaitingAnswers));
        assert!(is_legal_transition(WaitingAnswers, ReadyWork));
        assert!(is_legal_transition(ReadyWork, InProgress));
        assert!(is_legal_transition(InProgress, Completed));
        assert!(is_legal_transition(ReadyWork, ReadyWork));

        assert!(!is_legal_transition(Completed, ReadyWork));
        assert!(!is_legal_transition(WaitingAnswers, Completed));
        assert!(!is_legal_transition(InProgress, ReadyWork));
    }

    #[test]
    fn test_ready_epoch() {
        assert!(!IssueState::Draft.is_ready_epoch());
        assert!(!IssueState::WaitingAnswers.is_ready_epoch());
        assert!(IssueState::ReadyWork.is_ready_epoch());
        assert!(IssueState::Completed.is_terminal());
    }
}
