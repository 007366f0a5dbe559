//! Label vocabulary shared with the tracker and the autoscaler.

/// Issue has clarifying questions without answers.
pub const WAITING_ANSWERS: &str = "waiting:answers";
/// Issue is ready for an agent.
pub const READY_WORK: &str = "ready:work";
/// An agent is working on the issue.
pub const IN_PROGRESS: &str = "status:in-progress";
/// A merged pull request completed the issue.
pub const COMPLETED: &str = "status:completed";

/// All lifecycle labels. At most one should be present at a time.
pub const STATE_LABELS: [&str; 4] = [WAITING_ANSWERS, READY_WORK, IN_PROGRESS, COMPLETED];

pub const PRIORITY_CRITICAL: &str = "priority:critical";
pub const PRIORITY_HIGH: &str = "priority:high";
pub const PRIORITY_MEDIUM: &str = "priority:medium";

/// Prefix of labels that pick the agent type directly (`agent:docs`).
pub const AGENT_TYPE_PREFIX: &str = "agent:";

pub fn is_state_label(label: &str) -> bool {
    STATE_LABELS.contains(&label)
}
