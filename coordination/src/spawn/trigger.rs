//! Spawn trigger comment — the machine-parseable request for an agent.
//!
//! ```text
//! ORCHESTRATOR-SPAWN-AGENT
//! Issue: #42
//! Issue ID: GH-42
//! Type: feature
//! Status: ready
//! Timestamp: 2026-03-01T12:00:00Z
//! <!-- orchestrator-state: {"issue":42,"generation":1,...} -->
//! ```

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::issue::IssueId;
use crate::lifecycle::labels;
use crate::notices::SPAWN_MARKER;
use crate::scheduler::PriorityClass;

static STATE_BLOB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*orchestrator-state:\s*(\{.*\})\s*-->").expect("STATE_BLOB regex should compile")
});

/// Opaque replay/audit payload carried at the end of the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    pub issue: IssueId,
    pub generation: u64,
    pub spawn_id: Uuid,
    pub priority: PriorityClass,
    pub agent_type: String,
    pub questions_total: usize,
    pub labels: Vec<String>,
}

/// A parsed or to-be-posted spawn trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnTrigger {
    pub issue: IssueId,
    pub issue_code: String,
    pub agent_type: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub state: TriggerState,
}

impl SpawnTrigger {
    /// Render as a comment body.
    pub fn render(&self) -> String {
        // TriggerState holds only strings, integers and a uuid.
        let blob = serde_json::to_string(&self.state).unwrap_or_else(|_| "{}".to_string());
        format!(
            "{SPAWN_MARKER}\n\
             Issue: #{}\n\
             Issue ID: {}\n\
             Type: {}\n\
             Status: {}\n\
             Timestamp: {}\n\
             <!-- orchestrator-state: {blob} -->",
            self.issue,
            self.issue_code,
            self.agent_type,
            self.status,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Parse a comment body. `None` if it is not a well-formed trigger.
    pub fn parse(body: &str) -> Option<Self> {
        let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next()? != SPAWN_MARKER {
            return None;
        }

        let mut issue = None;
        let mut issue_code = None;
        let mut agent_type = None;
        let mut status = None;
        let mut timestamp = None;
        for line in lines {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Issue" => issue = value.trim_start_matches('#').parse::<IssueId>().ok(),
                "Issue ID" => issue_code = Some(value.to_string()),
                "Type" => agent_type = Some(value.to_string()),
                "Status" => status = Some(value.to_string()),
                "Timestamp" => {
                    timestamp = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|t| t.with_timezone(&Utc))
                }
                _ => {}
            }
        }

        let blob = STATE_BLOB.captures(body)?.get(1)?.as_str();
        let state: TriggerState = serde_json::from_str(blob).ok()?;

        Some(Self {
            issue: issue?,
            issue_code: issue_code?,
            agent_type: agent_type?,
            status: status?,
            timestamp: timestamp?,
            state,
        })
    }
}

/// Agent type for an issue, from `agent:<type>` or well-known labels.
pub fn classify_agent_type(issue_labels: &BTreeSet<String>, default: &str) -> String {
    if let Some(explicit) = issue_labels
        .iter()
        .find_map(|l| l.strip_prefix(labels::AGENT_TYPE_PREFIX))
        .filter(|t| !t.is_empty())
    {
        return explicit.to_string();
    }

    const KNOWN: [(&str, &str); 7] = [
        ("bug", "bugfix"),
        ("documentation", "docs"),
        ("docs", "docs"),
        ("enhancement", "feature"),
        ("feature", "feature"),
        ("test", "testing"),
        ("tests", "testing"),
    ];
    KNOWN
        .iter()
        .find(|(label, _)| issue_labels.contains(*label))
        .map(|(_, agent)| agent.to_string())
        .unwrap_or_else(|| default.to_string())
}
