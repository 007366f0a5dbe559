//! Spawn Coordinator — at most one trigger per (issue, generation).

use tracing::{debug, info};

use super::ledger::{CheckAndSet, SharedLedger, SpawnRecord};
use super::trigger::{classify_agent_type, SpawnTrigger, TriggerState};
use crate::error::LedgerResult;
use crate::issue::{IssueId, IssueSnapshot};
use crate::readiness::ReadinessReport;
use crate::scheduler::PriorityClass;

/// Everything the coordinator needs for one spawn attempt.
#[derive(Debug, Clone, Copy)]
pub struct SpawnContext<'a> {
    pub issue: &'a IssueSnapshot,
    pub readiness: &'a ReadinessReport,
    /// The issue entered `ReadyWork` from outside the ready epoch.
    pub fresh: bool,
    /// Generation read from the ledger before the issue was fetched.
    pub observed_generation: Option<u64>,
}

/// Result of [`SpawnCoordinator::try_spawn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// Record persisted; the trigger must now be emitted.
    Spawned(SpawnTrigger),
    /// A spawn for this generation already happened. Expected, not an error.
    Suppressed {
        generation: u64,
        existing: SpawnRecord,
    },
}

impl SpawnOutcome {
    pub fn spawned(&self) -> bool {
        matches!(self, Self::Spawned(_))
    }
}

/// The generation a spawn attempt belongs to.
///
/// A fresh readiness transition opens the next generation; otherwise the
/// attempt belongs to the last recorded one (or the first, if none).
pub fn target_generation(observed: Option<u64>, fresh: bool) -> u64 {
    let last = observed.unwrap_or(0);
    if fresh {
        last + 1
    } else {
        last.max(1)
    }
}

pub struct SpawnCoordinator {
    ledger: SharedLedger,
    issue_code_prefix: String,
    default_agent_type: String,
}

impl SpawnCoordinator {
    pub fn new(
        ledger: SharedLedger,
        issue_code_prefix: impl Into<String>,
        default_agent_type: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            issue_code_prefix: issue_code_prefix.into(),
            default_agent_type: default_agent_type.into(),
        }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Last recorded generation for the issue. Read this *before* fetching
    /// the issue so a concurrent spawn is seen either here or in the labels.
    pub fn observe(&self, issue: IssueId) -> LedgerResult<Option<u64>> {
        Ok(self.ledger.get(issue)?.map(|r| r.generation))
    }

    /// Persist a spawn record and return the trigger to emit, or report a
    /// suppressed duplicate.
    pub fn try_spawn(&self, ctx: &SpawnContext<'_>) -> LedgerResult<SpawnOutcome> {
        let generation = target_generation(ctx.observed_generation, ctx.fresh);
        let record = SpawnRecord::new(generation);

        match self.ledger.check_and_set(ctx.issue.id, record.clone())? {
            CheckAndSet::Stored => {
                info!(
                    issue = ctx.issue.id,
                    generation,
                    spawn_id = %record.spawn_id,
                    "Spawn record persisted"
                );
                Ok(SpawnOutcome::Spawned(self.build_trigger(ctx, &record)))
            }
            CheckAndSet::Existing(existing) => {
                info!(
                    issue = ctx.issue.id,
                    generation,
                    existing_generation = existing.generation,
                    "Duplicate spawn suppressed"
                );
                Ok(SpawnOutcome::Suppressed {
                    generation,
                    existing,
                })
            }
        }
    }

    /// What [`try_spawn`](Self::try_spawn) would do, without writing.
    pub fn preview(&self, ctx: &SpawnContext<'_>) -> LedgerResult<SpawnOutcome> {
        let generation = target_generation(ctx.observed_generation, ctx.fresh);
        match self.ledger.get(ctx.issue.id)? {
            Some(existing) if existing.generation >= generation => {
                debug!(issue = ctx.issue.id, generation, "Preview: would suppress");
                Ok(SpawnOutcome::Suppressed {
                    generation,
                    existing,
                })
            }
            _ => Ok(SpawnOutcome::Spawned(
                self.build_trigger(ctx, &SpawnRecord::new(generation)),
            )),
        }
    }

    fn build_trigger(&self, ctx: &SpawnContext<'_>, record: &SpawnRecord) -> SpawnTrigger {
        let issue = ctx.issue;
        let agent_type = classify_agent_type(&issue.labels, &self.default_agent_type);
        SpawnTrigger {
            issue: issue.id,
            issue_code: format!("{}-{}", self.issue_code_prefix, issue.id),
            agent_type: agent_type.clone(),
            status: "ready".to_string(),
            timestamp: record.timestamp,
            state: TriggerState {
                issue: issue.id,
                generation: record.generation,
                spawn_id: record.spawn_id,
                priority: PriorityClass::from_labels(&issue.labels),
                agent_type,
                questions_total: ctx.readiness.total_questions,
                labels: issue.labels.iter().cloned().collect(),
            },
        }
    }
}
