//! Orchestrator facade: one entry point per normalized event.
//!
//! For every event the dispatcher takes the issue's lock, reads the spawn
//! ledger, fetches a fresh snapshot, plans the transition, and applies it:
//!
//! 1. remove stale lifecycle labels, then add the target label
//! 2. read the labels back and verify
//! 3. post the plan's comment, close the issue if asked
//! 4. if the issue is ready, persist a spawn record and post the trigger
//!
//! Step 4 runs after the labels are verified so a concurrent worker that
//! sees the new ledger generation is guaranteed to also see the new labels.

use std::fmt::Write as _;
use std::sync::Arc;

use coordination::lifecycle::{plan_transition, IssueState, TransitionPlan, Trigger};
use coordination::spawn::{SharedLedger, SpawnContext, SpawnCoordinator, SpawnOutcome, SpawnTrigger};
use coordination::{
    analyze_issue, infer_state, ingest, linking, notices, scheduler, IssueEvent, IssueEventKind,
    IssueId, IssueSnapshot, IssueStatus, LedgerResult, PullRequestInfo, ReadinessReport,
};
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::locks::IssueLocks;
use crate::retry::{with_retry, RetryPolicy};
use crate::tracker::IssueTracker;

/// Result of handling one issue.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub plan: TransitionPlan,
    /// `None` when the plan did not ask for an agent.
    pub spawn: Option<SpawnOutcome>,
    pub dry_run: bool,
}

impl IssueOutcome {
    pub fn issue(&self) -> IssueId {
        self.plan.issue
    }

    pub fn spawned(&self) -> bool {
        self.spawn.as_ref().is_some_and(SpawnOutcome::spawned)
    }

    pub fn describe(&self) -> String {
        let mut out = self.plan.describe();
        if let Some(spawn) = &self.spawn {
            out.push('\n');
            out.push_str(&describe_spawn(spawn, self.dry_run));
        }
        out
    }
}

fn describe_spawn(spawn: &SpawnOutcome, dry_run: bool) -> String {
    match spawn {
        SpawnOutcome::Spawned(trigger) => format!(
            "  {} {} agent for #{} (generation {})",
            if dry_run { "would spawn" } else { "spawned" },
            trigger.agent_type,
            trigger.issue,
            trigger.state.generation
        ),
        SpawnOutcome::Suppressed {
            generation,
            existing,
        } => format!(
            "  spawn suppressed: generation {generation} already recorded at {} (stored {})",
            existing.timestamp.to_rfc3339(),
            existing.generation
        ),
    }
}

/// Spawn attempted for the issue the scheduler picked after a completion.
#[derive(Debug, Clone)]
pub struct ScheduledSpawn {
    pub issue: IssueId,
    pub outcome: SpawnOutcome,
}

/// Result of a merged pull request.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub pull_request: u64,
    pub issue: IssueId,
    /// `ReadyWork` issues pass through `InProgress`, so there may be two steps.
    pub steps: Vec<IssueOutcome>,
    pub next: Option<ScheduledSpawn>,
    pub dry_run: bool,
}

impl CompletionOutcome {
    pub fn describe(&self) -> String {
        let mut out = format!("PR #{} completes #{}", self.pull_request, self.issue);
        for step in &self.steps {
            let _ = write!(out, "\n{}", step.describe());
        }
        match &self.next {
            Some(next) => {
                let _ = write!(
                    out,
                    "\nnext: #{}\n{}",
                    next.issue,
                    describe_spawn(&next.outcome, self.dry_run)
                );
            }
            None => out.push_str("\nnext: none (idle)"),
        }
        out
    }
}

/// What handling an event did.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Ignored { reason: String },
    Issue(IssueOutcome),
    Completion(CompletionOutcome),
}

impl EventOutcome {
    pub fn describe(&self) -> String {
        match self {
            Self::Ignored { reason } => format!("ignored: {reason}"),
            Self::Issue(outcome) => outcome.describe(),
            Self::Completion(outcome) => outcome.describe(),
        }
    }
}

/// Apply a plan's label and status changes to a copy of the snapshot.
fn project(snapshot: &IssueSnapshot, plan: &TransitionPlan) -> IssueSnapshot {
    let mut next = snapshot.clone();
    for label in &plan.remove {
        next.labels.remove(label);
    }
    for label in &plan.add {
        next.labels.insert(label.clone());
    }
    if plan.close {
        next.status = IssueStatus::Closed;
    }
    next
}

pub struct Dispatcher {
    tracker: Arc<dyn IssueTracker>,
    coordinator: Arc<SpawnCoordinator>,
    locks: IssueLocks,
    retry: RetryPolicy,
    dry_run: bool,
    report_link_errors: bool,
}

impl Dispatcher {
    pub fn new(tracker: Arc<dyn IssueTracker>, ledger: SharedLedger, config: &DispatchConfig) -> Self {
        Self {
            tracker,
            coordinator: Arc::new(SpawnCoordinator::new(
                ledger,
                config.issue_code_prefix.clone(),
                config.default_agent_type.clone(),
            )),
            locks: IssueLocks::new(),
            retry: RetryPolicy::from_config(config),
            dry_run: config.dry_run,
            report_link_errors: config.report_link_errors,
        }
    }

    // ========================================================================
    // Event entry points
    // ========================================================================

    /// Normalize a raw webhook delivery and handle it.
    pub async fn handle_payload(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
    ) -> DispatchResult<EventOutcome> {
        match ingest(event_name, payload)? {
            Some(event) => self.handle_event(&event).await,
            None => Ok(EventOutcome::Ignored {
                reason: format!("`{event_name}` delivery needs no action"),
            }),
        }
    }

    pub async fn handle_event(&self, event: &IssueEvent) -> DispatchResult<EventOutcome> {
        debug!(event = event.label(), issue = ?event.issue, "Handling event");
        match (&event.kind, event.issue) {
            (IssueEventKind::IssueChanged { .. }, Some(issue)) => {
                self.evaluate(issue, false).await.map(EventOutcome::Issue)
            }
            (IssueEventKind::CommentChanged { .. }, Some(issue)) => {
                self.evaluate(issue, true).await.map(EventOutcome::Issue)
            }
            (IssueEventKind::WorkStarted, Some(issue)) => {
                self.work_started(issue).await.map(EventOutcome::Issue)
            }
            (IssueEventKind::PullRequestClosed { pull_request }, _) => {
                if !pull_request.merged {
                    debug!(pr = pull_request.number, "Pull request closed without merge");
                    return Ok(EventOutcome::Ignored {
                        reason: format!("PR #{} closed without merge", pull_request.number),
                    });
                }
                self.complete(pull_request)
                    .await
                    .map(EventOutcome::Completion)
            }
            (_, None) => Ok(EventOutcome::Ignored {
                reason: format!("{} event without an issue", event.label()),
            }),
        }
    }

    /// Re-run readiness analysis and reconcile labels.
    ///
    /// `via_comment` marks a comment event: only those post the "resumed"
    /// notice when the last answer arrives.
    pub async fn evaluate(&self, issue: IssueId, via_comment: bool) -> DispatchResult<IssueOutcome> {
        let _guard = self.locks.lock(issue).await;
        let observed = self.observe(issue).await?;
        let snapshot = self.fetch(issue).await?;
        let report = self.analyze(&snapshot);
        let plan = plan_transition(&snapshot, &report, Trigger::Evaluate { via_comment });
        self.run_plan(&snapshot, &report, plan, observed).await
    }

    /// An agent started work on the issue.
    pub async fn work_started(&self, issue: IssueId) -> DispatchResult<IssueOutcome> {
        let _guard = self.locks.lock(issue).await;
        let snapshot = self.fetch(issue).await?;
        let report = self.analyze(&snapshot);
        let plan = plan_transition(&snapshot, &report, Trigger::WorkStarted);
        self.run_plan(&snapshot, &report, plan, None).await
    }

    /// Completion handler for a merged pull request.
    pub async fn complete(&self, pr: &PullRequestInfo) -> DispatchResult<CompletionOutcome> {
        let issue = match linking::resolve_issue(pr) {
            Ok(issue) => issue,
            Err(err) => {
                error!(pr = pr.number, branch = %pr.head_branch, "{err}");
                self.report_link_error(pr).await;
                return Err(err.into());
            }
        };
        info!(pr = pr.number, issue, "Pull request merged");

        let steps = {
            let _guard = self.locks.lock(issue).await;
            let mut snapshot = self.fetch(issue).await?;
            let report = self.analyze(&snapshot);
            let mut steps = Vec::new();

            let from = infer_state(&snapshot.labels, Some(&report)).state;
            if snapshot.is_open() && from == IssueState::ReadyWork {
                let plan = plan_transition(&snapshot, &report, Trigger::WorkStarted);
                let outcome = self.run_plan(&snapshot, &report, plan, None).await?;
                snapshot = project(&snapshot, &outcome.plan);
                steps.push(outcome);
            }

            let plan = plan_transition(
                &snapshot,
                &report,
                Trigger::Completed {
                    pr_number: pr.number,
                },
            );
            steps.push(self.run_plan(&snapshot, &report, plan, None).await?);
            steps
        };

        let next = self.schedule_next(issue).await?;
        Ok(CompletionOutcome {
            pull_request: pr.number,
            issue,
            steps,
            next,
            dry_run: self.dry_run,
        })
    }

    /// Fetch a pull request and run the completion handler on it.
    pub async fn complete_pull_request(&self, number: u64) -> DispatchResult<EventOutcome> {
        let tracker = &self.tracker;
        let pr = with_retry(&self.retry, "fetch pull request", move || {
            tracker.fetch_pull_request(number)
        })
        .await?;
        self.handle_event(&IssueEvent::pull_request_closed(pr)).await
    }

    // ========================================================================
    // Read-only queries
    // ========================================================================

    /// Snapshot and readiness report, without planning or writing.
    pub async fn inspect(&self, issue: IssueId) -> DispatchResult<(IssueSnapshot, ReadinessReport)> {
        let snapshot = self.fetch(issue).await?;
        let report = self.analyze(&snapshot);
        Ok((snapshot, report))
    }

    /// Spawn triggers posted on the issue, oldest first.
    pub async fn triggers(&self, issue: IssueId) -> DispatchResult<Vec<SpawnTrigger>> {
        let snapshot = self.fetch(issue).await?;
        Ok(snapshot
            .comments_chronological()
            .into_iter()
            .filter_map(|c| SpawnTrigger::parse(&c.body))
            .collect())
    }

    pub async fn open_issues(&self) -> DispatchResult<Vec<IssueSnapshot>> {
        let tracker = &self.tracker;
        with_retry(&self.retry, "list open issues", move || tracker.list_open_issues()).await
    }

    /// The issue the scheduler would hand to the next free agent.
    pub async fn next_issue(&self) -> DispatchResult<Option<IssueSnapshot>> {
        let candidates = self.candidates(None).await?;
        Ok(scheduler::select_next(&candidates).cloned())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Run a ledger operation on the blocking pool. The file ledger takes an
    /// exclusive file lock and does synchronous IO.
    async fn ledger_task<T, F>(&self, op: F) -> DispatchResult<T>
    where
        F: FnOnce(&SpawnCoordinator) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        let result = tokio::task::spawn_blocking(move || op(&coordinator)).await?;
        Ok(result?)
    }

    async fn observe(&self, issue: IssueId) -> DispatchResult<Option<u64>> {
        self.ledger_task(move |coordinator| coordinator.observe(issue)).await
    }

    /// Open issues the scheduler may hand out. Issues whose current
    /// generation already has an agent are left out.
    async fn candidates(&self, exclude: Option<IssueId>) -> DispatchResult<Vec<IssueSnapshot>> {
        let mut candidates = Vec::new();
        for issue in self.open_issues().await? {
            if Some(issue.id) == exclude {
                continue;
            }
            if let Some(generation) = self.observe(issue.id).await? {
                debug!(issue = issue.id, generation, "Already spawned; not a scheduling candidate");
                continue;
            }
            candidates.push(issue);
        }
        Ok(candidates)
    }

    async fn fetch(&self, issue: IssueId) -> DispatchResult<IssueSnapshot> {
        let tracker = &self.tracker;
        with_retry(&self.retry, "fetch issue", move || tracker.fetch_issue(issue)).await
    }

    fn analyze(&self, snapshot: &IssueSnapshot) -> ReadinessReport {
        let report = analyze_issue(snapshot);
        if let Some(malformed) = &report.malformed {
            warn!(
                issue = snapshot.id,
                reason = %malformed,
                "Malformed clarifying questions; treating as not ready"
            );
        }
        report
    }

    async fn run_plan(
        &self,
        snapshot: &IssueSnapshot,
        report: &ReadinessReport,
        plan: TransitionPlan,
        observed: Option<u64>,
    ) -> DispatchResult<IssueOutcome> {
        if let Some(conflict) = &plan.conflict {
            warn!(issue = plan.issue, "Label conflict: {conflict}");
        }
        if !plan.is_legal() {
            warn!(
                issue = plan.issue,
                from = %plan.from,
                to = %plan.to,
                "Transition outside the lifecycle table"
            );
        }

        if plan.is_noop() {
            debug!(issue = plan.issue, state = %plan.to, reason = %plan.reason, "No mutation needed");
        } else if self.dry_run {
            info!(issue = plan.issue, from = %plan.from, to = %plan.to, "Dry run: mutation planned");
        } else {
            self.apply(&plan).await?;
            info!(
                issue = plan.issue,
                from = %plan.from,
                to = %plan.to,
                reason = %plan.reason,
                "Transition applied"
            );
        }

        let spawn = if plan.spawn {
            let after = project(snapshot, &plan);
            let ctx = SpawnContext {
                issue: &after,
                readiness: report,
                fresh: plan.fresh_readiness,
                observed_generation: observed,
            };
            Some(self.spawn(&ctx).await?)
        } else {
            None
        };

        Ok(IssueOutcome {
            plan,
            spawn,
            dry_run: self.dry_run,
        })
    }

    /// Persist a spawn record, then post the trigger.
    async fn spawn(&self, ctx: &SpawnContext<'_>) -> DispatchResult<SpawnOutcome> {
        let issue = ctx.issue.clone();
        let readiness = ctx.readiness.clone();
        let (fresh, observed_generation) = (ctx.fresh, ctx.observed_generation);
        let dry_run = self.dry_run;
        let outcome = self
            .ledger_task(move |coordinator| {
                let ctx = SpawnContext {
                    issue: &issue,
                    readiness: &readiness,
                    fresh,
                    observed_generation,
                };
                if dry_run {
                    coordinator.preview(&ctx)
                } else {
                    coordinator.try_spawn(&ctx)
                }
            })
            .await?;
        if dry_run {
            return Ok(outcome);
        }

        if let SpawnOutcome::Spawned(trigger) = &outcome {
            let body = trigger.render();
            if let Err(err) = self.post_comment(trigger.issue, &body).await {
                error!(
                    issue = trigger.issue,
                    spawn_id = %trigger.state.spawn_id,
                    error = %err,
                    "Spawn recorded but trigger not delivered"
                );
                return Err(err);
            }
            info!(
                issue = trigger.issue,
                agent_type = %trigger.agent_type,
                generation = trigger.state.generation,
                "Spawn trigger posted"
            );
        }
        Ok(outcome)
    }

    /// Remove, add, verify, comment, close. Stops at the first failure.
    async fn apply(&self, plan: &TransitionPlan) -> DispatchResult<()> {
        let tracker = &self.tracker;
        let issue = plan.issue;

        for label in &plan.remove {
            with_retry(&self.retry, "remove label", move || {
                tracker.remove_label(issue, label)
            })
            .await?;
        }
        for label in &plan.add {
            with_retry(&self.retry, "add label", move || tracker.add_label(issue, label)).await?;
        }
        if plan.changes_labels() {
            self.verify(plan).await?;
        }

        if let Some(comment) = &plan.comment {
            self.post_comment(issue, comment).await?;
        }
        if plan.close {
            with_retry(&self.retry, "close issue", move || tracker.close_issue(issue)).await?;
        }
        Ok(())
    }

    /// Read the labels back and check they match the plan.
    async fn verify(&self, plan: &TransitionPlan) -> DispatchResult<()> {
        let current = self.fetch(plan.issue).await?;
        let missing: Vec<String> = plan
            .add
            .iter()
            .filter(|l| !current.has_label(l))
            .cloned()
            .collect();
        let stale: Vec<String> = plan
            .remove
            .iter()
            .filter(|l| current.has_label(l))
            .cloned()
            .collect();

        if missing.is_empty() && stale.is_empty() {
            return Ok(());
        }
        error!(issue = plan.issue, ?missing, ?stale, "Label verification failed");
        Err(DispatchError::LabelVerification {
            issue: plan.issue,
            missing,
            stale,
        })
    }

    async fn post_comment(&self, issue: IssueId, body: &str) -> DispatchResult<()> {
        let tracker = &self.tracker;
        with_retry(&self.retry, "post comment", move || {
            tracker.post_comment(issue, body)
        })
        .await
    }

    async fn report_link_error(&self, pr: &PullRequestInfo) {
        if !self.report_link_errors || self.dry_run {
            return;
        }
        let body = notices::link_error_comment(pr.number, &pr.head_branch);
        if let Err(err) = self.post_comment(pr.number, &body).await {
            warn!(pr = pr.number, error = %err, "Failed to report link error on pull request");
        }
    }

    /// After a completion, offer the highest-priority ready issue an agent.
    async fn schedule_next(&self, completed: IssueId) -> DispatchResult<Option<ScheduledSpawn>> {
        let candidates = self.candidates(Some(completed)).await?;

        let Some(picked) = scheduler::select_next(&candidates) else {
            info!("No ready work; idle");
            return Ok(None);
        };
        let issue = picked.id;

        let _guard = self.locks.lock(issue).await;
        let observed = self.observe(issue).await?;
        let snapshot = self.fetch(issue).await?;
        if !scheduler::is_ready_work(&snapshot) {
            info!(issue, "Selected issue is no longer ready; idle");
            return Ok(None);
        }
        let report = self.analyze(&snapshot);
        let ctx = SpawnContext {
            issue: &snapshot,
            readiness: &report,
            fresh: false,
            observed_generation: observed,
        };
        info!(issue, "Scheduler selected next issue");
        let outcome = self.spawn(&ctx).await?;
        Ok(Some(ScheduledSpawn { issue, outcome }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};
    use coordination::spawn::{MemoryLedger, SpawnLedger};
    use coordination::IssueComment;

    use super::*;
    use crate::tracker::MockIssueTracker;

    fn config(dry_run: bool) -> DispatchConfig {
        DispatchConfig {
            dry_run,
            issue_code_prefix: "GH".into(),
            default_agent_type: "general".into(),
            report_link_errors: true,
            ..DispatchConfig::default()
        }
    }

    fn answered_issue() -> IssueSnapshot {
        IssueSnapshot {
            id: 31,
            title: "Add a cache".into(),
            body: "Clarifying Questions: 1. Which DB? 2. Which region?".into(),
            comments: vec![
                IssueComment::new("A1: Postgres", Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()),
                IssueComment::new(
                    "Answer 2: us-west",
                    Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap(),
                ),
            ],
            labels: ["waiting:answers".to_string()].into_iter().collect::<BTreeSet<_>>(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            status: IssueStatus::Open,
        }
    }

    #[tokio::test]
    async fn test_dry_run_never_calls_write_surface() {
        let mut mock = MockIssueTracker::new();
        mock.expect_fetch_issue()
            .returning(|_| Ok(answered_issue()));
        mock.expect_add_label().never();
        mock.expect_remove_label().never();
        mock.expect_post_comment().never();
        mock.expect_close_issue().never();

        let ledger = MemoryLedger::new().shared();
        let dispatcher = Dispatcher::new(Arc::new(mock), ledger.clone(), &config(true));
        let outcome = dispatcher.evaluate(31, true).await.unwrap();

        assert_eq!(outcome.plan.to, IssueState::ReadyWork);
        assert_eq!(outcome.plan.remove, vec!["waiting:answers".to_string()]);
        assert_eq!(outcome.plan.add, vec!["ready:work".to_string()]);
        assert!(outcome.spawned());
        assert!(outcome.describe().contains("would spawn"));
        assert!(ledger.get(31).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dry_run_link_error_posts_nothing() {
        let mut mock = MockIssueTracker::new();
        mock.expect_post_comment().never();
        let dispatcher =
            Dispatcher::new(Arc::new(mock), MemoryLedger::new().shared(), &config(true));

        let pr = PullRequestInfo {
            number: 8,
            merged: true,
            body: "no reference".into(),
            head_branch: "cleanup".into(),
        };
        let err = dispatcher.complete(&pr).await.unwrap_err();
        assert!(matches!(err, DispatchError::LinkResolution(_)));
    }

    #[tokio::test]
    async fn test_verification_mismatch_is_reported() {
        let mut mock = MockIssueTracker::new();
        // The tracker silently drops label writes.
        mock.expect_fetch_issue()
            .returning(|_| Ok(answered_issue()));
        mock.expect_remove_label().returning(|_, _| Ok(()));
        mock.expect_add_label().returning(|_, _| Ok(()));
        mock.expect_post_comment().never();

        let ledger = MemoryLedger::new().shared();
        let dispatcher = Dispatcher::new(Arc::new(mock), ledger.clone(), &config(false));
        let err = dispatcher.evaluate(31, true).await.unwrap_err();

        let DispatchError::LabelVerification { missing, stale, .. } = err else {
            panic!("expected verification failure, got {err}");
        };
        assert_eq!(missing, vec!["ready:work".to_string()]);
        assert_eq!(stale, vec!["waiting:answers".to_string()]);
        assert!(ledger.get(31).unwrap().is_none());
    }

    #[test]
    fn test_project_applies_plan() {
        let issue = answered_issue();
        let report = analyze_issue(&issue);
        let plan = plan_transition(&issue, &report, Trigger::Completed { pr_number: 2 });
        let after = project(&issue, &plan);
        assert!(after.has_label("status:completed"));
        assert!(!after.has_label("waiting:answers"));
        assert!(!after.is_open());
    }
}
