//! Full-repository scan and the periodic `watch` loop.
//!
//! Cancellation is only observed between issues: an issue whose mutation
//! sequence has started always runs to completion.

use std::time::Duration;

use coordination::IssueId;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatcher::{Dispatcher, IssueOutcome};
use crate::errors::DispatchResult;

/// Tally of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub outcomes: Vec<IssueOutcome>,
    pub failed: Vec<(IssueId, String)>,
    /// Issues not visited because the sweep was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
}

impl SweepReport {
    pub fn evaluated(&self) -> usize {
        self.outcomes.len()
    }

    pub fn spawned(&self) -> usize {
        self.outcomes.iter().filter(|o| o.spawned()).count()
    }

    pub fn changed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.plan.is_noop()).count()
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "evaluated {}, changed {}, spawned {}, failed {}",
            self.evaluated(),
            self.changed(),
            self.spawned(),
            self.failed.len()
        );
        if self.cancelled {
            line.push_str(&format!(", cancelled with {} remaining", self.skipped));
        }
        line
    }
}

/// Evaluate every open issue once.
///
/// Failures on one issue are recorded and the sweep moves on; only a failure
/// to list issues aborts it.
pub async fn sweep(dispatcher: &Dispatcher, cancel: &CancellationToken) -> DispatchResult<SweepReport> {
    let issues = dispatcher.open_issues().await?;
    let total = issues.len();
    info!(total, "Sweep starting");

    let mut report = SweepReport::default();
    for (done, issue) in issues.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            report.skipped = total - done;
            warn!(remaining = report.skipped, "Sweep cancelled");
            break;
        }
        match dispatcher.evaluate(issue.id, false).await {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(err) => {
                error!(issue = issue.id, error = %err, "Sweep failed on issue");
                report.failed.push((issue.id, err.to_string()));
            }
        }
    }

    info!(summary = %report.summary(), "Sweep finished");
    Ok(report)
}

/// Sweep every `interval` until `cancel` fires.
pub async fn watch(
    dispatcher: &Dispatcher,
    interval: Duration,
    cancel: CancellationToken,
) -> DispatchResult<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "Watching for work");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Watch stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(err) = sweep(dispatcher, &cancel).await {
                    error!(error = %err, "Sweep aborted");
                }
            }
        }
    }
}
