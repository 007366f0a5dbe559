//! Issue Orchestration Core
//!
//! Deterministic building blocks for driving tracker issues from
//! "needs clarification" to "agent spawned" to "completed":
//!
//! - [`readiness`]: clarifying-question extraction and answer matching
//! - [`lifecycle`]: label vocabulary, state inference, transition planning
//! - [`spawn`]: at-most-once agent triggers backed by a durable ledger
//! - [`scheduler`]: priority ordering of ready work
//! - [`events`]: webhook payload normalization
//! - [`linking`]: pull request → issue resolution
//!
//! Nothing in this crate talks to the tracker. The `swarm-dispatch` crate
//! fetches snapshots, applies plans, and posts triggers.

pub mod error;
pub mod events;
pub mod issue;
pub mod lifecycle;
pub mod linking;
pub mod notices;
pub mod readiness;
pub mod scheduler;
pub mod spawn;

pub use error::{IngestError, LedgerError, LedgerResult, LinkResolutionError, MalformedQuestionFormat};
pub use events::{ingest, IssueEvent, IssueEventKind};
pub use issue::{IssueComment, IssueId, IssueSnapshot, IssueStatus, PullRequestInfo};
pub use lifecycle::{
    infer_state, is_legal_transition, plan_transition, InferredState, IssueState, LabelConflict,
    TransitionPlan, Trigger,
};
pub use linking::{resolve_issue, LinkSource};
pub use readiness::{analyze, analyze_issue, ReadinessReport};
pub use scheduler::{select_next, PriorityClass};
pub use spawn::{
    JsonFileLedger, MemoryLedger, SharedLedger, SpawnContext, SpawnCoordinator, SpawnLedger,
    SpawnOutcome, SpawnRecord, SpawnTrigger,
};
