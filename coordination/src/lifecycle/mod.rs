//! Issue lifecycle: label vocabulary, state inference, and transition planning.
//!
//! The tracker's label set is the only place state lives. At the start of
//! every event the current [`IssueState`] is inferred from the labels, the
//! target state is computed, and a [`TransitionPlan`] describes the label and
//! comment mutations needed to get there. Planning is pure; applying a plan is
//! the dispatcher's job.

pub mod labels;
pub mod plan;
pub mod state;

pub use plan::{plan_transition, Trigger, TransitionPlan};
pub use state::{infer_state, is_legal_transition, InferredState, IssueState, LabelConflict};
