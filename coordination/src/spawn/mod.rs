//! Spawn Coordinator and its durable de-duplication ledger.
//!
//! At most one agent trigger is emitted per (issue, readiness generation).
//! The ledger record is persisted *before* the trigger is handed back for
//! emission, so a crash in between can only lose a trigger, never produce a
//! second one for the same generation.

pub mod coordinator;
pub mod ledger;
pub mod trigger;

pub use coordinator::{target_generation, SpawnContext, SpawnCoordinator, SpawnOutcome};
pub use ledger::{CheckAndSet, JsonFileLedger, MemoryLedger, SharedLedger, SpawnLedger, SpawnRecord};
pub use trigger::{classify_agent_type, SpawnTrigger, TriggerState};
