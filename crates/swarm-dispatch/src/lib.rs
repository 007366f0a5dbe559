//! Impure shell around the `coordination` core: tracker access, retries,
//! per-issue locking, and the event dispatcher behind the `swarm-dispatch`
//! binary.

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod gh_bridge;
pub mod locks;
pub mod retry;
pub mod sweep;
pub mod tracker;
