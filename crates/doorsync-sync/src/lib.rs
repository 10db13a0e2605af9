//! Sync orchestration for the doorsync engine.
//!
//! Coordinates outbox replay (local→remote) and snapshot pull
//! (remote→local) over a [`doorsync_gateway::RemoteGateway`], with
//! optimistic local-wins semantics: mutations apply locally first and
//! replay to the remote authority at least once. True multi-writer
//! conflict resolution is intentionally out of scope — a remote edit
//! racing a queued local edit is overwritten on replay.

pub mod config;
pub mod orchestrator;

pub use config::SyncConfig;
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
