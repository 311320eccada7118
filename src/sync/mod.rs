// ABOUTME: Sync engine - per-table state machine, Full-sync gate and the orchestrating loop
// ABOUTME: Re-exports the types callers need to run a sync

pub mod gate;
pub mod orchestrator;
pub mod state;

pub use gate::{AssumeYes, FullSyncConfirmer, FullSyncGrant, PromptConfirmer};
pub use orchestrator::{Orchestrator, SyncOptions};
pub use state::{SyncMode, SyncPhase, SyncState, TableStatus};
