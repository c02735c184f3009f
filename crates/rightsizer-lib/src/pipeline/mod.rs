//! Trial execution pipeline
//!
//! This module provides:
//! - The run state machine and its persisted record
//! - Configuration record editing that leaves unrelated fields untouched
//! - Bounded status polling of the trial cluster
//! - The approval gate with exactly-once resume
//! - The executor that guarantees every run ends reverted or flagged

mod checkpoint;
mod executor;
mod poller;
mod record;
mod report;
mod run;

#[cfg(test)]
mod tests;

pub use checkpoint::{
    ApprovalGate, Checkpoint, CheckpointState, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore,
};
pub use executor::{
    cancellation, CancelHandle, CancelSignal, Guardrails, PipelineConfig, TrialPipeline,
    DEFAULT_RECORD_PREFIX,
};
pub use poller::{PollBudget, PollOutcome, PollerConfig, StatusPoller};
pub use record::{apply_recommendations, ConfigRecord, ARCHITECTURE_FLAG};
pub use report::{RunOutcome, RunReport};
pub use run::{fingerprint, ConfigSnapshot, PipelineRun, ResourceStatus, RunPhase};
