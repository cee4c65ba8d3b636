//! Application layer: runs protocols against an instrument.

pub mod orchestrator;

pub use orchestrator::{TrialEvent, WorkflowOrchestrator};
