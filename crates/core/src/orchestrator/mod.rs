//! Job orchestrator for automated extraction.
//!
//! The orchestrator drives jobs through the state machine:
//! - **Claim**: atomic, arbitrated by the job store
//! - **Download**: fetch remote media, or locate a staged upload
//! - **Extract**: hand the media to the extraction service and save the recipe

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::JobOrchestrator;
pub use types::{EnqueueOutcome, OrchestratorError, OrchestratorStatus, ProcessOutcome};
