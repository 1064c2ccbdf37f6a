//! Durable extraction jobs and their state machine.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub(crate) use store::{check_create_request, check_progress_status};
pub use store::{JobError, JobFilter, JobStore};
pub use types::{
    ClaimOutcome, CreateJobRequest, ErrorCode, ExtractionJob, JobStatus, JobType,
    TransitionOutcome,
};
