//! Recovery of work abandoned by crashed or hung workers.
//!
//! Each tick fails jobs that have been active longer than the maximum job
//! age and deletes temp files older than twice that age.

mod config;
mod runner;

pub use config::ReaperConfig;
pub use runner::{ReapReport, Reaper};
