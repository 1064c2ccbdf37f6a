//! Extraction job types and the job state machine.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of source a job was submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// A remote web video URL, fetched with the retrieval tool.
    Url,
    /// An image uploaded and staged locally by the caller.
    Image,
    /// A video uploaded and staged locally by the caller.
    Video,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Url => "url",
            JobType::Image => "image",
            JobType::Video => "video",
        }
    }

    /// Whether the source must be fetched before extraction.
    pub fn is_remote(&self) -> bool {
        matches!(self, JobType::Url)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url" => Ok(JobType::Url),
            "image" => Ok(JobType::Image),
            "video" => Ok(JobType::Video),
            other => Err(format!("unknown job type: {}", other)),
        }
    }
}

/// Lifecycle status of an extraction job.
///
/// Jobs move strictly forward:
/// `pending -> downloading -> processing -> extracting -> {completed | failed | cancelled}`.
/// `failed` and `cancelled` can be reached from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    Processing,
    Extracting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Statuses a claimed job can be in while a worker owns it.
    pub const ACTIVE: [JobStatus; 3] = [
        JobStatus::Downloading,
        JobStatus::Processing,
        JobStatus::Extracting,
    ];

    pub const TERMINAL: [JobStatus; 3] = [
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Extracting => "extracting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Position in the forward pipeline. Terminal statuses share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Downloading => 1,
            JobStatus::Processing => 2,
            JobStatus::Extracting => 3,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 4,
        }
    }

    /// Whether a progress update may move a job from `self` to `next`.
    ///
    /// Only active statuses take part, and a job never moves backwards.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        self.is_active() && next.is_active() && next.rank() >= self.rank()
    }

    /// Active statuses from which `next` is reachable by a progress update.
    pub fn predecessors(next: JobStatus) -> Vec<JobStatus> {
        Self::ACTIVE
            .iter()
            .copied()
            .filter(|s| s.can_advance_to(next))
            .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "downloading" => Ok(JobStatus::Downloading),
            "processing" => Ok(JobStatus::Processing),
            "extracting" => Ok(JobStatus::Extracting),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Stable error codes persisted on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Reaped after exceeding the maximum job age.
    Timeout,
    InvalidUrl,
    PlatformNotSupported,
    FetchFailed,
    FetchTimeout,
    CredentialsNotConfigured,
    CredentialsExpired,
    ContentUnavailable,
    SourceMissing,
    ExtractionFailed,
    NoRecipeFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::PlatformNotSupported => "PLATFORM_NOT_SUPPORTED",
            ErrorCode::FetchFailed => "FETCH_FAILED",
            ErrorCode::FetchTimeout => "FETCH_TIMEOUT",
            ErrorCode::CredentialsNotConfigured => "CREDENTIALS_NOT_CONFIGURED",
            ErrorCode::CredentialsExpired => "CREDENTIALS_EXPIRED",
            ErrorCode::ContentUnavailable => "CONTENT_UNAVAILABLE",
            ErrorCode::SourceMissing => "SOURCE_MISSING",
            ErrorCode::ExtractionFailed => "EXTRACTION_FAILED",
            ErrorCode::NoRecipeFound => "NO_RECIPE_FOUND",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record tracking one media-to-recipe extraction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: String,
    pub user_id: String,
    pub job_type: JobType,
    /// Remote reference (set for URL jobs).
    pub source_url: Option<String>,
    /// Locally staged artifact (uploads, or the downloaded file).
    pub source_path: Option<PathBuf>,
    pub mime_type: Option<String>,
    pub status: JobStatus,
    /// Advisory progress, 0-100.
    pub progress: u8,
    pub status_message: Option<String>,
    pub result_recipe_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractionJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub user_id: String,
    pub job_type: JobType,
    pub source_url: Option<String>,
    pub source_path: Option<PathBuf>,
    pub mime_type: Option<String>,
    pub idempotency_key: Option<String>,
}

impl CreateJobRequest {
    /// A job for a remote video URL.
    pub fn url(user_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            job_type: JobType::Url,
            source_url: Some(source_url.into()),
            source_path: None,
            mime_type: None,
            idempotency_key: None,
        }
    }

    /// A job for a locally staged upload.
    pub fn upload(
        user_id: impl Into<String>,
        job_type: JobType,
        source_path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            job_type,
            source_url: None,
            source_path: Some(source_path.into()),
            mime_type: Some(mime_type.into()),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Result of an attempt to claim a pending job.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller now owns the job. Carries the job as it stands after the claim.
    Claimed(ExtractionJob),
    /// Someone else claimed it first, or it is no longer pending.
    AlreadyClaimed,
    NotFound,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed(_) => "claimed",
            ClaimOutcome::AlreadyClaimed => "already_claimed",
            ClaimOutcome::NotFound => "not_found",
        }
    }
}

/// Result of a conditional status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The job's current status did not allow the write.
    Rejected { current: JobStatus },
    NotFound,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Downloading,
            JobStatus::Processing,
            JobStatus::Extracting,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_and_active() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Pending.is_active());
        assert!(JobStatus::Extracting.is_active());
    }

    #[test]
    fn test_can_advance_forward_only() {
        assert!(JobStatus::Downloading.can_advance_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_advance_to(JobStatus::Processing));
        assert!(!JobStatus::Extracting.can_advance_to(JobStatus::Downloading));
        assert!(!JobStatus::Pending.can_advance_to(JobStatus::Downloading));
        assert!(!JobStatus::Completed.can_advance_to(JobStatus::Extracting));
        assert!(!JobStatus::Processing.can_advance_to(JobStatus::Completed));
    }

    #[test]
    fn test_predecessors() {
        assert_eq!(
            JobStatus::predecessors(JobStatus::Extracting),
            vec![
                JobStatus::Downloading,
                JobStatus::Processing,
                JobStatus::Extracting
            ]
        );
        assert_eq!(
            JobStatus::predecessors(JobStatus::Downloading),
            vec![JobStatus::Downloading]
        );
        assert!(JobStatus::predecessors(JobStatus::Failed).is_empty());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
        let json = serde_json::to_string(&ErrorCode::CredentialsExpired).unwrap();
        assert_eq!(json, "\"CREDENTIALS_EXPIRED\"");
    }

    #[test]
    fn test_error_code_strings_match_serde() {
        for code in [ErrorCode::Timeout, ErrorCode::NoRecipeFound, ErrorCode::InvalidUrl] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json.trim_matches('"'), code.as_str());
        }
    }
}
