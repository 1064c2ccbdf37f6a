//! Error types for the fetcher module.

use std::path::PathBuf;
use thiserror::Error;

use super::validate::UrlRejection;
use crate::job::ErrorCode;

/// Longest diagnostic excerpt kept from the tool's output.
const MAX_DIAGNOSTIC_LEN: usize = 4000;

/// Errors that can occur while fetching a source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL failed validation; nothing was spawned.
    #[error(transparent)]
    InvalidUrl(#[from] UrlRejection),

    /// Retrieval tool binary not found.
    #[error("retrieval tool not found: {path}")]
    ToolNotFound { path: PathBuf },

    /// Retrieval tool exited unsuccessfully.
    #[error("retrieval tool failed (exit code {exit_code:?}): {diagnostic}")]
    ToolFailed {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    /// The tool reported success but produced no media file.
    #[error("no media file produced for {base_name}")]
    OutputMissing { base_name: String },

    /// Tool output could not be parsed.
    #[error("failed to parse tool output: {reason}")]
    ParseError { reason: String },

    /// The fetch ran past its deadline; the subprocess was killed.
    #[error("fetch timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The caller cancelled; the subprocess was killed.
    #[error("fetch cancelled")]
    Cancelled,

    /// The fetcher needs credentials that are missing or unusable.
    #[error("fetcher not configured: {0}")]
    NotConfigured(String),

    /// Session credentials were rejected by the platform.
    #[error("session credentials expired or rejected: {diagnostic}")]
    CredentialsExpired { diagnostic: String },

    /// The content is private, deleted or otherwise unavailable.
    #[error("content unavailable: {diagnostic}")]
    ContentUnavailable { diagnostic: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Build a tool failure, keeping only the tail of long diagnostics.
    pub fn tool_failed(exit_code: Option<i32>, diagnostic: &str) -> Self {
        Self::ToolFailed {
            exit_code,
            diagnostic: truncate_diagnostic(diagnostic),
        }
    }

    /// Code persisted on the job when this error ends it.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FetchError::InvalidUrl(rejection) => rejection.error_code(),
            FetchError::Timeout { .. } => ErrorCode::FetchTimeout,
            FetchError::NotConfigured(_) => ErrorCode::CredentialsNotConfigured,
            FetchError::CredentialsExpired { .. } => ErrorCode::CredentialsExpired,
            FetchError::ContentUnavailable { .. } => ErrorCode::ContentUnavailable,
            FetchError::Cancelled => ErrorCode::Internal,
            FetchError::ToolNotFound { .. }
            | FetchError::ToolFailed { .. }
            | FetchError::OutputMissing { .. }
            | FetchError::ParseError { .. }
            | FetchError::Io(_) => ErrorCode::FetchFailed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

pub(crate) fn truncate_diagnostic(text: &str) -> String {
    let text = text.trim();
    if text.len() <= MAX_DIAGNOSTIC_LEN {
        return text.to_string();
    }
    let mut start = text.len() - MAX_DIAGNOSTIC_LEN;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
