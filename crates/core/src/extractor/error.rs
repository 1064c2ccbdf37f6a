//! Error types for the extractor module.

use thiserror::Error;

use crate::job::ErrorCode;

/// Errors returned by a recipe extractor.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// Endpoint or credentials missing.
    #[error("extractor not configured: {0}")]
    NotConfigured(String),

    /// The service understood the media but found no recipe in it.
    #[error("no recipe found: {0}")]
    NoRecipe(String),

    /// The service answered with a non-success status.
    #[error("extraction service returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body was not a recipe.
    #[error("invalid extraction response: {0}")]
    InvalidResponse(String),

    #[error("extraction request timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("extraction cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractorError {
    /// Code persisted on the job when this error ends it.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ExtractorError::NoRecipe(_) => ErrorCode::NoRecipeFound,
            ExtractorError::Cancelled => ErrorCode::Internal,
            ExtractorError::Io(_) => ErrorCode::SourceMissing,
            _ => ErrorCode::ExtractionFailed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExtractorError::Cancelled)
    }
}
