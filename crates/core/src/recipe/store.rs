//! Recipe store trait and types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extractor::ExtractedRecipe;

/// Errors from recipe persistence.
#[derive(Debug, Error)]
pub enum RecipeStoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for RecipeStoreError {
    fn from(e: rusqlite::Error) -> Self {
        RecipeStoreError::Database(e.to_string())
    }
}

/// A persisted recipe linked to the job that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecipe {
    pub id: String,
    pub job_id: String,
    pub user_id: String,
    pub recipe: ExtractedRecipe,
    pub created_at: DateTime<Utc>,
}

/// Persistence for extracted recipes.
pub trait RecipeStore: Send + Sync {
    /// Store the recipe for `job_id`. Saving twice for the same job returns
    /// the first record instead of creating a second one.
    fn save(
        &self,
        job_id: &str,
        user_id: &str,
        recipe: &ExtractedRecipe,
    ) -> Result<StoredRecipe, RecipeStoreError>;

    fn get(&self, id: &str) -> Result<Option<StoredRecipe>, RecipeStoreError>;

    fn find_by_job(&self, job_id: &str) -> Result<Option<StoredRecipe>, RecipeStoreError>;
}
