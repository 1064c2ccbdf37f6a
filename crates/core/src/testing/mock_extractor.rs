//! Mock recipe extractor for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::fixtures;
use crate::extractor::{ExtractedRecipe, ExtractionInput, ExtractorError, RecipeExtractor};

/// Mock implementation of the RecipeExtractor trait.
///
/// Returns [`fixtures::recipe`] unless told otherwise, and records every
/// input it was given.
#[derive(Debug)]
pub struct MockExtractor {
    inputs: Arc<RwLock<Vec<ExtractionInput>>>,
    recipe: Arc<RwLock<ExtractedRecipe>>,
    next_error: Arc<RwLock<Option<ExtractorError>>>,
    hang: Arc<AtomicBool>,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            inputs: Arc::new(RwLock::new(Vec::new())),
            recipe: Arc::new(RwLock::new(fixtures::recipe("Mock Recipe"))),
            next_error: Arc::new(RwLock::new(None)),
            hang: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn recorded_inputs(&self) -> Vec<ExtractionInput> {
        self.inputs.read().await.clone()
    }

    pub async fn set_recipe(&self, recipe: ExtractedRecipe) {
        *self.recipe.write().await = recipe;
    }

    pub async fn set_next_error(&self, error: ExtractorError) {
        *self.next_error.write().await = Some(error);
    }

    /// Block every call until its token is cancelled.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecipeExtractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(
        &self,
        input: &ExtractionInput,
        cancel: &CancellationToken,
    ) -> Result<ExtractedRecipe, ExtractorError> {
        self.inputs.write().await.push(input.clone());

        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        if self.hang.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err(ExtractorError::Cancelled);
        }
        Ok(self.recipe.read().await.clone())
    }
}
