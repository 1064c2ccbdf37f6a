//! Trait definitions for the extractor module.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::ExtractorError;
use super::types::{ExtractedRecipe, ExtractionInput};

/// Turns staged media into a structured recipe.
///
/// The call may be slow. Implementations must return
/// [`ExtractorError::Cancelled`] promptly once `cancel` fires.
#[async_trait]
pub trait RecipeExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        input: &ExtractionInput,
        cancel: &CancellationToken,
    ) -> Result<ExtractedRecipe, ExtractorError>;
}
