//! Testing utilities and mock implementations.
//!
//! In-memory and mock versions of every collaborator the orchestrator and
//! reaper depend on, so both can run without yt-dlp, a network, or a
//! database file.
//!
//! # Example
//!
//! ```rust,ignore
//! use ladle_core::testing::{InMemoryJobStore, MockExtractor, MockFetcher};
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let fetcher = Arc::new(MockFetcher::new(temp_dir.path()));
//! let extractor = Arc::new(MockExtractor::new());
//!
//! // Make the next download fail
//! fetcher.set_next_error(FetchError::tool_failed(Some(1), "ERROR: 404")).await;
//! ```

mod memory_store;
mod mock_extractor;
mod mock_fetcher;

pub use memory_store::InMemoryJobStore;
pub use mock_extractor::MockExtractor;
pub use mock_fetcher::{MockFetcher, RecordedFetch};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::extractor::{ExtractedRecipe, Ingredient};
    use crate::job::CreateJobRequest;

    /// A small but complete recipe.
    pub fn recipe(title: &str) -> ExtractedRecipe {
        ExtractedRecipe {
            title: title.to_string(),
            description: Some("Quick weeknight dinner".to_string()),
            servings: Some(2),
            ingredients: vec![
                ingredient("spaghetti", "200", "g"),
                ingredient("garlic", "3", "cloves"),
                ingredient("olive oil", "3", "tbsp"),
            ],
            steps: vec![
                "Boil the pasta".to_string(),
                "Fry the garlic in oil".to_string(),
                "Toss together".to_string(),
            ],
            equipment: vec!["pot".to_string(), "pan".to_string()],
            thumbnail_url: None,
        }
    }

    pub fn ingredient(name: &str, quantity: &str, unit: &str) -> Ingredient {
        Ingredient {
            name: name.to_string(),
            quantity: Some(quantity.to_string()),
            unit: Some(unit.to_string()),
            note: None,
        }
    }

    /// A URL job request for an allow-listed platform.
    pub fn url_request(user_id: &str) -> CreateJobRequest {
        CreateJobRequest::url(user_id, "https://www.youtube.com/watch?v=dQw4w9WgXcQ")
    }
}
