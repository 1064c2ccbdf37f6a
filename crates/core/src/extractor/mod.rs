//! Client side of the AI recipe extraction service.
//!
//! The service itself is external. This module defines what goes in
//! (staged media plus platform metadata), what comes back (a structured
//! recipe), and an HTTP implementation of the call.

mod config;
mod error;
mod http;
mod traits;
mod types;

pub use config::ExtractorConfig;
pub use error::ExtractorError;
pub use http::HttpRecipeExtractor;
pub use traits::RecipeExtractor;
pub use types::{ExtractedRecipe, ExtractionInput, Ingredient};
