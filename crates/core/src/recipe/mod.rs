//! Persistence of extracted recipes.

mod sqlite;
mod store;

pub use sqlite::SqliteRecipeStore;
pub use store::{RecipeStore, RecipeStoreError, StoredRecipe};
