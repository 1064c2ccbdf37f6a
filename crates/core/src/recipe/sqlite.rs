//! SQLite-backed recipe store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{RecipeStore, RecipeStoreError, StoredRecipe};
use crate::extractor::ExtractedRecipe;

pub struct SqliteRecipeStore {
    conn: Mutex<Connection>,
}

impl SqliteRecipeStore {
    pub fn new(path: &Path) -> Result<Self, RecipeStoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, RecipeStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RecipeStoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS recipes (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_recipes_user ON recipes(user_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RecipeStoreError> {
        self.conn
            .lock()
            .map_err(|_| RecipeStoreError::Database("recipe store lock poisoned".to_string()))
    }

    fn row_to_recipe(row: &rusqlite::Row) -> rusqlite::Result<StoredRecipe> {
        let body: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        let recipe: ExtractedRecipe = serde_json::from_str(&body).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
        })?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        Ok(StoredRecipe {
            id: row.get(0)?,
            job_id: row.get(1)?,
            user_id: row.get(2)?,
            recipe,
            created_at,
        })
    }

    fn query_one(
        conn: &Connection,
        column: &str,
        value: &str,
    ) -> Result<Option<StoredRecipe>, RecipeStoreError> {
        let sql = format!(
            "SELECT id, job_id, user_id, body, created_at FROM recipes WHERE {} = ?",
            column
        );
        Ok(conn
            .query_row(&sql, params![value], Self::row_to_recipe)
            .optional()?)
    }
}

impl RecipeStore for SqliteRecipeStore {
    fn save(
        &self,
        job_id: &str,
        user_id: &str,
        recipe: &ExtractedRecipe,
    ) -> Result<StoredRecipe, RecipeStoreError> {
        let body = serde_json::to_string(recipe)?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO recipes (id, job_id, user_id, title, body, created_at) VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(job_id) DO NOTHING",
            params![
                id,
                job_id,
                user_id,
                recipe.title,
                body,
                now.to_rfc3339_opts(SecondsFormat::Micros, true)
            ],
        )?;

        Self::query_one(&conn, "job_id", job_id)?.ok_or_else(|| {
            RecipeStoreError::Database(format!("recipe for job {} vanished after insert", job_id))
        })
    }

    fn get(&self, id: &str) -> Result<Option<StoredRecipe>, RecipeStoreError> {
        let conn = self.lock()?;
        Self::query_one(&conn, "id", id)
    }

    fn find_by_job(&self, job_id: &str) -> Result<Option<StoredRecipe>, RecipeStoreError> {
        let conn = self.lock()?;
        Self::query_one(&conn, "job_id", job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Ingredient;

    fn recipe(title: &str) -> ExtractedRecipe {
        ExtractedRecipe {
            title: title.to_string(),
            servings: Some(2),
            ingredients: vec![Ingredient {
                name: "egg".to_string(),
                quantity: Some("2".to_string()),
                ..Default::default()
            }],
            steps: vec!["Whisk".to_string(), "Cook".to_string()],
            equipment: vec!["pan".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_save_and_get() {
        let store = SqliteRecipeStore::in_memory().unwrap();
        let saved = store.save("job-1", "user-1", &recipe("Omelette")).unwrap();

        let loaded = store.get(&saved.id).unwrap().unwrap();
        assert_eq!(loaded.recipe, recipe("Omelette"));
        assert_eq!(loaded.job_id, "job-1");
        assert_eq!(loaded.user_id, "user-1");
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_is_idempotent_per_job() {
        let store = SqliteRecipeStore::in_memory().unwrap();
        let first = store.save("job-1", "user-1", &recipe("Omelette")).unwrap();
        let second = store.save("job-1", "user-1", &recipe("Frittata")).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.recipe.title, "Omelette");
        assert_eq!(
            store.find_by_job("job-1").unwrap().map(|r| r.id),
            Some(first.id)
        );
    }
}
