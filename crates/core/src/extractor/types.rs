//! Types exchanged with the recipe extraction service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fetcher::SourceMetadata;
use crate::job::JobType;

/// One ingredient line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A structured recipe as returned by the extraction service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecipe {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl ExtractedRecipe {
    /// A recipe with neither ingredients nor steps carries nothing usable.
    pub fn is_empty(&self) -> bool {
        self.ingredients.is_empty() && self.steps.is_empty()
    }
}

/// Everything the extraction service gets for one job.
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub job_id: String,
    pub user_id: String,
    pub job_type: JobType,
    /// Locally staged media file.
    pub media_path: PathBuf,
    pub mime_type: String,
    /// Original remote URL, for URL jobs.
    pub source_url: Option<String>,
    /// Caption and title text reported by the platform.
    pub metadata: Option<SourceMetadata>,
    pub thumbnail_url: Option<String>,
}

/// Non-media context sent alongside the upload.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ExtractionContext<'a> {
    pub job_id: &'a str,
    pub job_type: JobType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<&'a str>,
}

impl<'a> From<&'a ExtractionInput> for ExtractionContext<'a> {
    fn from(input: &'a ExtractionInput) -> Self {
        let metadata = input.metadata.as_ref();
        Self {
            job_id: &input.job_id,
            job_type: input.job_type,
            source_url: input.source_url.as_deref(),
            title: metadata.and_then(|m| m.title.as_deref()),
            description: metadata.and_then(|m| m.description.as_deref()),
            uploader: metadata.and_then(|m| m.uploader.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_deserialize_minimal() {
        let json = r#"{"title": "Pancakes", "steps": ["Mix", "Fry"]}"#;
        let recipe: ExtractedRecipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.title, "Pancakes");
        assert_eq!(recipe.steps.len(), 2);
        assert!(recipe.ingredients.is_empty());
        assert!(!recipe.is_empty());
        assert!(ExtractedRecipe::default().is_empty());
    }

    #[test]
    fn test_context_carries_metadata() {
        let input = ExtractionInput {
            job_id: "job-1".to_string(),
            user_id: "user-1".to_string(),
            job_type: JobType::Url,
            media_path: PathBuf::from("/tmp/ladle-job-1.mp4"),
            mime_type: "video/mp4".to_string(),
            source_url: Some("https://youtu.be/abc".to_string()),
            metadata: Some(SourceMetadata {
                title: Some("Pasta".to_string()),
                ..Default::default()
            }),
            thumbnail_url: None,
        };
        let json = serde_json::to_value(ExtractionContext::from(&input)).unwrap();
        assert_eq!(json["title"], "Pasta");
        assert_eq!(json["job_type"], "url");
        assert!(json.get("description").is_none());
    }
}
