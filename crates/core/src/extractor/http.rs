//! HTTP client for the recipe extraction service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ExtractorConfig;
use super::error::ExtractorError;
use super::traits::RecipeExtractor;
use super::types::{ExtractedRecipe, ExtractionContext, ExtractionInput};

/// Longest error body excerpt kept in [`ExtractorError::Api`].
const MAX_ERROR_BODY: usize = 500;

/// Response body of the extraction endpoint.
#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    recipe: Option<ExtractedRecipe>,
    #[serde(default)]
    reason: Option<String>,
}

/// Sends the staged media as a multipart upload and parses the recipe.
pub struct HttpRecipeExtractor {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpRecipeExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractorError> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                ExtractorError::NotConfigured("extractor endpoint is required".to_string())
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    async fn build_form(&self, input: &ExtractionInput) -> Result<multipart::Form, ExtractorError> {
        let context = serde_json::to_string(&ExtractionContext::from(input))
            .map_err(|e| ExtractorError::InvalidResponse(e.to_string()))?;
        let file = tokio::fs::File::open(&input.media_path).await?;
        let length = file.metadata().await?.len();
        let file_name = input
            .media_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "media".to_string());

        // Streamed from disk; the known length keeps a Content-Length header.
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let media = multipart::Part::stream_with_length(body, length)
            .file_name(file_name)
            .mime_str(&input.mime_type)?;
        let context = multipart::Part::text(context).mime_str("application/json")?;

        Ok(multipart::Form::new()
            .part("context", context)
            .part("media", media))
    }

    async fn send(&self, input: &ExtractionInput) -> Result<ExtractedRecipe, ExtractorError> {
        let form = self.build_form(input).await?;

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractorError::Timeout {
                    timeout_secs: self.timeout_secs,
                }
            } else {
                ExtractorError::Http(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;
        parse_response(status, &body)
    }
}

fn parse_response(status: StatusCode, body: &str) -> Result<ExtractedRecipe, ExtractorError> {
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        let reason = serde_json::from_str::<ExtractResponse>(body)
            .ok()
            .and_then(|r| r.reason)
            .unwrap_or_else(|| "media contains no recipe".to_string());
        return Err(ExtractorError::NoRecipe(reason));
    }

    if !status.is_success() {
        let message: String = body.chars().take(MAX_ERROR_BODY).collect();
        return Err(ExtractorError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let parsed: ExtractResponse = serde_json::from_str(body)
        .map_err(|e| ExtractorError::InvalidResponse(e.to_string()))?;

    match parsed.recipe {
        Some(recipe) if !recipe.is_empty() => Ok(recipe),
        _ => Err(ExtractorError::NoRecipe(
            parsed
                .reason
                .unwrap_or_else(|| "media contains no recipe".to_string()),
        )),
    }
}

#[async_trait]
impl RecipeExtractor for HttpRecipeExtractor {
    fn name(&self) -> &str {
        "http"
    }

    async fn extract(
        &self,
        input: &ExtractionInput,
        cancel: &CancellationToken,
    ) -> Result<ExtractedRecipe, ExtractorError> {
        debug!(
            "Submitting {:?} ({}) for job {} to {}",
            input.media_path, input.mime_type, input.job_id, self.endpoint
        );

        let result = tokio::select! {
            result = self.send(input) => result,
            _ = cancel.cancelled() => Err(ExtractorError::Cancelled),
        };

        match &result {
            Ok(recipe) => info!(
                "Extracted recipe {:?} for job {} ({} ingredients, {} steps)",
                recipe.title,
                input.job_id,
                recipe.ingredients.len(),
                recipe.steps.len()
            ),
            Err(e) => warn!("Extraction for job {} failed: {}", input.job_id, e),
        }
        result
    }
}
