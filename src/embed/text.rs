use crate::cache::EmbeddingCache;
use crate::error::{RagError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Default HTTP-based text embedder, shaped after the OpenAI embeddings API.
/// Handles batch embedding with retry logic and an optional query cache.
pub struct TextEmbedder {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    batch_size: usize,
    cache: Option<Arc<EmbeddingCache>>,
}

impl TextEmbedder {
    pub fn new(api_key: String, model: String, batch_size: usize) -> Self {
        Self::new_with_cache(api_key, model, batch_size, None)
    }

    pub fn new_with_cache(
        api_key: String,
        model: String,
        batch_size: usize,
        cache: Option<Arc<EmbeddingCache>>,
    ) -> Self {
        let batch_size = batch_size.min(2048);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            model,
            batch_size,
            cache,
        }
    }

    /// Overrides the default OpenAI endpoint, for OpenAI-compatible providers.
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Embed a batch of texts, splitting into `batch_size`-sized chunks.
    /// Returns one vector per input, order preserved; fails atomically (no
    /// partial results) on any chunk failure.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::new();

        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.embed_batch_internal(chunk.to_vec()).await?;
            all_embeddings.extend(embeddings);

            if chunk.len() == self.batch_size {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        Ok(all_embeddings)
    }

    async fn embed_batch_internal(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embed(format!("Network error: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return Err(RagError::Embed(format!(
                "embedding provider error {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embed(format!("Failed to parse response: {}", e)))?;

        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Embed a single text, checking the query cache first.
    pub async fn embed_with_cache(&self, text: &str, max_retries: usize) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(text) {
                log::debug!("Cache hit for query: {}", text);
                return Ok(cached);
            }
        }

        let embedding = self.embed_with_retry(text, max_retries).await?;

        if let Some(cache) = &self.cache {
            cache.put(text.to_string(), embedding.clone());
        }

        Ok(embedding)
    }

    /// Embed a single text with exponential-backoff retry on 429/5xx.
    pub async fn embed_with_retry(&self, text: &str, max_retries: usize) -> Result<Vec<f32>> {
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.embed_batch_internal(vec![text.to_string()]).await {
                Ok(mut embeddings) => {
                    if embeddings.is_empty() {
                        return Err(RagError::Embed(
                            "Empty response from embedding provider".to_string(),
                        ));
                    }
                    return Ok(embeddings.remove(0));
                }
                Err(e) if attempt < max_retries => {
                    let should_retry = e.to_string().contains("429")
                        || e.to_string().contains("500")
                        || e.to_string().contains("502")
                        || e.to_string().contains("503")
                        || e.to_string().contains("504");

                    if should_retry {
                        log::warn!("Retry {}/{} after error: {}", attempt + 1, max_retries, e);
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        attempt += 1;
                    } else {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_batch_size_limit() {
        let embedder = TextEmbedder::new("test-key".to_string(), "text-embedding-3-small".to_string(), 5000);
        assert_eq!(embedder.batch_size, 2048);
    }

    #[test]
    fn test_embedder_batch_size_under_limit() {
        let embedder = TextEmbedder::new("test-key".to_string(), "text-embedding-3-small".to_string(), 100);
        assert_eq!(embedder.batch_size, 100);
    }

    #[tokio::test]
    async fn test_embed_batch_empty_input_short_circuits() {
        let embedder = TextEmbedder::new("test-key".to_string(), "text-embedding-3-small".to_string(), 100);
        let result = embedder.embed_batch(vec![]).await.unwrap();
        assert!(result.is_empty());
    }
}
