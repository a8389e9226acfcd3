use crate::error::{RagError, Result};
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Serialize)]
struct MediaEmbeddingRequest {
    model: String,
    input: Vec<MediaInput>,
}

#[derive(Serialize)]
struct MediaInput {
    /// Base64-encoded file content.
    data: String,
    /// Original extension, so the backend knows how to decode.
    content_type: String,
}

#[derive(Deserialize)]
struct MediaEmbeddingResponse {
    data: Vec<MediaEmbeddingData>,
}

#[derive(Deserialize)]
struct MediaEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct MediaTextEmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<MediaTextInput<'a>>,
}

#[derive(Serialize)]
struct MediaTextInput<'a> {
    text: &'a str,
}

/// Default HTTP-based image/audio/video embedder. Every non-text modality
/// the manager ships out of the box speaks this same contract: POST a batch
/// of base64-encoded files, get back one vector per input in order.
/// Modality-specific provider integrations are out of scope; this is the
/// fallback any configured `provider: http` container uses.
pub struct MediaEmbedder {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    batch_size: usize,
}

impl MediaEmbedder {
    pub fn new(endpoint: String, api_key: String, model: String, batch_size: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            endpoint,
            model,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed a batch of local file paths. Each must exist; returns one
    /// vector per input in order, or fails atomically (no partial results).
    pub async fn embed_batch(&self, paths: Vec<PathBuf>) -> Result<Vec<Vec<f32>>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::new();
        for chunk in paths.chunks(self.batch_size) {
            let embeddings = self.embed_batch_internal(chunk).await?;
            all_embeddings.extend(embeddings);
        }
        Ok(all_embeddings)
    }

    async fn embed_batch_internal(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        let mut inputs = Vec::with_capacity(paths.len());
        for path in paths {
            inputs.push(encode_file(path)?);
        }

        let request = MediaEmbeddingRequest {
            model: self.model.clone(),
            input: inputs,
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
                "media embedding provider error {}: {}",
                status, body
            )));
        }

        let result: MediaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embed(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != paths.len() {
            return Err(RagError::Embed(format!(
                "embedding count mismatch: sent {} inputs, got {} back",
                paths.len(),
                result.data.len()
            )));
        }

        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Encode a text query into this container's vector space, for
    /// cross-modal querying (text -> image/audio/video). Fails with
    /// `RagError::Embed` if the underlying model rejects text input; callers
    /// doing cross-modal retrieval should map that to `UnsupportedCrossModal`.
    pub async fn embed_text_query(&self, text: &str) -> Result<Vec<f32>> {
        let request = MediaTextEmbeddingRequest {
            model: &self.model,
            input: vec![MediaTextInput { text }],
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
                "media embedding provider error {}: {}",
                status, body
            )));
        }

        let result: MediaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embed(format!("Failed to parse response: {}", e)))?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::Embed("media embedding provider returned no vectors for text query".into()))
    }
}

fn encode_file(path: &Path) -> Result<MediaInput> {
    if !path.exists() {
        return Err(RagError::InvalidInput(format!(
            "media embed input does not exist: {}",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)?;
    let content_type = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    Ok(MediaInput {
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embed_batch_empty_input_short_circuits() {
        let embedder = MediaEmbedder::new(
            "http://localhost:0/embed".to_string(),
            "test-key".to_string(),
            "clip-vit-base".to_string(),
            8,
        );
        let result = embedder.embed_batch(vec![]).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_encode_file_missing_path_errors() {
        let err = encode_file(Path::new("/nonexistent/path.png")).unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_embed_text_query_network_error_is_embed_err() {
        let embedder = MediaEmbedder::new(
            "http://localhost:0/embed".to_string(),
            "test-key".to_string(),
            "clip-vit-base".to_string(),
            8,
        );
        let err = embedder.embed_text_query("a cat on a mat").await.unwrap_err();
        assert!(matches!(err, RagError::Embed(_)));
    }

    #[test]
    fn test_encode_file_reads_and_encodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"fake-png-bytes").unwrap();
        let input = encode_file(&path).unwrap();
        assert_eq!(input.content_type, "png");
        assert!(!input.data.is_empty());
    }
}
