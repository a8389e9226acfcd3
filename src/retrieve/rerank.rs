//! Optional rerank postprocessor. Grounded on the teacher's generic
//! HTTP-provider-container pattern (`embed::media::MediaEmbedder`): one
//! request/response contract any `POST {model, query, documents, top_n}`
//! rerank provider speaks, same shape as Cohere/Voyage rerank endpoints.
//! Absent `rerank.provider`/`rerank.model`, `from_config` returns `None` and
//! retrievers pass results through unchanged.

use crate::config::RerankConfig;
use crate::error::{RagError, Result};
use crate::store::ScoredNode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

pub struct RerankManager {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

fn rerank_endpoint(provider: &str) -> String {
    std::env::var(format!("{}_RERANK_ENDPOINT", provider.to_uppercase()))
        .unwrap_or_else(|_| "http://localhost:8091/v1/rerank".to_string())
}

impl RerankManager {
    /// `None` when rerank is not configured (the common case); `Some` wraps
    /// the provider client once its env-sourced API key has been resolved.
    pub fn from_config(cfg: &RerankConfig) -> Result<Option<Self>> {
        let (Some(provider), Some(model)) = (cfg.provider.as_ref(), cfg.model.as_ref()) else {
            return Ok(None);
        };
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| RagError::Config(format!("{} not set for rerank.{provider}", cfg.api_key_env)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagError::Config(format!("failed to build rerank HTTP client: {e}")))?;
        Ok(Some(Self {
            client,
            endpoint: rerank_endpoint(provider),
            api_key,
            model: model.clone(),
        }))
    }

    /// Rerank `nodes` against `query`. Overrides the provider's `top_n` to
    /// the caller's `top_k` for this call only; nothing is mutated beyond
    /// the returned vector, so there is nothing to restore.
    pub async fn rerank(&self, nodes: Vec<ScoredNode>, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
        if nodes.is_empty() {
            return Ok(nodes);
        }

        let documents: Vec<String> = nodes.iter().map(|n| n.text.clone().unwrap_or_default()).collect();
        let request = RerankRequest {
            model: &self.model,
            query,
            documents: &documents,
            top_n: top_k,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embed(format!("rerank network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RagError::Embed(format!("rerank provider error {status}: {body}")));
        }

        let result: RerankResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embed(format!("failed to parse rerank response: {e}")))?;

        let mut reranked = Vec::with_capacity(result.results.len());
        for hit in result.results {
            if let Some(node) = nodes.get(hit.index) {
                let mut node = node.clone();
                node.score = hit.relevance_score;
                reranked.push(node);
            }
        }
        Ok(reranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_none_when_provider_unset() {
        let cfg = RerankConfig::default();
        assert!(RerankManager::from_config(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_from_config_errors_when_api_key_missing() {
        let cfg = RerankConfig {
            provider: Some("cohere".to_string()),
            model: Some("rerank-v3".to_string()),
            topk: 10,
            api_key_env: "RAGGIFY_TEST_RERANK_KEY_UNSET".to_string(),
        };
        let err = RerankManager::from_config(&cfg).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[tokio::test]
    async fn test_rerank_empty_nodes_short_circuits() {
        let cfg = RerankConfig {
            provider: Some("cohere".to_string()),
            model: Some("rerank-v3".to_string()),
            topk: 10,
            api_key_env: "RAGGIFY_TEST_RERANK_KEY_EMPTY".to_string(),
        };
        std::env::set_var("RAGGIFY_TEST_RERANK_KEY_EMPTY", "key");
        let manager = RerankManager::from_config(&cfg).unwrap().unwrap();
        let result = manager.rerank(Vec::new(), "query", 5).await.unwrap();
        assert!(result.is_empty());
        std::env::remove_var("RAGGIFY_TEST_RERANK_KEY_EMPTY");
    }
}
