//! Text retriever: vector-only, BM25-only, or linear-weighted fusion of the
//! two, per `retrieve.mode`. Grounded on the teacher's `search::hybrid`
//! fusion shape, restructured from reciprocal-rank fusion to the spec's
//! `score_fusion(n) = lambda_v*score_v(n) + lambda_b*score_b(n)`.

use crate::config::Config;
use crate::db::Db;
use crate::embed::EmbedManager;
use crate::error::{RagError, Result};
use crate::model::Modality;
use crate::store::{self, ScoredNode};
use std::collections::HashMap;

fn text_space_key(embed: &EmbedManager) -> Result<String> {
    embed
        .container(Modality::Text)
        .map(|c| c.space_key.clone())
        .ok_or_else(|| RagError::UnsupportedProvider("embed.text is not configured".into()))
}

async fn vector_only(db: &Db, embed: &EmbedManager, space_key: &str, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
    let query_vec = embed.embed_text_query(query).await?;
    store::text::search_vector(db, space_key, &query_vec, top_k, 0.0).await
}

async fn bm25_only(db: &Db, space_key: &str, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
    store::text::search_bm25(db, space_key, query, top_k).await
}

/// `score_fusion(n) = lambda_v*score_v(n) + lambda_b*score_b(n)`, missing
/// side contributes 0. Ties broken by node id so results are deterministic.
fn fuse(
    vector_hits: Vec<ScoredNode>,
    bm25_hits: Vec<ScoredNode>,
    lambda_vector: f32,
    lambda_bm25: f32,
    top_k: usize,
) -> Vec<ScoredNode> {
    let mut combined: HashMap<String, ScoredNode> = HashMap::new();

    for mut hit in vector_hits {
        hit.score *= lambda_vector;
        combined.insert(hit.id.clone(), hit);
    }
    for hit in bm25_hits {
        combined
            .entry(hit.id.clone())
            .and_modify(|existing| existing.score += lambda_bm25 * hit.score)
            .or_insert_with(|| {
                let mut hit = hit;
                hit.score *= lambda_bm25;
                hit
            });
    }

    let mut ranked: Vec<ScoredNode> = combined.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(top_k);
    ranked
}

/// Retrieve text nodes for `query`, dispatching on `cfg.retrieve.mode`.
pub async fn retrieve(db: &Db, embed: &EmbedManager, cfg: &Config, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
    let space_key = text_space_key(embed)?;
    match cfg.retrieve.mode.as_str() {
        "vector_only" => vector_only(db, embed, &space_key, query, top_k).await,
        "bm25_only" => bm25_only(db, &space_key, query, top_k).await,
        _ => {
            let (vector_hits, bm25_hits) = tokio::try_join!(
                vector_only(db, embed, &space_key, query, top_k),
                bm25_only(db, &space_key, query, cfg.retrieve.bm25_topk),
            )?;
            Ok(fuse(
                vector_hits,
                bm25_hits,
                cfg.retrieve.fusion_lambda_vector,
                cfg.retrieve.fusion_lambda_bm25,
                top_k,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BasicMetaData;

    fn node(id: &str, score: f32) -> ScoredNode {
        ScoredNode {
            id: id.to_string(),
            ref_doc_id: format!("{id}-doc"),
            score,
            metadata: BasicMetaData::default(),
            text: Some("x".to_string()),
        }
    }

    #[test]
    fn test_fuse_missing_side_contributes_zero() {
        let vector_hits = vec![node("a", 0.8)];
        let bm25_hits = vec![node("b", 0.6)];
        let fused = fuse(vector_hits, bm25_hits, 1.0, 0.0, 5);
        // bm25's weight is 0, so "b" contributes nothing and sorts behind "a"
        assert_eq!(fused[0].id, "a");
        assert!((fused[0].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_accumulates_overlapping_ids() {
        let vector_hits = vec![node("a", 0.8)];
        let bm25_hits = vec![node("a", 0.4)];
        let fused = fuse(vector_hits, bm25_hits, 0.5, 0.5, 5);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - (0.5 * 0.8 + 0.5 * 0.4)).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_lambda_vector_one_reduces_to_vector_ranking() {
        let vector_hits = vec![node("a", 0.3), node("b", 0.9)];
        let bm25_hits = vec![node("a", 0.99)];
        let fused = fuse(vector_hits, bm25_hits, 1.0, 0.0, 5);
        assert_eq!(fused[0].id, "b");
        assert_eq!(fused[1].id, "a");
    }

    #[test]
    fn test_fuse_ties_broken_by_id() {
        let vector_hits = vec![node("b", 0.5), node("a", 0.5)];
        let fused = fuse(vector_hits, vec![], 1.0, 1.0, 5);
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[1].id, "b");
    }

    #[test]
    fn test_fuse_respects_top_k() {
        let vector_hits = vec![node("a", 0.9), node("b", 0.8), node("c", 0.7)];
        let fused = fuse(vector_hits, vec![], 1.0, 1.0, 2);
        assert_eq!(fused.len(), 2);
    }
}
