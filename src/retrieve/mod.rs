//! Per-modality retrievers. Every retriever returns `Vec<ScoredNode>`
//! (the same hit type the stores already use), highest score first. Text
//! retrieval supports vector/BM25/linear-fusion modes; the media retrievers
//! are cross-modal: a query in one modality (text, or a reference file) is
//! encoded into another modality's vector space and matched there.

pub mod media;
pub mod rerank;
pub mod text;

pub use rerank::RerankManager;

use crate::store::ScoredNode;

/// Apply an optional reranker, falling back to the unreranked order when
/// none is configured. Shared by every retriever so `query` handlers don't
/// need to special-case the "no rerank manager" path themselves.
pub async fn maybe_rerank(
    rerank: Option<&RerankManager>,
    nodes: Vec<ScoredNode>,
    query: &str,
    top_k: usize,
) -> crate::error::Result<Vec<ScoredNode>> {
    match rerank {
        Some(r) => r.rerank(nodes, query, top_k).await,
        None => Ok(nodes),
    }
}
