//! Cross-modal media retrievers. Each function encodes a query (a text
//! string or a reference file) into a target modality's vector space via
//! `EmbedManager::{embed_text_as,embed_paths_as}`, then runs a brute-force
//! cosine search against that modality's store. Grounded on
//! `examples/original_source/src/raggify/retrieve/retrieve.py`'s
//! `query_text_image`/`query_image_image`/`*_audio`/`*_video` family and the
//! dedicated audio/video cross-modal retriever shape from
//! `examples/original_source/src/raggify/llama/core/indices/multi_modal/retriever.py`.

use crate::db::Db;
use crate::embed::EmbedManager;
use crate::error::{RagError, Result};
use crate::model::Modality;
use crate::store::{self, ScoredNode};
use std::path::Path;

fn space_key_for(embed: &EmbedManager, modality: Modality) -> Result<String> {
    embed
        .container(modality)
        .map(|c| c.space_key.clone())
        .ok_or_else(|| RagError::UnsupportedCrossModal(format!("embed.{modality} is not configured")))
}

async fn by_text_query(db: &Db, embed: &EmbedManager, target: Modality, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
    let space_key = space_key_for(embed, target)?;
    let query_vec = embed.embed_text_as(target, query).await?;
    store::media::search_vector(db, target, &space_key, &query_vec, top_k, 0.0).await
}

async fn by_file_query(db: &Db, embed: &EmbedManager, target: Modality, path: &Path, top_k: usize) -> Result<Vec<ScoredNode>> {
    let space_key = space_key_for(embed, target)?;
    let query_vec = embed
        .embed_paths_as(target, vec![path.to_path_buf()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| RagError::Embed("no embedding returned for query file".into()))?;
    store::media::search_vector(db, target, &space_key, &query_vec, top_k, 0.0).await
}

/// Text -> Image: retrieve image nodes from a text query via the image
/// space's cross-modal encoder.
pub async fn text_to_image(db: &Db, embed: &EmbedManager, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
    by_text_query(db, embed, Modality::Image, query, top_k).await
}

/// Image -> Image: embed a reference image file and query the image store.
pub async fn image_to_image(db: &Db, embed: &EmbedManager, path: &Path, top_k: usize) -> Result<Vec<ScoredNode>> {
    by_file_query(db, embed, Modality::Image, path, top_k).await
}

/// Text -> Audio.
pub async fn text_to_audio(db: &Db, embed: &EmbedManager, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
    by_text_query(db, embed, Modality::Audio, query, top_k).await
}

/// Audio -> Audio: embed a reference audio file and query the audio store.
pub async fn audio_to_audio(db: &Db, embed: &EmbedManager, path: &Path, top_k: usize) -> Result<Vec<ScoredNode>> {
    by_file_query(db, embed, Modality::Audio, path, top_k).await
}

/// Text -> Video.
pub async fn text_to_video(db: &Db, embed: &EmbedManager, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
    by_text_query(db, embed, Modality::Video, query, top_k).await
}

/// Image -> Video: embed a reference image file against the video space.
pub async fn image_to_video(db: &Db, embed: &EmbedManager, path: &Path, top_k: usize) -> Result<Vec<ScoredNode>> {
    by_file_query(db, embed, Modality::Video, path, top_k).await
}

/// Audio -> Video: embed a reference audio file against the video space.
pub async fn audio_to_video(db: &Db, embed: &EmbedManager, path: &Path, top_k: usize) -> Result<Vec<ScoredNode>> {
    by_file_query(db, embed, Modality::Video, path, top_k).await
}

/// Video -> Video: embed a reference video file and query the video store.
pub async fn video_to_video(db: &Db, embed: &EmbedManager, path: &Path, top_k: usize) -> Result<Vec<ScoredNode>> {
    by_file_query(db, embed, Modality::Video, path, top_k).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_to_image_without_image_container_is_cross_modal_unsupported() {
        let embed = EmbedManager::from_config(&crate::config::EmbedConfig::default()).unwrap();
        let db = crate::db::Db::new(Path::new(":memory:"));
        let err = text_to_image(&db, &embed, "a dog on a beach", 5).await.unwrap_err();
        assert!(matches!(err, RagError::UnsupportedCrossModal(_)));
    }

    #[tokio::test]
    async fn test_image_to_video_without_video_container_is_cross_modal_unsupported() {
        let embed = EmbedManager::from_config(&crate::config::EmbedConfig::default()).unwrap();
        let db = crate::db::Db::new(Path::new(":memory:"));
        let err = image_to_video(&db, &embed, Path::new("/tmp/a.png"), 5).await.unwrap_err();
        assert!(matches!(err, RagError::UnsupportedCrossModal(_)));
    }
}
