//! Persisted state: one document store (dedup) plus one vector/meta/BM25
//! store per modality (`text`, partitioned `chunks`/`chunks_fts`; `media`,
//! partitioned `image_nodes`/`audio_nodes`/`video_nodes`), and the
//! transform-keyed ingest cache used for resumable runs.

pub mod document;
pub mod ingest_cache;
pub mod media;
pub mod text;

use crate::model::{BasicMetaData, Modality};

/// A scored hit from either the text or a media store, normalized so
/// retrievers don't need to know which table it came from.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub id: String,
    pub ref_doc_id: String,
    pub score: f32,
    pub metadata: BasicMetaData,
    /// Chunk text, present only for text-modality hits.
    pub text: Option<String>,
}

pub(crate) fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Fan-out delete for every node whose `base_source` matches, scoped to a
/// single modality's space. Cascades to the ingest cache so resumability
/// state doesn't outlive the nodes it was keyed against.
pub async fn delete_by_base_source(
    db: &crate::db::Db,
    modality: Modality,
    space_key: &str,
    base_source: &str,
) -> crate::error::Result<usize> {
    let deleted_ids = match modality {
        Modality::Text => text::delete_by_base_source(db, space_key, base_source).await?,
        other => media::delete_by_base_source(db, other, space_key, base_source).await?,
    };
    for id in &deleted_ids {
        ingest_cache::delete_by_node_id(db, id).await?;
    }
    Ok(deleted_ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_round_trip() {
        let v = vec![0.1f32, -2.5, 3.333];
        let blob = vec_to_blob(&v);
        let back = blob_to_vec(&blob).unwrap();
        assert_eq!(v.len(), back.len());
        for (a, b) in v.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_blob_to_vec_rejects_misaligned_length() {
        assert!(blob_to_vec(&[0u8, 1, 2]).is_none());
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }
}
