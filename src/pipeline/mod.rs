//! The ingestion pipeline: turns reader `Document`s into persisted `Node`s
//! under dedup and resumability guarantees. Stage order follows
//! `reader::read_source` → ref_doc_id assignment → docstore dup filter →
//! modality split → chunk indexing → embedding → temp-file cleanup →
//! transactional commit → cache persist, adapted from the teacher's
//! `ingest::mod::ingest_file` orchestration (parse → chunk → insert) to the
//! multimodal node pipeline.

mod chunk_text;

use crate::config::Config;
use crate::db::Db;
use crate::embed::EmbedManager;
use crate::error::{RagError, Result};
use crate::model::{exts, BasicMetaData, Modality, Node, NodePayload};
use crate::reader::{self, Document};
use crate::store;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Outcome of one `ingest_source` call.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub nodes_written: usize,
    pub skipped_duplicate_source: bool,
    pub canceled: bool,
}

/// Polled between pipeline stages and batches. `true` triggers a best-effort
/// ordered shutdown: the current batch's writes still complete (to preserve
/// the per-store commit invariant), then the pipeline stops.
pub trait Cancellation: Send + Sync {
    fn is_canceled(&self) -> bool;
}

impl<F: Fn() -> bool + Send + Sync> Cancellation for F {
    fn is_canceled(&self) -> bool {
        self()
    }
}

struct PendingNode {
    payload: NodePayload,
    metadata: BasicMetaData,
}

/// Ingests one source (local path or URL) end to end. One call is one
/// "physical source": readers may expand it into many Documents (PDF pages,
/// HTML page + assets, audio/video segments), but they all share a single
/// `ref_doc_id` and are re-numbered into one contiguous `chunk_no` sequence.
pub async fn ingest_source(
    db: &Db,
    embed: &EmbedManager,
    source: &str,
    cfg: &Config,
    cancel: &dyn Cancellation,
) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();

    let documents = reader::read_source(source, &cfg.ingest).await?;
    if documents.is_empty() {
        return Ok(report);
    }

    // Stage 1: assign ref_doc_id from the source's own identity (not the
    // per-Document temp paths, so split media/assets all group under one id).
    let primary = &documents[0];
    let source_meta = BasicMetaData {
        file_path: primary.file_path.clone(),
        url: primary.url.clone(),
        file_size: primary.file_size,
        file_lastmod_at: primary.file_lastmod_at.clone(),
        ..Default::default()
    };
    let ref_doc_id = source_meta.ref_doc_id();
    let text_space_key = embed
        .container(Modality::Text)
        .map(|c| c.space_key.clone())
        .unwrap_or_default();

    // Stage 2: docstore duplicate filter (DUPLICATES_ONLY).
    let content_hash = hash_documents(&documents);
    if store::document::is_duplicate(db, &ref_doc_id, &content_hash).await? {
        report.skipped_duplicate_source = true;
        return Ok(report);
    }

    if cancel.is_canceled() {
        report.canceled = true;
        return Ok(report);
    }

    // Stage 3: modality split + per-document text chunking.
    let mut pending = Vec::new();
    for doc in &documents {
        pending.extend(split_document(doc, cfg)?);
    }

    // Stage 5: chunk indexing — one contiguous sequence across the source.
    for (i, p) in pending.iter_mut().enumerate() {
        p.metadata.chunk_no = i as u32;
    }

    // Stage 6: optional summarization. Concrete LLM summarizer providers are
    // out of scope; when configured we log that the hook fired and degrade
    // to the original text, matching the "failures degrade to original text"
    // rule for the (currently unimplemented) general case.
    if cfg.llm.text_model.is_some() {
        log::debug!("pipeline: llm.text_model configured but no summarizer provider is wired; passing text through unchanged");
    }

    let mut nodes: Vec<Node> = pending
        .into_iter()
        .map(|p| Node::new(p.payload, p.metadata))
        .collect();

    // Fingerprint dedup within this batch: two nodes with equal fingerprints
    // are the same content and must not both be embedded.
    let mut seen_fingerprints = std::collections::HashSet::new();
    nodes.retain(|n| seen_fingerprints.insert(n.fingerprint()));

    if cancel.is_canceled() {
        report.canceled = true;
        return Ok(report);
    }

    // Stage 7: embedding, grouped by (post-fallback) modality. `space_keys`
    // records which space each node was actually embedded into — for a
    // video node embedded through the image fallback this is the image
    // container's space key, not `embed.video`'s (which doesn't exist).
    let space_keys = embed_nodes(embed, &mut nodes, cfg).await?;

    // Stage 8: temp-file cleanup.
    for node in &mut nodes {
        if !node.metadata.temp_file_path.is_empty() {
            let _ = std::fs::remove_file(&node.metadata.temp_file_path);
            node.metadata.file_path = node.metadata.base_source.clone();
            node.metadata.temp_file_path.clear();
        }
    }

    // Stage 9: commit (vector+meta in one row per store's schema; cache keyed
    // by transform hash). The storage table is chosen by the node's own
    // modality (a video node stays in `video_nodes` even when it was
    // embedded via the image fallback); the space_key partition is whatever
    // container actually produced the embedding.
    for (node, space_key) in nodes.iter().zip(space_keys.iter()) {
        let modality = node.modality();
        let inserted = match modality {
            Modality::Text => store::text::insert_node(db, space_key, node).await?,
            other => store::media::insert_node(db, other, space_key, node).await?,
        };
        if inserted {
            report.nodes_written += 1;
            if let Some(embedding) = &node.embedding {
                let cache_key = store::ingest_cache::make_cache_key(&node.fingerprint(), &node.id);
                store::ingest_cache::put(db, &cache_key, space_key, store::vec_to_blob(embedding)).await?;
            }
        }
    }

    store::document::upsert(
        db,
        store::document::DocumentRecord {
            ref_doc_id,
            space_key: text_space_key,
            content_hash,
            doc_path: primary.file_path.clone(),
            url: primary.url.clone(),
        },
    )
    .await?;

    // Stage 10: cache persist. Backed by SQLite, so every `put` above is
    // already durable; nothing further to flush.
    log::debug!("pipeline: ingested {} ({} nodes)", source, report.nodes_written);

    Ok(report)
}

fn hash_documents(documents: &[Document]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        if let Some(content) = &doc.content {
            hasher.update(content.as_bytes());
        } else {
            hasher.update(doc.file_path.as_bytes());
            hasher.update(doc.temp_file_path.as_bytes());
        }
        hasher.update([0u8]); // document separator
    }
    hex::encode(hasher.finalize())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Splits one reader Document into one or more pending nodes: a generic text
/// Document is run through chunk_text's sliding window; anything already
/// granular (a PDF page, an image/audio/video asset) becomes a single node.
fn split_document(doc: &Document, cfg: &Config) -> Result<Vec<PendingNode>> {
    let uri = if !doc.file_path.is_empty() {
        doc.file_path.as_str()
    } else if !doc.temp_file_path.is_empty() {
        doc.temp_file_path.as_str()
    } else {
        doc.url.as_str()
    };
    let modality = exts::classify(uri);

    let base_meta = |metadata_overrides: &Document| BasicMetaData {
        file_path: metadata_overrides.file_path.clone(),
        file_type: metadata_overrides.file_type.clone(),
        file_size: metadata_overrides.file_size,
        file_created_at: metadata_overrides.file_created_at.clone(),
        file_lastmod_at: metadata_overrides.file_lastmod_at.clone(),
        chunk_no: 0,
        url: metadata_overrides.url.clone(),
        base_source: metadata_overrides.base_source.clone(),
        temp_file_path: metadata_overrides.temp_file_path.clone(),
        page_no: metadata_overrides.page_no,
        asset_no: metadata_overrides.asset_no,
    };

    match modality {
        None => {
            let Some(content) = &doc.content else {
                return Err(RagError::Reader(format!(
                    "document with no recognized media extension carries no text: {uri}"
                )));
            };
            let pieces = chunk_text::split(content, cfg.ingest.chunk_size, cfg.ingest.chunk_overlap);
            Ok(pieces
                .into_iter()
                .map(|text| PendingNode {
                    payload: NodePayload::Text(text),
                    metadata: base_meta(doc),
                })
                .collect())
        }
        Some(modality) => {
            let path = if !doc.file_path.is_empty() {
                doc.file_path.clone()
            } else {
                doc.temp_file_path.clone()
            };
            let payload = match modality {
                Modality::Image => NodePayload::Image(PathBuf::from(path)),
                Modality::Audio => NodePayload::Audio(PathBuf::from(path)),
                Modality::Video => NodePayload::Video(PathBuf::from(path)),
                Modality::Text => unreachable!(),
            };
            Ok(vec![PendingNode {
                payload,
                metadata: base_meta(doc),
            }])
        }
    }
}

/// Embeds every node and returns the space_key it was actually embedded
/// into, aligned by index with `nodes`.
async fn embed_nodes(embed: &EmbedManager, nodes: &mut [Node], cfg: &Config) -> Result<Vec<String>> {
    let mut space_keys = vec![String::new(); nodes.len()];

    for modality in Modality::all() {
        let indices: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.modality() == modality)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            continue;
        }

        // When no video container is configured and fallback is enabled,
        // embed video nodes through the image backend instead of erroring;
        // they are still committed to the video table by the caller
        // (`node.modality()` still reads Video from the unchanged payload —
        // only the *embedding call* and resulting space_key are redirected).
        let use_image_fallback =
            modality == Modality::Video && !embed.has_video_container() && cfg.embed.use_modality_fallback;
        if modality == Modality::Video && !embed.has_video_container() && !cfg.embed.use_modality_fallback {
            return Err(RagError::UnsupportedProvider(
                "embed.video is not configured and use_modality_fallback is disabled".into(),
            ));
        }

        let embed_modality = if use_image_fallback { Modality::Image } else { modality };
        let space_key = embed
            .container(embed_modality)
            .map(|c| c.space_key.clone())
            .ok_or_else(|| RagError::UnsupportedProvider(format!("embed.{embed_modality} is not configured")))?;

        let vectors = if modality == Modality::Text {
            let inputs: Vec<String> = indices
                .iter()
                .map(|&i| match &nodes[i].payload {
                    NodePayload::Text(t) => t.clone(),
                    _ => unreachable!(),
                })
                .collect();
            embed.embed_text(inputs).await?
        } else {
            let paths: Vec<PathBuf> = indices
                .iter()
                .map(|&i| match &nodes[i].payload {
                    NodePayload::Image(p) | NodePayload::Audio(p) | NodePayload::Video(p) => p.clone(),
                    _ => unreachable!(),
                })
                .collect();
            match embed_modality {
                Modality::Image => embed.embed_image(paths).await?,
                Modality::Audio => embed.embed_audio(paths).await?,
                Modality::Video => embed.embed_video(paths).await?,
                Modality::Text => unreachable!(),
            }
        };

        if vectors.len() != indices.len() {
            return Err(RagError::Pipeline(format!(
                "embedding count mismatch for {modality}: sent {} inputs, got {} vectors back",
                indices.len(),
                vectors.len()
            )));
        }

        for (idx, vector) in indices.into_iter().zip(vectors.into_iter()) {
            nodes[idx].embedding = Some(vector);
            space_keys[idx] = space_key.clone();
        }
    }
    Ok(space_keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_documents_stable_for_equal_content() {
        let a = vec![Document::text("hello".into(), "/a.txt".into())];
        let b = vec![Document::text("hello".into(), "/a.txt".into())];
        assert_eq!(hash_documents(&a), hash_documents(&b));
    }

    #[test]
    fn test_hash_documents_differs_on_content_change() {
        let a = vec![Document::text("hello".into(), "/a.txt".into())];
        let b = vec![Document::text("goodbye".into(), "/a.txt".into())];
        assert_ne!(hash_documents(&a), hash_documents(&b));
    }

    #[test]
    fn test_split_document_text_applies_chunking() {
        let doc = Document::text("a ".repeat(500), "/a.txt".into());
        let cfg = test_config();
        let pending = split_document(&doc, &cfg).unwrap();
        assert!(pending.len() >= 2);
    }

    #[test]
    fn test_split_document_image_is_single_node() {
        let mut doc = Document::media_path("/a.png".into());
        doc.file_path = "/a.png".into();
        let cfg = test_config();
        let pending = split_document(&doc, &cfg).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].payload, NodePayload::Image(_)));
    }

    fn test_config() -> Config {
        serde_yaml_ng::from_str("ingest:\n  chunk_size: 200\n  chunk_overlap: 20\n").unwrap()
    }
}
