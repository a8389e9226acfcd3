//! Non-text modality stores: `image_nodes`/`audio_nodes`/`video_nodes` are
//! structurally identical (vector + meta combined, no BM25 corpus), so one
//! implementation dispatches on the table name instead of repeating the
//! schema three times.

use super::{blob_to_vec, cosine_similarity, vec_to_blob, ScoredNode};
use crate::db::Db;
use crate::error::{RagError, Result};
use crate::model::{BasicMetaData, Modality, Node, NodePayload};
use rusqlite::params;

fn table_name(modality: Modality) -> Result<&'static str> {
    match modality {
        Modality::Image => Ok("image_nodes"),
        Modality::Audio => Ok("audio_nodes"),
        Modality::Video => Ok("video_nodes"),
        Modality::Text => Err(RagError::Store("media store does not handle Modality::Text".into())),
    }
}

fn payload_path(node: &Node) -> Result<String> {
    match &node.payload {
        NodePayload::Image(p) | NodePayload::Audio(p) | NodePayload::Video(p) => {
            Ok(p.to_string_lossy().into_owned())
        }
        NodePayload::Text(_) => Err(RagError::Store("media insert_node called with a text node".into())),
    }
}

/// Insert one media node, skipping it if `(space_key, fingerprint)` already
/// exists. Returns whether it was newly inserted.
pub async fn insert_node(db: &Db, modality: Modality, space_key: &str, node: &Node) -> Result<bool> {
    let table = table_name(modality)?;
    let file_path = payload_path(node)?;
    let id = node.id.clone();
    let ref_doc_id = node.ref_doc_id.clone();
    let space_key = space_key.to_string();
    let fingerprint = node.fingerprint();
    let embedding = node.embedding.as_deref().map(vec_to_blob);
    let meta = node.metadata.clone();
    let sql = format!(
        r#"
        INSERT OR IGNORE INTO {table} (
            id, ref_doc_id, space_key, chunk_no, file_path, embedding, fingerprint,
            file_type, file_size, file_created_at, file_lastmod_at,
            url, base_source, page_no, asset_no
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#
    );

    db.with_connection(move |conn| {
        let changed = conn.execute(
            &sql,
            params![
                id,
                ref_doc_id,
                space_key,
                meta.chunk_no,
                file_path,
                embedding,
                fingerprint,
                meta.file_type,
                meta.file_size as i64,
                meta.file_created_at,
                meta.file_lastmod_at,
                meta.url,
                meta.base_source,
                meta.page_no,
                meta.asset_no,
            ],
        )?;
        Ok(changed > 0)
    })
    .await
}

/// Node ids and file paths lacking a stored embedding for a space, for the
/// `reembed` admin binary's incremental mode.
pub async fn ids_missing_embedding(db: &Db, modality: Modality, space_key: &str) -> Result<Vec<(String, String)>> {
    let table = table_name(modality)?;
    let space_key = space_key.to_string();
    let sql = format!("SELECT id, file_path FROM {table} WHERE space_key = ?1 AND embedding IS NULL");
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![space_key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(rows)
    })
    .await
}

/// All node ids and file paths for a space, for `reembed --force`.
pub async fn all_ids_with_path(db: &Db, modality: Modality, space_key: &str) -> Result<Vec<(String, String)>> {
    let table = table_name(modality)?;
    let space_key = space_key.to_string();
    let sql = format!("SELECT id, file_path FROM {table} WHERE space_key = ?1");
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![space_key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(rows)
    })
    .await
}

/// Overwrites the stored embedding for one media node.
pub async fn update_embedding(db: &Db, modality: Modality, id: &str, embedding: &[f32]) -> Result<()> {
    let table = table_name(modality)?;
    let id = id.to_string();
    let blob = vec_to_blob(embedding);
    let sql = format!("UPDATE {table} SET embedding = ?1 WHERE id = ?2");
    db.with_connection(move |conn| {
        conn.execute(&sql, params![blob, id])?;
        Ok(())
    })
    .await
}

fn row_to_node(
    id: String,
    ref_doc_id: String,
    file_path: String,
    file_type: String,
    file_size: i64,
    file_created_at: String,
    file_lastmod_at: String,
    chunk_no: u32,
    url: String,
    base_source: String,
    page_no: u32,
    asset_no: u32,
    score: f32,
) -> ScoredNode {
    ScoredNode {
        id,
        ref_doc_id,
        score,
        metadata: BasicMetaData {
            file_path,
            file_type,
            file_size: file_size as u64,
            file_created_at,
            file_lastmod_at,
            chunk_no,
            url,
            base_source,
            temp_file_path: String::new(),
            page_no,
            asset_no,
        },
        text: None,
    }
}

/// Brute-force cosine similarity search over every embedded node in a space.
pub async fn search_vector(
    db: &Db,
    modality: Modality,
    space_key: &str,
    query_vec: &[f32],
    k: usize,
    min_score: f32,
) -> Result<Vec<ScoredNode>> {
    let table = table_name(modality)?;
    let sql = format!(
        r#"
        SELECT id, ref_doc_id, file_path, embedding, file_type, file_size,
               file_created_at, file_lastmod_at, chunk_no, url, base_source, page_no, asset_no
        FROM {table}
        WHERE space_key = ?1 AND embedding IS NOT NULL
        "#
    );
    let space_key = space_key.to_string();
    let query_vec = query_vec.to_vec();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![space_key])?;
        let mut scored: Vec<(f32, ScoredNode)> = Vec::new();
        while let Some(row) = rows.next()? {
            let embedding_blob: Vec<u8> = row.get(3)?;
            let embedding = match blob_to_vec(&embedding_blob) {
                Some(e) => e,
                None => continue,
            };
            let sim = cosine_similarity(&query_vec, &embedding);
            if sim < min_score {
                continue;
            }
            let node = row_to_node(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
                row.get(11)?,
                row.get(12)?,
                sim,
            );
            scored.push((sim, node));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, n)| n).collect())
    })
    .await
}

/// Delete every node for a space whose `base_source` matches, returning the
/// deleted node ids so callers can cascade to the ingest cache.
pub async fn delete_by_base_source(
    db: &Db,
    modality: Modality,
    space_key: &str,
    base_source: &str,
) -> Result<Vec<String>> {
    let table = table_name(modality)?;
    let select_sql = format!("SELECT id FROM {table} WHERE space_key = ?1 AND base_source = ?2");
    let delete_sql = format!("DELETE FROM {table} WHERE space_key = ?1 AND base_source = ?2");
    let space_key = space_key.to_string();
    let base_source = base_source.to_string();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare(&select_sql)?;
            let rows = stmt.query_map(params![space_key, base_source], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        tx.execute(&delete_sql, params![space_key, base_source])?;
        tx.commit()?;
        Ok(ids)
    })
    .await
}
