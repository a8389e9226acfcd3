//! Text modality store: vector search, BM25 search, and node CRUD against
//! the combined `chunks`/`chunks_fts` tables, partitioned by `space_key`.

use super::{blob_to_vec, cosine_similarity, vec_to_blob, ScoredNode};
use crate::db::Db;
use crate::error::{RagError, Result};
use crate::model::{BasicMetaData, Node, NodePayload};
use rusqlite::params;

/// Insert one text node, skipping it if a node with the same
/// `(space_key, fingerprint)` already exists. Returns whether it was newly
/// inserted; a duplicate fingerprint means identical content, so it is never
/// re-embedded, per the pipeline's fingerprint invariant.
pub async fn insert_node(db: &Db, space_key: &str, node: &Node) -> Result<bool> {
    let text = match &node.payload {
        NodePayload::Text(t) => t.clone(),
        _ => return Err(RagError::Store("insert_node (text) called with a non-text node".into())),
    };
    let id = node.id.clone();
    let ref_doc_id = node.ref_doc_id.clone();
    let space_key = space_key.to_string();
    let fingerprint = node.fingerprint();
    let embedding = node.embedding.as_deref().map(vec_to_blob);
    let meta = node.metadata.clone();

    db.with_connection(move |conn| {
        let changed = conn.execute(
            r#"
            INSERT OR IGNORE INTO chunks (
                id, ref_doc_id, space_key, chunk_no, chunk_text, embedding, fingerprint,
                file_path, file_type, file_size, file_created_at, file_lastmod_at,
                url, base_source, page_no, asset_no
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                id,
                ref_doc_id,
                space_key,
                meta.chunk_no,
                text,
                embedding,
                fingerprint,
                meta.file_path,
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

/// Chunk ids and text lacking a stored embedding for a space, for the
/// `reembed` admin binary's incremental mode.
pub async fn ids_missing_embedding(db: &Db, space_key: &str) -> Result<Vec<(String, String)>> {
    let space_key = space_key.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, chunk_text FROM chunks WHERE space_key = ?1 AND embedding IS NULL",
        )?;
        let rows = stmt
            .query_map(params![space_key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(rows)
    })
    .await
}

/// All chunk ids and text for a space, for `reembed --force`.
pub async fn all_ids_with_text(db: &Db, space_key: &str) -> Result<Vec<(String, String)>> {
    let space_key = space_key.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare("SELECT id, chunk_text FROM chunks WHERE space_key = ?1")?;
        let rows = stmt
            .query_map(params![space_key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(rows)
    })
    .await
}

/// Overwrites the stored embedding for one chunk.
pub async fn update_embedding(db: &Db, id: &str, embedding: &[f32]) -> Result<()> {
    let id = id.to_string();
    let blob = vec_to_blob(embedding);
    db.with_connection(move |conn| {
        conn.execute("UPDATE chunks SET embedding = ?1 WHERE id = ?2", params![blob, id])?;
        Ok(())
    })
    .await
}

/// Insert a batch of text nodes in one transaction. Returns the count of
/// newly-inserted (non-duplicate) nodes.
pub async fn insert_nodes_batch(db: &Db, space_key: &str, nodes: Vec<Node>) -> Result<usize> {
    if nodes.is_empty() {
        return Ok(0);
    }
    let space_key = space_key.to_string();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for node in &nodes {
            let text = match &node.payload {
                NodePayload::Text(t) => t.clone(),
                _ => return Err(RagError::Store("insert_nodes_batch (text) called with a non-text node".into())),
            };
            let meta = &node.metadata;
            let embedding = node.embedding.as_deref().map(vec_to_blob);
            let changed = tx.execute(
                r#"
                INSERT OR IGNORE INTO chunks (
                    id, ref_doc_id, space_key, chunk_no, chunk_text, embedding, fingerprint,
                    file_path, file_type, file_size, file_created_at, file_lastmod_at,
                    url, base_source, page_no, asset_no
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
                params![
                    node.id,
                    node.ref_doc_id,
                    space_key,
                    meta.chunk_no,
                    text,
                    embedding,
                    node.fingerprint(),
                    meta.file_path,
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
            if changed > 0 {
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    })
    .await
}

fn row_to_node(
    id: String,
    ref_doc_id: String,
    chunk_text: String,
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
        text: Some(chunk_text),
    }
}

/// Brute-force cosine similarity search over every embedded chunk in a space.
pub async fn search_vector(
    db: &Db,
    space_key: &str,
    query_vec: &[f32],
    k: usize,
    min_score: f32,
) -> Result<Vec<ScoredNode>> {
    let space_key = space_key.to_string();
    let query_vec = query_vec.to_vec();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, ref_doc_id, chunk_text, embedding, file_path, file_type, file_size,
                   file_created_at, file_lastmod_at, chunk_no, url, base_source, page_no, asset_no
            FROM chunks
            WHERE space_key = ?1 AND embedding IS NOT NULL
            "#,
        )?;
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
                row.get(13)?,
                sim,
            );
            scored.push((sim, node));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, n)| n).collect())
    })
    .await
}

/// Strips FTS5 syntax characters and stop words, then joins remaining terms
/// with OR for recall-oriented matching.
pub fn sanitize_fts5_query(query: &str) -> String {
    const STOP_WORDS: &[&str] = &[
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "should", "could", "what", "which", "who", "where",
        "when", "why", "how", "this", "that", "these", "those",
    ];
    let cleaned: String = query
        .trim()
        .chars()
        .filter(|c| !matches!(c, '?' | '*' | '(' | ')' | '{' | '}' | '-' | '\''))
        .collect();
    let terms: Vec<String> = cleaned
        .split_whitespace()
        .filter(|t| t.len() >= 2 && !STOP_WORDS.contains(&t.to_lowercase().as_str()))
        .map(|t| t.replace('"', "\"\""))
        .collect();
    if terms.is_empty() {
        return cleaned.replace('"', "\"\"");
    }
    terms.join(" OR ")
}

fn normalize_bm25_score(raw_score: f64) -> f32 {
    if raw_score.is_nan() || raw_score.is_infinite() {
        return 0.0;
    }
    (1.0 / (1.0 + raw_score.exp())) as f32
}

/// Full-text search over a single space's chunks via FTS5 BM25 ranking.
pub async fn search_bm25(db: &Db, space_key: &str, query: &str, k: usize) -> Result<Vec<ScoredNode>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let sanitized = sanitize_fts5_query(query);
    let space_key = space_key.to_string();
    let mut results = db
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT c.id, c.ref_doc_id, c.chunk_text, c.file_path, c.file_type, c.file_size,
                       c.file_created_at, c.file_lastmod_at, c.chunk_no, c.url, c.base_source,
                       c.page_no, c.asset_no, bm25(chunks_fts) AS raw_score
                FROM chunks_fts
                JOIN chunks c ON chunks_fts.rowid = c.rowid
                WHERE chunks_fts MATCH ?1 AND c.space_key = ?2
                ORDER BY raw_score
                LIMIT ?3
                "#,
            )?;
            let mut rows = stmt.query(params![sanitized, space_key, k as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let raw_score: f64 = row.get(13)?;
                let node = row_to_node(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                    row.get(11)?,
                    row.get(12)?,
                    normalize_bm25_score(raw_score),
                );
                out.push(node);
            }
            Ok(out)
        })
        .await?;
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(results)
}

/// Delete every chunk for a space whose `base_source` matches, returning the
/// deleted node ids so callers can cascade to the ingest cache.
pub async fn delete_by_base_source(db: &Db, space_key: &str, base_source: &str) -> Result<Vec<String>> {
    let space_key = space_key.to_string();
    let base_source = base_source.to_string();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE space_key = ?1 AND base_source = ?2")?;
            let rows = stmt.query_map(params![space_key, base_source], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        tx.execute(
            "DELETE FROM chunks WHERE space_key = ?1 AND base_source = ?2",
            params![space_key, base_source],
        )?;
        tx.commit()?;
        Ok(ids)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use crate::model::{BasicMetaData, Node, NodePayload};
    use std::path::Path;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Db, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Db::new(&db_path);
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (db, temp_dir)
    }

    async fn insert_doc_row(db: &Db, ref_doc_id: &str) {
        crate::store::document::upsert(
            db,
            crate::store::document::DocumentRecord {
                ref_doc_id: ref_doc_id.to_string(),
                space_key: "sp".to_string(),
                content_hash: "h".to_string(),
                doc_path: "p".to_string(),
                url: String::new(),
            },
        )
        .await
        .unwrap();
    }

    fn text_node(path: &str, chunk_no: u32, text: &str, base_source: &str) -> Node {
        let meta = BasicMetaData {
            file_path: path.to_string(),
            chunk_no,
            base_source: base_source.to_string(),
            ..Default::default()
        };
        Node::new(NodePayload::Text(text.to_string()), meta)
    }

    #[tokio::test]
    async fn test_insert_and_search_vector() {
        let (db, _tmp) = setup_test_db().await;
        let mut node = text_node("/a.txt", 0, "hello world", "/a.txt");
        insert_doc_row(&db, &node.ref_doc_id).await;
        node.embedding = Some(vec![1.0, 0.0, 0.0]);
        assert!(insert_node(&db, "sp", &node).await.unwrap());

        let hits = search_vector(&db, "sp", &[1.0, 0.0, 0.0], 5, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn test_insert_duplicate_fingerprint_is_skipped() {
        let (db, _tmp) = setup_test_db().await;
        let node = text_node("/a.txt", 0, "hello world", "/a.txt");
        insert_doc_row(&db, &node.ref_doc_id).await;
        assert!(insert_node(&db, "sp", &node).await.unwrap());
        assert!(!insert_node(&db, "sp", &node).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_bm25_finds_match() {
        let (db, _tmp) = setup_test_db().await;
        let node = text_node("/a.txt", 0, "rust programming language", "/a.txt");
        insert_doc_row(&db, &node.ref_doc_id).await;
        insert_node(&db, "sp", &node).await.unwrap();

        let hits = search_bm25(&db, "sp", "rust", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.as_ref().unwrap().contains("rust"));
    }

    #[tokio::test]
    async fn test_search_bm25_empty_query_returns_empty() {
        let (db, _tmp) = setup_test_db().await;
        let hits = search_bm25(&db, "sp", "  ", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_base_source() {
        let (db, _tmp) = setup_test_db().await;
        let node_a = text_node("/a.txt", 0, "alpha", "/src/a.txt");
        let node_b = text_node("/a.txt", 1, "beta", "/src/a.txt");
        insert_doc_row(&db, &node_a.ref_doc_id).await;
        insert_node(&db, "sp", &node_a).await.unwrap();
        insert_node(&db, "sp", &node_b).await.unwrap();

        let deleted = delete_by_base_source(&db, "sp", "/src/a.txt").await.unwrap();
        assert_eq!(deleted.len(), 2);
        let hits = search_bm25(&db, "sp", "alpha", 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
