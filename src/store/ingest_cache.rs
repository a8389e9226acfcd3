//! Transformation-indexed resumability cache: `cache_key = hash(transform) +
//! ":" + node_id`, so a resumed ingestion run can skip nodes it already
//! transformed (parsed, chunked, embedded) without re-doing the work.

use crate::db::Db;
use crate::error::Result;
use rusqlite::params;

pub fn make_cache_key(transform_hash: &str, node_id: &str) -> String {
    format!("{transform_hash}:{node_id}")
}

pub async fn get(db: &Db, cache_key: &str) -> Result<Option<Vec<u8>>> {
    let cache_key = cache_key.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare("SELECT payload FROM ingest_cache WHERE cache_key = ?1")?;
        let mut rows = stmt.query(params![cache_key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    })
    .await
}

pub async fn put(db: &Db, cache_key: &str, space_key: &str, payload: Vec<u8>) -> Result<()> {
    let cache_key = cache_key.to_string();
    let space_key = space_key.to_string();
    db.with_connection(move |conn| {
        conn.execute(
            r#"
            INSERT INTO ingest_cache (cache_key, space_key, payload, updated_at)
            VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
            ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![cache_key, space_key, payload],
        )?;
        Ok(())
    })
    .await
}

/// Escapes `%`, `_`, and `\` so a node id can be safely embedded in a LIKE
/// pattern without its characters being treated as wildcards.
fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Delete every cache entry keyed against a given node id, regardless of
/// which transform hash produced it.
pub async fn delete_by_node_id(db: &Db, node_id: &str) -> Result<()> {
    let pattern = format!("%:{}", escape_like(node_id));
    db.with_connection(move |conn| {
        conn.execute("DELETE FROM ingest_cache WHERE cache_key LIKE ?1 ESCAPE '\\'", params![pattern])?;
        Ok(())
    })
    .await
}

/// Drop every cache entry for a space (e.g. when its embed container's
/// config changes and cached transforms are no longer valid).
pub async fn clear_space(db: &Db, space_key: &str) -> Result<usize> {
    let space_key = space_key.to_string();
    db.with_connection(move |conn| Ok(conn.execute("DELETE FROM ingest_cache WHERE space_key = ?1", params![space_key])?))
        .await
}
