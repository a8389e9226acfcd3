//! Document store: one row per `ref_doc_id`, the content-derived source id
//! used to detect and skip already-ingested sources (DUPLICATES_ONLY).

use crate::db::Db;
use crate::error::{RagError, Result};
use rusqlite::params;

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub ref_doc_id: String,
    pub space_key: String,
    pub content_hash: String,
    pub doc_path: String,
    pub url: String,
}

/// Fetch a document record by its `ref_doc_id`.
pub async fn get(db: &Db, ref_doc_id: &str) -> Result<Option<DocumentRecord>> {
    let ref_doc_id = ref_doc_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT ref_doc_id, space_key, content_hash, doc_path, url FROM documents WHERE ref_doc_id = ?1",
        )?;
        let mut rows = stmt.query(params![ref_doc_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(DocumentRecord {
                ref_doc_id: row.get(0)?,
                space_key: row.get(1)?,
                content_hash: row.get(2)?,
                doc_path: row.get(3)?,
                url: row.get(4)?,
            }))
        } else {
            Ok(None)
        }
    })
    .await
}

/// True when a document with this `ref_doc_id` already exists with the same
/// content hash, i.e. re-ingesting it would be a no-op under DUPLICATES_ONLY.
pub async fn is_duplicate(db: &Db, ref_doc_id: &str, content_hash: &str) -> Result<bool> {
    Ok(get(db, ref_doc_id)
        .await?
        .is_some_and(|rec| rec.content_hash == content_hash))
}

/// Insert or update a document row, bumping `updated_at`.
pub async fn upsert(db: &Db, record: DocumentRecord) -> Result<()> {
    db.with_connection(move |conn| {
        conn.execute(
            r#"
            INSERT INTO documents (ref_doc_id, space_key, content_hash, doc_path, url, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
            ON CONFLICT(ref_doc_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                doc_path = excluded.doc_path,
                url = excluded.url,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                record.ref_doc_id,
                record.space_key,
                record.content_hash,
                record.doc_path,
                record.url,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Delete a document. `ON DELETE CASCADE` on the node tables' `ref_doc_id`
/// foreign key removes every chunk/media node that pointed at it.
pub async fn delete(db: &Db, ref_doc_id: &str) -> Result<()> {
    let ref_doc_id = ref_doc_id.to_string();
    let rows = db
        .with_connection(move |conn| Ok(conn.execute("DELETE FROM documents WHERE ref_doc_id = ?1", params![ref_doc_id])?))
        .await?;
    if rows == 0 {
        return Err(RagError::NotFound(format!("document {ref_doc_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
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

    fn sample() -> DocumentRecord {
        DocumentRecord {
            ref_doc_id: "doc-1".to_string(),
            space_key: "openai_te3small_te".to_string(),
            content_hash: "hash-a".to_string(),
            doc_path: "/docs/a.pdf".to_string(),
            url: String::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (db, _tmp) = setup_test_db().await;
        upsert(&db, sample()).await.unwrap();
        let got = get(&db, "doc-1").await.unwrap().unwrap();
        assert_eq!(got.content_hash, "hash-a");
    }

    #[tokio::test]
    async fn test_upsert_updates_existing() {
        let (db, _tmp) = setup_test_db().await;
        upsert(&db, sample()).await.unwrap();
        let mut updated = sample();
        updated.content_hash = "hash-b".to_string();
        upsert(&db, updated).await.unwrap();
        let got = get(&db, "doc-1").await.unwrap().unwrap();
        assert_eq!(got.content_hash, "hash-b");
    }

    #[tokio::test]
    async fn test_is_duplicate() {
        let (db, _tmp) = setup_test_db().await;
        upsert(&db, sample()).await.unwrap();
        assert!(is_duplicate(&db, "doc-1", "hash-a").await.unwrap());
        assert!(!is_duplicate(&db, "doc-1", "hash-b").await.unwrap());
        assert!(!is_duplicate(&db, "doc-missing", "hash-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (db, _tmp) = setup_test_db().await;
        let err = delete(&db, "doc-missing").await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let (db, _tmp) = setup_test_db().await;
        upsert(&db, sample()).await.unwrap();
        delete(&db, "doc-1").await.unwrap();
        assert!(get(&db, "doc-1").await.unwrap().is_none());
    }
}
