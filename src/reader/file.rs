//! Local-file reader dispatch, generalizing the teacher's
//! `ingest::parsers::ParserRegistry` extension-lookup pattern to media
//! readers as well as text.

use super::Document;
use crate::config::IngestConfig;
use crate::error::{RagError, Result};
use crate::model::{exts, Modality};
use std::path::Path;
use std::time::SystemTime;

fn file_stamps(path: &Path) -> (u64, String, String) {
    let meta = std::fs::metadata(path).ok();
    let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
    let to_iso = |t: std::io::Result<SystemTime>| -> String {
        t.ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| chrono::DateTime::<chrono::Utc>::from_timestamp(d.as_secs() as i64, 0))
            .flatten()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    };
    let created = meta.as_ref().map(|m| to_iso(m.created())).unwrap_or_default();
    let modified = meta.as_ref().map(|m| to_iso(m.modified())).unwrap_or_default();
    (size, created, modified)
}

/// Reads a local path, dispatching by extension: `.pdf` to the PDF reader,
/// known audio/video extensions to the media converter, known image
/// extensions to a pass-through Document, everything else to the default
/// text reader.
pub async fn read_path(path: &Path, cfg: &IngestConfig) -> Result<Vec<Document>> {
    if !path.exists() {
        return Err(RagError::Reader(format!("source does not exist: {}", path.display())));
    }
    let uri = path.to_string_lossy().to_string();
    let ext = exts::get_ext(&uri);

    if ext == exts::PDF {
        return super::pdf::read_pdf(path);
    }
    if let Some(modality) = exts::classify(&uri) {
        return match modality {
            Modality::Audio => super::media::read_audio(path, cfg).await,
            Modality::Video => super::media::read_video(path, cfg).await,
            Modality::Image => Ok(vec![stamped(Document::media_path(uri.clone()), path, &ext)]),
            Modality::Text => unreachable!("classify() never returns Text"),
        };
    }
    read_text_file(path)
}

fn stamped(mut doc: Document, path: &Path, ext: &str) -> Document {
    let (size, created, modified) = file_stamps(path);
    doc.file_size = size;
    doc.file_created_at = created;
    doc.file_lastmod_at = modified;
    doc.file_type = ext.trim_start_matches('.').to_string();
    doc
}

/// Default text reader: any extension not recognized as a multimodal asset
/// falls through here. The pipeline's chunker (via `ingest::parsers`) is
/// responsible for structure-aware splitting; this reader just materializes
/// the raw content.
fn read_text_file(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RagError::Reader(format!("failed to read {}: {e}", path.display())))?;
    let uri = path.to_string_lossy().to_string();
    let ext = exts::get_ext(&uri);
    let doc = stamped(Document::text(content, uri), path, &ext);
    Ok(vec![doc])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_path_missing_source_errors() {
        let cfg = IngestConfig::default();
        let err = read_path(Path::new("/nonexistent/file.txt"), &cfg).await.unwrap_err();
        assert!(matches!(err, RagError::Reader(_)));
    }

    #[tokio::test]
    async fn test_read_path_text_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();
        let cfg = IngestConfig::default();
        let docs = read_path(&path, &cfg).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content.as_deref(), Some("hello world"));
        assert_eq!(docs[0].file_type, "txt");
    }

    #[tokio::test]
    async fn test_read_path_image_is_pass_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"\x89PNG").unwrap();
        let cfg = IngestConfig::default();
        let docs = read_path(&path, &cfg).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.is_none());
        assert!(docs[0].file_path.ends_with("a.png"));
    }
}
