//! Reader dispatch: turns a source (local path or URL) into zero or more
//! `Document`s. Readers never embed; they only materialize content and
//! populate metadata (`file_path`/`temp_file_path`, `url`, `base_source`,
//! `page_no`, `asset_no`) for the pipeline's modality-split stage.

pub mod file;
pub mod media;
pub mod pdf;
pub mod web;

use crate::config::IngestConfig;
use crate::error::Result;

/// Raw content plus metadata, as produced by a reader, before the pipeline
/// assigns a `ref_doc_id` and splits it into modality-specific nodes.
#[derive(Debug, Clone, Default)]
pub struct Document {
    /// Extracted text, for text/HTML documents. `None` for media documents,
    /// which instead carry a path in `file_path`/`temp_file_path`.
    pub content: Option<String>,
    pub file_path: String,
    pub temp_file_path: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_created_at: String,
    pub file_lastmod_at: String,
    pub url: String,
    pub base_source: String,
    pub page_no: u32,
    pub asset_no: u32,
}

impl Document {
    pub fn text(content: String, file_path: String) -> Self {
        Self {
            content: Some(content),
            file_path,
            ..Default::default()
        }
    }

    pub fn media_path(path: String) -> Self {
        Self {
            file_path: path,
            ..Default::default()
        }
    }

    pub fn media_temp(temp_path: String, base_source: String) -> Self {
        Self {
            temp_file_path: temp_path,
            base_source,
            ..Default::default()
        }
    }
}

/// Dispatches a source to the local-file reader or the web reader based on
/// whether it parses as an `http(s)://` URL.
pub async fn read_source(source: &str, cfg: &IngestConfig) -> Result<Vec<Document>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        web::read_url(source, cfg).await
    } else {
        file::read_path(std::path::Path::new(source), cfg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_text_constructor() {
        let doc = Document::text("hello".to_string(), "/a.txt".to_string());
        assert_eq!(doc.content.as_deref(), Some("hello"));
        assert_eq!(doc.file_path, "/a.txt");
    }

    #[test]
    fn test_document_media_temp_sets_base_source() {
        let doc = Document::media_temp("/tmp/x.png".to_string(), "/a.pdf".to_string());
        assert!(doc.content.is_none());
        assert_eq!(doc.base_source, "/a.pdf");
    }
}
