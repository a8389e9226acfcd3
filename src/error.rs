use thiserror::Error;

/// Main error type for raggify
#[derive(Error, Debug)]
pub enum RagError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding provider errors (HTTP, dimension mismatch, unsupported modality)
    #[error("Embedding error: {0}")]
    Embed(String),

    /// Reader/parsing errors for a specific source
    #[error("Reader error: {0}")]
    Reader(String),

    /// Ingestion pipeline errors (chunking, indexing, transactional commit)
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Vector/document/meta/ingest-cache store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Requested document, node, or job does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied input is invalid
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A cross-modal query pair is not supported by the configured embedders
    #[error("Unsupported cross-modal query: {0}")]
    UnsupportedCrossModal(String),

    /// An embed/rerank provider name is not recognized
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
}

/// Convenient Result type using RagError
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let rag_err: RagError = rusqlite_err.into();
        assert!(matches!(rag_err, RagError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let rag_err: RagError = io_err.into();
        assert!(matches!(rag_err, RagError::Io(_)));
    }

    #[test]
    fn test_unsupported_cross_modal_display() {
        let err = RagError::UnsupportedCrossModal("audio_video".to_string());
        assert!(err.to_string().contains("audio_video"));
    }
}
