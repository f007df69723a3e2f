/// Result type alias for metadata operations
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Errors raised while fetching now-playing metadata or artwork.
///
/// None of these escape a pipeline task: callers log them and treat the
/// cycle as "no update".
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown metadata provider: {0}")]
    UnknownProvider(String),
}
