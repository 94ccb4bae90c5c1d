//! Typed errors for the harvesting library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Errors that can occur during a harvest run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Content source operation failed
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Persistence sink failed
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Site configuration is missing or invalid
    #[error("config error: {0}")]
    Config(String),

    /// JSON parsing error (config files)
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Config file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while interacting with a content source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Navigation timed out
    #[error("timeout loading: {url}")]
    Timeout { url: String },

    /// Locator could not be parsed or evaluated
    #[error("bad locator: {0}")]
    BadLocator(String),

    /// Element handle no longer resolves to a live element
    #[error("stale element handle")]
    StaleElement,

    /// Trigger action failed on the element
    #[error("trigger failed: {0}")]
    TriggerFailed(String),

    /// Source cannot trigger reveal actions (static documents)
    #[error("trigger not supported by this source")]
    TriggerUnsupported,

    /// No document loaded yet; navigate first
    #[error("no document loaded")]
    NoDocument,
}

/// Errors that can occur while persisting records.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Sink backend unavailable or request failed
    #[error("sink unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A chunk was rejected by the backend
    #[error("chunk rejected: {reason}")]
    ChunkRejected { reason: String },
}

/// Errors from the image embedding collaborator.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Transient failure; caller may retry
    #[error("transient embed failure: {0}")]
    Transient(String),

    /// Permanent failure for this image; do not retry
    #[error("permanent embed failure: {0}")]
    Permanent(String),
}

impl EmbedError {
    /// Whether retrying this failure could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

/// Result type alias for harvest operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for content source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type alias for sink operations.
pub type SinkResult<T> = std::result::Result<T, SinkError>;
