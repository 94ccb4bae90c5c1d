//! ImageEmbedder trait for the visual-embedding collaborator.

use async_trait::async_trait;

use crate::error::EmbedError;

/// Maps an image reference to a fixed-length numeric vector.
///
/// The embedding backend is an opaque external service. The trait is
/// fallible so the enrichment stage can retry transient failures; the
/// stage itself guarantees downgrade-to-`None` semantics at the record
/// level (an embedding failure never drops or aborts a record).
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    /// Embed a single image by URL.
    async fn embed(&self, image_url: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embedding vector dimension, if fixed and known.
    fn dimension(&self) -> Option<usize> {
        None
    }

    /// Embedder name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}
