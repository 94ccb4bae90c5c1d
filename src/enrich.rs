//! Best-effort visual-embedding enrichment.
//!
//! Enrichment runs between the field gate and persistence. It never
//! drops or aborts a record: a record whose image cannot be embedded is
//! persisted with `embedding: None`.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::traits::embedder::ImageEmbedder;
use crate::types::record::PersistableRecord;

/// Retry attempts per image for transient failures.
const MAX_EMBED_ATTEMPTS: u32 = 3;

/// Initial backoff, doubled after each failed attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Images embedded in flight at once.
const EMBED_CONCURRENCY: usize = 4;

/// Counts from one enrichment pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichStats {
    /// Records that received an embedding
    pub embedded: usize,

    /// Records whose embedding failed after retries
    pub failed: usize,
}

/// Attach embeddings to a batch of records in place, a few images in
/// flight at a time.
///
/// Transient failures are retried with doubling backoff; permanent
/// failures are not. Records that already carry an embedding are left
/// untouched.
pub async fn enrich_records(
    embedder: &dyn ImageEmbedder,
    records: &mut [PersistableRecord],
) -> EnrichStats {
    let mut stats = EnrichStats::default();

    let pending: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.embedding.is_none())
        .map(|(i, _)| i)
        .collect();

    let urls: Vec<String> = pending
        .iter()
        .map(|&i| records[i].image_url.clone())
        .collect();

    // buffered() preserves input order, so results line up with pending
    let results: Vec<Option<Vec<f32>>> = stream::iter(urls)
        .map(|url| async move { embed_with_retry(embedder, &url).await })
        .buffered(EMBED_CONCURRENCY)
        .collect()
        .await;

    for (&index, result) in pending.iter().zip(results) {
        match result {
            Some(vector) => {
                records[index].embedding = Some(vector);
                stats.embedded += 1;
            }
            None => {
                stats.failed += 1;
            }
        }
    }

    debug!(
        embedder = embedder.name(),
        embedded = stats.embedded,
        failed = stats.failed,
        "Enrichment pass complete"
    );

    stats
}

async fn embed_with_retry(embedder: &dyn ImageEmbedder, image_url: &str) -> Option<Vec<f32>> {
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_EMBED_ATTEMPTS {
        match embedder.embed(image_url).await {
            Ok(vector) => return Some(vector),
            Err(e) if e.is_transient() && attempt < MAX_EMBED_ATTEMPTS => {
                debug!(image_url, attempt, error = %e, "Transient embed failure, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                warn!(image_url, attempt, error = %e, "Embedding failed, record keeps embedding=None");
                return None;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::into_persistable;
    use crate::testing::MockEmbedder;
    use crate::types::config::SiteConfig;
    use crate::types::record::{CandidateRecord, NormalizedRecord};

    fn record(image_url: &str) -> PersistableRecord {
        let candidate = CandidateRecord::new("https://x.example/p/1", "/p/1")
            .with_title("Item")
            .with_image_url(image_url);
        let normalized = NormalizedRecord::from_candidate(
            candidate,
            &SiteConfig::new("shop", "https://x.example"),
        );
        into_persistable(normalized).unwrap()
    }

    #[tokio::test]
    async fn test_enrich_attaches_embeddings() {
        let embedder = MockEmbedder::new().with_dimension(8);
        let mut records = vec![record("https://cdn.x.example/a.jpg")];

        let stats = enrich_records(&embedder, &mut records).await;

        assert_eq!(stats.embedded, 1);
        assert_eq!(records[0].embedding.as_ref().unwrap().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_then_succeeds() {
        let embedder = MockEmbedder::new()
            .with_dimension(8)
            .failing_transiently("https://cdn.x.example/a.jpg", 2);
        let mut records = vec![record("https://cdn.x.example/a.jpg")];

        let stats = enrich_records(&embedder, &mut records).await;

        assert_eq!(stats.embedded, 1);
        assert_eq!(embedder.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_keeps_record_without_retry() {
        let embedder = MockEmbedder::new().failing("https://cdn.x.example/a.jpg");
        let mut records = vec![record("https://cdn.x.example/a.jpg")];

        let stats = enrich_records(&embedder, &mut records).await;

        assert_eq!(stats.failed, 1);
        assert!(records[0].embedding.is_none());
        // No retries for permanent failures
        assert_eq!(embedder.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_keep_record() {
        let embedder =
            MockEmbedder::new().failing_transiently("https://cdn.x.example/a.jpg", 10);
        let mut records = vec![record("https://cdn.x.example/a.jpg")];

        let stats = enrich_records(&embedder, &mut records).await;

        assert_eq!(stats.failed, 1);
        assert!(records[0].embedding.is_none());
        assert_eq!(embedder.calls().len(), MAX_EMBED_ATTEMPTS as usize);
    }
}
