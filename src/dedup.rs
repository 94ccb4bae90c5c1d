//! Deduplication and chunked, failure-isolated persistence.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::traits::sink::RecordSink;
use crate::types::record::PersistableRecord;

/// Default records per upsert chunk, balancing request size against
/// round-trip overhead.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Outcome of persisting one batch.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    /// Unique records after dedup
    pub total_unique: usize,

    /// Duplicates removed within the batch
    pub duplicates_removed: usize,

    /// Chunks attempted against the sink
    pub chunks_attempted: usize,

    /// Chunks the sink accepted
    pub chunks_succeeded: usize,

    /// Records the sink reported written
    pub records_written: u64,

    /// Chunk index and error text for each failed chunk
    pub failed_chunks: Vec<(usize, String)>,
}

impl UpsertReport {
    /// True for an empty batch (nothing to do) or when at least one
    /// chunk made it through; false only when everything failed.
    pub fn is_success(&self) -> bool {
        self.chunks_attempted == 0 || self.chunks_succeeded > 0
    }
}

/// Collapse a batch to one record per id, keeping the last occurrence.
///
/// Later extraction passes are assumed fresher and more complete than
/// earlier ones for the same logical item.
pub fn dedup_last_write_wins(records: Vec<PersistableRecord>) -> Vec<PersistableRecord> {
    let mut by_id: IndexMap<String, PersistableRecord> = IndexMap::with_capacity(records.len());
    for record in records {
        by_id.insert(record.id.clone(), record);
    }
    by_id.into_values().collect()
}

/// Dedup a batch and drive the sink chunk by chunk.
///
/// A failing chunk is logged and skipped; the remaining chunks still
/// attempt to persist. No cross-chunk transaction is assumed.
pub async fn persist_batch(
    sink: &dyn RecordSink,
    records: Vec<PersistableRecord>,
    chunk_size: usize,
) -> UpsertReport {
    let incoming = records.len();
    let unique = dedup_last_write_wins(records);

    let mut report = UpsertReport {
        total_unique: unique.len(),
        duplicates_removed: incoming - unique.len(),
        ..Default::default()
    };

    if unique.is_empty() {
        debug!("Empty batch, nothing to persist");
        return report;
    }

    let chunk_size = chunk_size.max(1);
    for (index, chunk) in unique.chunks(chunk_size).enumerate() {
        report.chunks_attempted += 1;
        match sink.upsert_chunk(chunk).await {
            Ok(written) => {
                report.chunks_succeeded += 1;
                report.records_written += written;
            }
            Err(e) => {
                warn!(chunk = index, size = chunk.len(), error = %e, "Chunk upsert failed, continuing");
                report.failed_chunks.push((index, e.to_string()));
            }
        }
    }

    info!(
        unique = report.total_unique,
        duplicates = report.duplicates_removed,
        chunks = report.chunks_attempted,
        failed = report.failed_chunks.len(),
        written = report.records_written,
        "Batch persisted"
    );

    report
}
