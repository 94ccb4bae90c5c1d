//! RecordSink trait for idempotent record persistence.

use async_trait::async_trait;

use crate::error::SinkResult;
use crate::types::record::PersistableRecord;

/// An idempotent upsert sink for persistable records.
///
/// Records carry a deterministic `id` derived from their natural unique
/// key (`source` + `source_url`), so upserting the same product twice
/// overwrites rather than duplicates. Implementations must treat each
/// chunk as a self-contained request (chunk-level atomicity only); the
/// sink handle is safe to share across concurrent category workers.
///
/// Implementations:
/// - `MemorySink` - in-memory, for tests and development
/// - `PostgresSink` - `ON CONFLICT (id) DO UPDATE` (feature `postgres`)
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Upsert one chunk of records, keyed on `id`.
    ///
    /// Returns the number of records written.
    async fn upsert_chunk(&self, records: &[PersistableRecord]) -> SinkResult<u64>;

    /// Count stored records, optionally filtered by source.
    async fn count(&self, source: Option<&str>) -> SinkResult<u64>;

    /// Most recently written records for a source.
    async fn recent(&self, source: &str, limit: usize) -> SinkResult<Vec<PersistableRecord>>;

    /// Sink name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}
