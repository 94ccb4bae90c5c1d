//! In-memory sink implementation for testing and development.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::RwLock;

use crate::error::SinkResult;
use crate::traits::sink::RecordSink;
use crate::types::record::PersistableRecord;

/// In-memory record storage keyed by deterministic id.
///
/// Useful for testing and development. Not suitable for production as
/// data is lost on restart. Re-upserting an id moves the row to the
/// back of the write order so `recent()` reflects actual recency.
pub struct MemorySink {
    records: RwLock<IndexMap<String, PersistableRecord>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Create a new empty sink.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(IndexMap::new()),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the sink is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Fetch one record by id.
    pub fn get(&self, id: &str) -> Option<PersistableRecord> {
        self.records.read().unwrap().get(id).cloned()
    }

    /// Clear all stored records.
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert_chunk(&self, records: &[PersistableRecord]) -> SinkResult<u64> {
        let mut store = self.records.write().unwrap();
        for record in records {
            // Move to back so write order tracks recency
            store.shift_remove(&record.id);
            store.insert(record.id.clone(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn count(&self, source: Option<&str>) -> SinkResult<u64> {
        let store = self.records.read().unwrap();
        let count = match source {
            Some(source) => store.values().filter(|r| r.source == source).count(),
            None => store.len(),
        };
        Ok(count as u64)
    }

    async fn recent(&self, source: &str, limit: usize) -> SinkResult<Vec<PersistableRecord>> {
        let store = self.records.read().unwrap();
        Ok(store
            .values()
            .rev()
            .filter(|r| r.source == source)
            .take(limit)
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::into_persistable;
    use crate::types::config::SiteConfig;
    use crate::types::record::{CandidateRecord, NormalizedRecord};

    fn record(source: &str, path: &str, title: &str) -> PersistableRecord {
        let candidate = CandidateRecord::new(format!("https://x.example{path}"), path)
            .with_title(title)
            .with_image_url("https://cdn.x.example/a.jpg");
        let normalized =
            NormalizedRecord::from_candidate(candidate, &SiteConfig::new(source, "https://x.example"));
        into_persistable(normalized).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_same_id_overwrites() {
        let sink = MemorySink::new();

        let v1 = record("shop", "/p/x", "Old Title");
        let v2 = record("shop", "/p/x", "New Title");
        assert_eq!(v1.id, v2.id);

        sink.upsert_chunk(&[v1]).await.unwrap();
        sink.upsert_chunk(&[v2.clone()]).await.unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get(&v2.id).unwrap().title, "New Title");
    }

    #[tokio::test]
    async fn test_count_filters_by_source() {
        let sink = MemorySink::new();
        sink.upsert_chunk(&[
            record("a", "/p/1", "One"),
            record("a", "/p/2", "Two"),
            record("b", "/p/1", "Other"),
        ])
        .await
        .unwrap();

        assert_eq!(sink.count(None).await.unwrap(), 3);
        assert_eq!(sink.count(Some("a")).await.unwrap(), 2);
        assert_eq!(sink.count(Some("missing")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_orders_by_write_recency() {
        let sink = MemorySink::new();
        sink.upsert_chunk(&[record("shop", "/p/1", "First")])
            .await
            .unwrap();
        sink.upsert_chunk(&[record("shop", "/p/2", "Second")])
            .await
            .unwrap();
        // Re-upserting the first moves it to the front of recency
        sink.upsert_chunk(&[record("shop", "/p/1", "First Again")])
            .await
            .unwrap();

        let recent = sink.recent("shop", 1).await.unwrap();
        assert_eq!(recent[0].title, "First Again");
    }
}
