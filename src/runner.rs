//! Run orchestration: categories within a site, sites across a catalog.
//!
//! A site run is sequential over its categories on one content source.
//! Category failures are isolated: a category that cannot even navigate
//! is recorded and the next category still runs. Across sites, runs are
//! independent and execute concurrently under a permit limit, each site
//! on its own source.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dedup::{persist_batch, UpsertReport, DEFAULT_CHUNK_SIZE};
use crate::enrich::enrich_records;
use crate::extract::ExtractionPipeline;
use crate::normalize::gate_records;
use crate::pagination::{HarvestStats, PaginationController, PagingConfig, Termination};
use crate::traits::embedder::ImageEmbedder;
use crate::traits::sink::RecordSink;
use crate::traits::source::ContentSource;
use crate::types::config::{CategoryConfig, SiteConfig};
use crate::types::record::NormalizedRecord;

/// Outcome of one category run.
#[derive(Debug, Clone)]
pub struct CategoryReport {
    /// Category label
    pub category: String,

    /// How the pagination loop ended; `None` when navigation failed
    /// before any collection happened
    pub termination: Option<Termination>,

    /// Pagination counters
    pub harvest_stats: HarvestStats,

    /// Unique candidates collected before gating
    pub extracted: usize,

    /// Records dropped by the required-field gate
    pub dropped: usize,

    /// Records that received an embedding
    pub enriched: usize,

    /// Persistence outcome
    pub upsert: UpsertReport,

    /// Fatal category-level error, if any
    pub error: Option<String>,
}

impl CategoryReport {
    fn failed(category: &CategoryConfig, error: String) -> Self {
        Self {
            category: category.label().to_string(),
            termination: None,
            harvest_stats: HarvestStats::default(),
            extracted: 0,
            dropped: 0,
            enriched: 0,
            upsert: UpsertReport::default(),
            error: Some(error),
        }
    }

    /// Whether this category ran and persisted without total failure.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.upsert.is_success()
    }
}

/// Outcome of one site run.
#[derive(Debug, Clone)]
pub struct SiteReport {
    /// Site source identifier
    pub source: String,

    /// Per-category outcomes, in catalog order
    pub categories: Vec<CategoryReport>,
}

impl SiteReport {
    /// Total records the sink accepted across categories.
    pub fn records_persisted(&self) -> u64 {
        self.categories.iter().map(|c| c.upsert.records_written).sum()
    }

    /// A site run succeeds when at least one record made it to the sink.
    pub fn is_success(&self) -> bool {
        self.records_persisted() > 0
    }
}

/// One site paired with the source that will browse it.
///
/// Sources hold per-session state (current document, element handles),
/// so concurrent site runs each need their own.
pub struct SiteJob {
    pub site: SiteConfig,
    pub source: Arc<dyn ContentSource>,
}

/// Drives harvest runs end to end: collect, normalize, gate, enrich,
/// persist.
#[derive(Clone)]
pub struct HarvestRunner {
    paging: PagingConfig,
    chunk_size: usize,
    max_concurrent_sites: usize,
}

impl Default for HarvestRunner {
    fn default() -> Self {
        Self::new(PagingConfig::default())
    }
}

impl HarvestRunner {
    /// Create a runner with the given pagination configuration.
    pub fn new(paging: PagingConfig) -> Self {
        Self {
            paging,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_sites: 3,
        }
    }

    /// Set the upsert chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set how many sites may run at once.
    pub fn with_max_concurrent_sites(mut self, max: usize) -> Self {
        self.max_concurrent_sites = max.max(1);
        self
    }

    /// Run a single category: navigate, collect to convergence,
    /// normalize and gate, optionally enrich, persist.
    ///
    /// Cancellation mid-collection still persists whatever was gathered.
    pub async fn run_category(
        &self,
        source: &dyn ContentSource,
        sink: &dyn RecordSink,
        embedder: Option<&dyn ImageEmbedder>,
        site: &SiteConfig,
        category: &CategoryConfig,
        cancel: &CancellationToken,
    ) -> CategoryReport {
        info!(
            site = %site.source,
            category = category.label(),
            url = %category.url,
            "Starting category run"
        );

        if let Err(e) = source.navigate(&category.url).await {
            warn!(site = %site.source, category = category.label(), error = %e, "Navigation failed");
            return CategoryReport::failed(category, e.to_string());
        }

        let pipeline = ExtractionPipeline::new(site.selectors.clone());
        let controller = PaginationController::new(self.paging.clone());
        let harvest = controller.collect(source, &pipeline, cancel).await;

        let extracted = harvest.records.len();
        let normalized: Vec<NormalizedRecord> = harvest
            .records
            .into_iter()
            .map(|c| NormalizedRecord::from_candidate(c, site))
            .collect();

        let (mut persistable, drops) = gate_records(normalized);

        let enriched = match embedder {
            Some(embedder) => {
                enrich_records(embedder, &mut persistable)
                    .await
                    .embedded
            }
            None => 0,
        };

        let upsert = persist_batch(sink, persistable, self.chunk_size).await;

        info!(
            site = %site.source,
            category = category.label(),
            extracted,
            dropped = drops.len(),
            persisted = upsert.records_written,
            ?harvest.termination,
            "Category run complete"
        );

        CategoryReport {
            category: category.label().to_string(),
            termination: Some(harvest.termination),
            harvest_stats: harvest.stats,
            extracted,
            dropped: drops.len(),
            enriched,
            upsert,
            error: None,
        }
    }

    /// Run every category of a site sequentially on one source.
    ///
    /// Stops early only on cancellation; a failed category does not
    /// prevent the remaining ones from running.
    pub async fn run_site(
        &self,
        source: &dyn ContentSource,
        sink: &dyn RecordSink,
        embedder: Option<&dyn ImageEmbedder>,
        site: &SiteConfig,
        cancel: &CancellationToken,
    ) -> SiteReport {
        let mut categories = Vec::with_capacity(site.categories.len());

        for category in &site.categories {
            if cancel.is_cancelled() {
                info!(site = %site.source, "Site run cancelled, skipping remaining categories");
                break;
            }

            let report = self
                .run_category(source, sink, embedder, site, category, cancel)
                .await;
            let cancelled = report.termination == Some(Termination::Cancelled);
            categories.push(report);

            if cancelled {
                break;
            }
        }

        let report = SiteReport {
            source: site.source.clone(),
            categories,
        };
        info!(
            site = %site.source,
            categories = report.categories.len(),
            persisted = report.records_persisted(),
            success = report.is_success(),
            "Site run complete"
        );
        report
    }

    /// Run many sites concurrently, at most `max_concurrent_sites` at a
    /// time, all writing to the same sink.
    ///
    /// Reports come back in job order regardless of completion order.
    pub async fn run_sites(
        &self,
        jobs: Vec<SiteJob>,
        sink: Arc<dyn RecordSink>,
        embedder: Option<Arc<dyn ImageEmbedder>>,
        cancel: &CancellationToken,
    ) -> Vec<SiteReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_sites));
        let mut set = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let runner = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let sink = Arc::clone(&sink);
            let embedder = embedder.clone();
            let cancel = cancel.clone();

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed, treat as cancelled
                        return (
                            index,
                            SiteReport {
                                source: job.site.source.clone(),
                                categories: Vec::new(),
                            },
                        );
                    }
                };

                let report = runner
                    .run_site(
                        job.source.as_ref(),
                        sink.as_ref(),
                        embedder.as_deref(),
                        &job.site,
                        &cancel,
                    )
                    .await;
                (index, report)
            });
        }

        let mut indexed = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => warn!(error = %e, "Site task panicked"),
            }
        }

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, report)| report).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use crate::testing::{MockEmbedder, MockSource, MockStage};

    fn site(source: &str) -> SiteConfig {
        SiteConfig::new(source, "https://shop.example.com").with_category(
            CategoryConfig::new("https://shop.example.com/collections/all").with_name("All"),
        )
    }

    fn plateau_source(count: usize) -> MockSource {
        MockSource::new()
            .with_stage(MockStage::with_products(count))
            .with_stage(MockStage::with_products(count))
    }

    #[tokio::test]
    async fn test_run_site_persists_extracted_records() {
        let source = plateau_source(4);
        let sink = MemorySink::new();
        let runner = HarvestRunner::new(PagingConfig::default().with_stall_threshold(2));

        let report = runner
            .run_site(&source, &sink, None, &site("shop"), &CancellationToken::new())
            .await;

        assert!(report.is_success());
        assert_eq!(report.records_persisted(), 4);
        assert_eq!(sink.len(), 4);
        let category = &report.categories[0];
        assert_eq!(category.termination, Some(Termination::Converged));
        assert_eq!(category.extracted, 4);
        assert_eq!(category.dropped, 0);
    }

    #[tokio::test]
    async fn test_repeat_runs_are_idempotent() {
        let source = plateau_source(3);
        let sink = MemorySink::new();
        let runner = HarvestRunner::new(PagingConfig::default().with_stall_threshold(2));
        let cancel = CancellationToken::new();

        runner
            .run_site(&source, &sink, None, &site("shop"), &cancel)
            .await;
        runner
            .run_site(&source, &sink, None, &site("shop"), &cancel)
            .await;

        // Same source and URLs, so the second run overwrites in place
        assert_eq!(sink.len(), 3);
    }

    #[tokio::test]
    async fn test_overlapping_categories_dedupe_through_sink() {
        let source = plateau_source(5);
        let sink = MemorySink::new();
        let runner = HarvestRunner::new(PagingConfig::default().with_stall_threshold(2));

        let two_categories = site("shop").with_category(
            CategoryConfig::new("https://shop.example.com/collections/sale").with_name("Sale"),
        );
        let report = runner
            .run_site(&source, &sink, None, &two_categories, &CancellationToken::new())
            .await;

        assert_eq!(report.categories.len(), 2);
        // Both categories surface the same products; ids collide
        assert_eq!(sink.len(), 5);
    }

    #[tokio::test]
    async fn test_embedder_enriches_persisted_records() {
        let source = plateau_source(2);
        let sink = MemorySink::new();
        let embedder = MockEmbedder::new().with_dimension(16);
        let runner = HarvestRunner::new(PagingConfig::default().with_stall_threshold(2));

        let report = runner
            .run_site(
                &source,
                &sink,
                Some(&embedder),
                &site("shop"),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.categories[0].enriched, 2);
        let recent = sink.recent("shop", 10).await.unwrap();
        assert!(recent.iter().all(|r| r.embedding.is_some()));
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_categories() {
        let source = plateau_source(3);
        let sink = MemorySink::new();
        let runner = HarvestRunner::default();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = runner
            .run_site(&source, &sink, None, &site("shop"), &cancel)
            .await;

        assert!(report.categories.is_empty());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_run_sites_reports_in_job_order() {
        let sink: Arc<dyn RecordSink> = Arc::new(MemorySink::new());
        let runner = HarvestRunner::new(PagingConfig::default().with_stall_threshold(2))
            .with_max_concurrent_sites(2);

        let jobs = vec![
            SiteJob {
                site: site("alpha"),
                source: Arc::new(plateau_source(2)),
            },
            SiteJob {
                site: site("beta"),
                source: Arc::new(plateau_source(3)),
            },
        ];

        let reports = runner
            .run_sites(jobs, Arc::clone(&sink), None, &CancellationToken::new())
            .await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].source, "alpha");
        assert_eq!(reports[1].source, "beta");
        // Same URLs but different sources mean distinct ids
        assert_eq!(sink.count(Some("alpha")).await.unwrap(), 2);
        assert_eq!(sink.count(Some("beta")).await.unwrap(), 3);
    }
}
