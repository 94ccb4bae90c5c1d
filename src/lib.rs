//! Incremental Catalog Harvesting Library
//!
//! Harvests product catalogs from "load more" style storefronts: a
//! pagination-convergence controller drives a content source until the
//! visible record set stops growing, an extraction pipeline turns
//! listing containers into candidate records through ordered selector
//! fallbacks, and a normalization/dedup layer persists idempotently
//! under a deterministic identity.
//!
//! # Design Philosophy
//!
//! **"Converge on observation, not on promises"**
//!
//! - Convergence is decided by a stall counter, never by a site's
//!   advertised totals
//! - Extraction failures are isolated per container; one bad listing
//!   never costs its siblings
//! - Identity is a pure function of `(source, product URL)`, so
//!   re-harvesting updates rows instead of duplicating them
//! - Enrichment is best-effort; a missing embedding never drops a record
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvest::{HarvestRunner, MemorySink, PagingConfig, SiteCatalog, StaticSource};
//! use tokio_util::sync::CancellationToken;
//!
//! let catalog = SiteCatalog::from_json_file("sites.json")?;
//! let site = catalog.get("thrifted").expect("configured site");
//!
//! let source = StaticSource::new()?;
//! let sink = MemorySink::new();
//! let runner = HarvestRunner::new(PagingConfig::default());
//!
//! let report = runner
//!     .run_site(&source, &sink, None, site, &CancellationToken::new())
//!     .await;
//! println!("persisted {} records", report.records_persisted());
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (ContentSource, RecordSink, ImageEmbedder)
//! - [`types`] - Record shapes and site catalog configuration
//! - [`pagination`] - Pagination-convergence controller
//! - [`extract`] - Container-to-candidate extraction pipeline
//! - [`normalize`] - Price parsing, identity, required-field gate
//! - [`dedup`] - Last-write-wins dedup and chunked persistence
//! - [`enrich`] - Best-effort visual-embedding enrichment
//! - [`runner`] - Category/site/catalog orchestration
//! - [`sources`] - Content source implementations (StaticSource, etc.)
//! - [`sinks`] - Sink implementations (MemorySink, PostgresSink)
//! - [`testing`] - Mock implementations for testing

pub mod dedup;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod pagination;
pub mod runner;
pub mod sinks;
pub mod sources;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{EmbedError, HarvestError, SinkError, SourceError};
pub use traits::{
    embedder::ImageEmbedder,
    sink::RecordSink,
    source::{ContentSource, ElementHandle, Locator, TriggerMethod},
};
pub use types::{
    config::{CategoryConfig, SelectorMap, SiteCatalog, SiteConfig, SiteMode},
    record::{Audience, CandidateRecord, NormalizedRecord, PersistableRecord},
};

pub use dedup::{dedup_last_write_wins, persist_batch, UpsertReport, DEFAULT_CHUNK_SIZE};
pub use enrich::{enrich_records, EnrichStats};
pub use extract::{ExtractionPass, ExtractionPipeline};
pub use normalize::{gate_records, into_persistable, parse_price, record_id, DropReason};
pub use pagination::{
    CategoryHarvest, HarvestStats, PaginationController, PagingConfig, Termination,
};
pub use runner::{CategoryReport, HarvestRunner, SiteJob, SiteReport};
pub use sinks::MemorySink;
pub use sources::StaticSource;

#[cfg(feature = "postgres")]
pub use sinks::PostgresSink;
