//! End-to-end runs through the full pipeline: scripted source in,
//! persisted records out.

use std::sync::Arc;

use harvest::testing::{FlakySink, MockContainer, MockEmbedder, MockSource, MockStage};
use harvest::{
    Audience, CategoryConfig, HarvestRunner, MemorySink, PagingConfig, RecordSink, SiteConfig,
    SiteJob, Termination,
};
use tokio_util::sync::CancellationToken;

fn site(source: &str) -> SiteConfig {
    SiteConfig::new(source, "https://shop.example.com").with_category(
        CategoryConfig::new("https://shop.example.com/collections/all").with_name("All"),
    )
}

fn runner() -> HarvestRunner {
    HarvestRunner::new(PagingConfig::default().with_stall_threshold(2))
}

#[tokio::test]
async fn test_growing_catalog_converges_and_persists() {
    let source = MockSource::new()
        .with_stage(MockStage::with_products(4))
        .with_stage(MockStage::with_products(8))
        .with_stage(MockStage::with_products(12))
        .with_stage(MockStage::with_products(12));
    let sink = MemorySink::new();

    let report = runner()
        .run_site(&source, &sink, None, &site("shop"), &CancellationToken::new())
        .await;

    assert!(report.is_success());
    assert_eq!(sink.len(), 12);

    let category = &report.categories[0];
    assert_eq!(category.termination, Some(Termination::Converged));
    assert_eq!(category.extracted, 12);
    assert_eq!(category.dropped, 0);

    // Every persisted row carries the deterministic identity prefix
    let recent = sink.recent("shop", 20).await.unwrap();
    assert_eq!(recent.len(), 12);
    assert!(recent.iter().all(|r| r.id.starts_with("shop_")));
    assert!(recent.iter().all(|r| r.source_url.starts_with("https://")));
}

#[tokio::test]
async fn test_reharvest_updates_rows_in_place() {
    let sink = MemorySink::new();
    let cancel = CancellationToken::new();

    let first = MockSource::new().with_stage(MockStage::with_products(6));
    runner()
        .run_site(&first, &sink, None, &site("shop"), &cancel)
        .await;
    let ids_before: Vec<String> = sink
        .recent("shop", 20)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();

    // Same URLs again; prices changed upstream
    let second = MockSource::new().with_stage(MockStage::with_products(6));
    runner()
        .run_site(&second, &sink, None, &site("shop"), &cancel)
        .await;

    assert_eq!(sink.len(), 6);
    let ids_after: Vec<String> = sink
        .recent("shop", 20)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();

    let mut before_sorted = ids_before.clone();
    let mut after_sorted = ids_after.clone();
    before_sorted.sort();
    after_sorted.sort();
    assert_eq!(before_sorted, after_sorted);
}

#[tokio::test]
async fn test_one_bad_container_never_costs_its_siblings() {
    let mut stage = MockStage::new().without_affordance();
    for i in 0..10 {
        let container = if i == 4 {
            MockContainer::product(i).poisoned()
        } else {
            MockContainer::product(i)
        };
        stage = stage.with_container(container);
    }
    let source = MockSource::new().with_stage(stage);
    let sink = MemorySink::new();

    let report = runner()
        .run_site(&source, &sink, None, &site("shop"), &CancellationToken::new())
        .await;

    let category = &report.categories[0];
    assert_eq!(category.termination, Some(Termination::Exhausted));
    assert!(category.harvest_stats.containers_failed > 0);
    assert_eq!(sink.len(), 9);
}

#[tokio::test]
async fn test_page_title_signal_sets_audience() {
    let source = MockSource::new()
        .with_stage(MockStage::with_products(3).without_affordance())
        .with_page_text("title", "Women Coats | Example Shop");
    let sink = MemorySink::new();

    runner()
        .run_site(&source, &sink, None, &site("shop"), &CancellationToken::new())
        .await;

    let recent = sink.recent("shop", 10).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent.iter().all(|r| r.audience == Some(Audience::Women)));
}

#[tokio::test]
async fn test_unisex_page_leaves_audience_unset() {
    let source = MockSource::new()
        .with_stage(MockStage::with_products(2).without_affordance())
        .with_page_text("title", "Unisex Essentials | Example Shop");
    let sink = MemorySink::new();

    runner()
        .run_site(&source, &sink, None, &site("shop"), &CancellationToken::new())
        .await;

    let recent = sink.recent("shop", 10).await.unwrap();
    assert!(recent.iter().all(|r| r.audience.is_none()));
}

#[tokio::test]
async fn test_incomplete_containers_are_gated_out() {
    // No title anywhere in this container; the gate must drop it
    let incomplete = MockContainer::new()
        .with_attr("a[href*=\"/products/\"]", "href", "/products/mystery")
        .with_attr("img", "src", "//cdn.example.com/mystery.jpg");

    let stage = MockStage::new()
        .without_affordance()
        .with_container(MockContainer::product(0))
        .with_container(incomplete)
        .with_container(MockContainer::product(1));
    let source = MockSource::new().with_stage(stage);
    let sink = MemorySink::new();

    let report = runner()
        .run_site(&source, &sink, None, &site("shop"), &CancellationToken::new())
        .await;

    let category = &report.categories[0];
    assert_eq!(category.extracted, 3);
    assert_eq!(category.dropped, 1);
    assert_eq!(sink.len(), 2);
}

#[tokio::test]
async fn test_failed_chunk_does_not_sink_the_category() {
    let source = MockSource::new().with_stage(MockStage::with_products(5).without_affordance());
    let sink = FlakySink::new().failing_call(0);

    let report = runner()
        .with_chunk_size(2)
        .run_site(&source, &sink, None, &site("shop"), &CancellationToken::new())
        .await;

    let category = &report.categories[0];
    assert!(category.is_success());
    assert_eq!(category.upsert.chunks_attempted, 3);
    assert_eq!(category.upsert.failed_chunks.len(), 1);
    // The two surviving chunks landed
    assert_eq!(sink.inner().len(), 3);
}

#[tokio::test]
async fn test_catalog_run_enriches_and_separates_sources() {
    let sink: Arc<dyn RecordSink> = Arc::new(MemorySink::new());
    let embedder = Arc::new(MockEmbedder::new().with_dimension(32));

    let jobs = vec![
        SiteJob {
            site: site("alpha"),
            source: Arc::new(
                MockSource::new().with_stage(MockStage::with_products(2).without_affordance()),
            ),
        },
        SiteJob {
            site: site("beta"),
            source: Arc::new(
                MockSource::new().with_stage(MockStage::with_products(3).without_affordance()),
            ),
        },
    ];

    let reports = runner()
        .with_max_concurrent_sites(2)
        .run_sites(
            jobs,
            Arc::clone(&sink),
            Some(embedder.clone() as Arc<dyn harvest::ImageEmbedder>),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].source, "alpha");
    assert_eq!(reports[1].source, "beta");
    assert_eq!(sink.count(Some("alpha")).await.unwrap(), 2);
    assert_eq!(sink.count(Some("beta")).await.unwrap(), 3);

    // Same product URLs, different sources: identities must not collide
    let alpha = sink.recent("alpha", 10).await.unwrap();
    let beta = sink.recent("beta", 10).await.unwrap();
    assert!(alpha.iter().all(|a| beta.iter().all(|b| a.id != b.id)));
    assert!(alpha.iter().all(|r| r.embedding.is_some()));
}
