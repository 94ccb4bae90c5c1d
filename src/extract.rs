//! Extraction pipeline: listing containers in, candidate records out.
//!
//! Each field is resolved through an ordered list of selectors with
//! built-in defaults, taking the first non-empty *plausible* match.
//! Failures are isolated per container: one bad container never aborts
//! its siblings.

use tracing::{debug, warn};
use url::Url;

use crate::error::SourceResult;
use crate::traits::source::{ContentSource, ElementHandle, Locator};
use crate::types::config::SelectorMap;
use crate::types::record::{Audience, CandidateRecord};

/// UI chrome text that generic selectors sometimes match instead of
/// product data. A candidate value equal to any of these is rejected so
/// the next selector in the fallback list gets a chance.
const CHROME_DENYLIST: &[&str] = &[
    "sort by",
    "sort",
    "filter",
    "filters",
    "menu",
    "navigation",
    "search",
    "home",
    "shop",
    "cart",
    "shopping cart",
    "log in",
    "login",
    "sign up",
    "load more",
    "show more",
    "next",
    "previous",
];

/// One container that failed to extract.
#[derive(Debug, Clone)]
pub struct ContainerFailure {
    /// Index of the container within the pass
    pub index: usize,

    /// What went wrong
    pub error: String,
}

/// Result of one extraction pass over the currently visible content.
#[derive(Debug, Clone, Default)]
pub struct ExtractionPass {
    /// Successfully extracted candidates (may contain repeats across
    /// passes; deduplication happens downstream)
    pub records: Vec<CandidateRecord>,

    /// Number of containers seen
    pub container_count: usize,

    /// Containers skipped because extraction raised
    pub failures: Vec<ContainerFailure>,

    /// Containers discarded for lack of a resolvable product URL
    pub discarded_no_url: usize,
}

/// Page-level signals gathered once per pass for audience inference.
#[derive(Debug, Clone, Default)]
struct PageSignals {
    title: Option<String>,
    meta_description: Option<String>,
    breadcrumb: Option<String>,
}

/// Turns visible listing containers into candidate records.
pub struct ExtractionPipeline {
    selectors: SelectorMap,
}

impl ExtractionPipeline {
    /// Create a pipeline with the given selector configuration.
    pub fn new(selectors: SelectorMap) -> Self {
        Self { selectors }
    }

    /// Extract candidates from everything currently visible.
    ///
    /// Never fails as a whole: source errors at the container level are
    /// recorded and skipped, and a container list that cannot be queried
    /// at all simply yields an empty pass.
    pub async fn extract_visible(&self, source: &dyn ContentSource) -> ExtractionPass {
        let mut pass = ExtractionPass::default();

        let containers = match self.find_containers(source).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Container query failed, returning empty pass");
                return pass;
            }
        };
        pass.container_count = containers.len();

        let origin = source.current_url().unwrap_or_default();
        let signals = self.page_signals(source).await;

        for (index, container) in containers.into_iter().enumerate() {
            match self
                .extract_container(source, container, &origin, &signals)
                .await
            {
                Ok(Some(record)) => pass.records.push(record),
                Ok(None) => pass.discarded_no_url += 1,
                Err(e) => {
                    debug!(index, error = %e, "Container extraction failed, skipping");
                    pass.failures.push(ContainerFailure {
                        index,
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(
            containers = pass.container_count,
            records = pass.records.len(),
            failed = pass.failures.len(),
            discarded = pass.discarded_no_url,
            "Extraction pass complete"
        );

        pass
    }

    /// Find listing containers, walking the ordered selector list until
    /// one matches anything.
    async fn find_containers(
        &self,
        source: &dyn ContentSource,
    ) -> SourceResult<Vec<ElementHandle>> {
        for selector in &self.selectors.containers {
            let found = source.find_all(&Locator::css(selector)).await?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    /// Extract one container. `Ok(None)` means no resolvable product
    /// URL; such containers are discarded, never emitted.
    async fn extract_container(
        &self,
        source: &dyn ContentSource,
        container: ElementHandle,
        origin: &str,
        signals: &PageSignals,
    ) -> SourceResult<Option<CandidateRecord>> {
        let Some(link) = self.first_attr(source, container, &self.selectors.link, "href").await?
        else {
            return Ok(None);
        };
        let Some(source_url) = normalize_url(&link, origin) else {
            return Ok(None);
        };

        let external_id = derive_external_id(&source_url);
        let mut record = CandidateRecord::new(source_url, external_id);

        record.title = self
            .first_text(source, container, &self.selectors.title)
            .await?;
        record.price_raw = self
            .first_text(source, container, &self.selectors.price)
            .await?;
        record.description = self
            .first_text(source, container, &self.selectors.description)
            .await?;

        // Images often lazy-load through data-src before src is set
        let img = match self
            .first_attr(source, container, &self.selectors.image, "src")
            .await?
        {
            Some(src) => Some(src),
            None => {
                self.first_attr(source, container, &self.selectors.image, "data-src")
                    .await?
            }
        };
        if let Some(img) = img {
            record.image_url = normalize_url(&img, origin);
        }

        record.sizes = self.all_texts(source, container, &self.selectors.sizes).await?;

        record.audience = self
            .infer_audience(source, container, &record, signals)
            .await?;

        Ok(Some(record))
    }

    /// First non-empty, plausible text among the selector fallbacks.
    async fn first_text(
        &self,
        source: &dyn ContentSource,
        container: ElementHandle,
        selectors: &[String],
    ) -> SourceResult<Option<String>> {
        for selector in selectors {
            let Some(el) = source.find_in(container, &Locator::css(selector)).await? else {
                continue;
            };
            if let Some(text) = source.text(el).await? {
                let text = text.trim().to_string();
                if !text.is_empty() && is_plausible(&text) {
                    return Ok(Some(text));
                }
            }
        }
        Ok(None)
    }

    /// First non-empty attribute value among the selector fallbacks.
    async fn first_attr(
        &self,
        source: &dyn ContentSource,
        container: ElementHandle,
        selectors: &[String],
        attr: &str,
    ) -> SourceResult<Option<String>> {
        for selector in selectors {
            let Some(el) = source.find_in(container, &Locator::css(selector)).await? else {
                continue;
            };
            if let Some(value) = source.attr(el, attr).await? {
                let value = value.trim().to_string();
                if !value.is_empty() {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// All non-empty texts for the first selector that matches anything.
    async fn all_texts(
        &self,
        source: &dyn ContentSource,
        container: ElementHandle,
        selectors: &[String],
    ) -> SourceResult<Vec<String>> {
        for selector in selectors {
            let els = source
                .find_all_in(container, &Locator::css(selector))
                .await?;
            if els.is_empty() {
                continue;
            }
            let mut texts = Vec::with_capacity(els.len());
            for el in els {
                if let Some(text) = source.text(el).await? {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        texts.push(text);
                    }
                }
            }
            if !texts.is_empty() {
                return Ok(texts);
            }
        }
        Ok(Vec::new())
    }

    /// Gather page-level audience signals once per pass. Query failures
    /// here just leave a signal unset.
    async fn page_signals(&self, source: &dyn ContentSource) -> PageSignals {
        PageSignals {
            title: self.page_text(source, "title").await,
            meta_description: self.page_attr(source, "meta[name=\"description\"]", "content").await,
            breadcrumb: self
                .page_text(source, ".breadcrumb, .breadcrumbs, nav[aria-label=\"breadcrumb\"]")
                .await,
        }
    }

    async fn page_text(&self, source: &dyn ContentSource, selector: &str) -> Option<String> {
        let els = source.find_all(&Locator::css(selector)).await.ok()?;
        let el = els.first()?;
        source.text(*el).await.ok()?.filter(|t| !t.trim().is_empty())
    }

    async fn page_attr(
        &self,
        source: &dyn ContentSource,
        selector: &str,
        attr: &str,
    ) -> Option<String> {
        let els = source.find_all(&Locator::css(selector)).await.ok()?;
        let el = els.first()?;
        source.attr(*el, attr).await.ok()?.filter(|t| !t.trim().is_empty())
    }

    /// Audience inference cascade, most reliable signal first:
    /// URL path → page title → meta description → breadcrumb →
    /// configured selector → the record's own title/description.
    ///
    /// An ambiguous signal ("unisex") short-circuits to unset; when
    /// every stage is inconclusive the field stays unset. Never guess.
    async fn infer_audience(
        &self,
        source: &dyn ContentSource,
        container: ElementHandle,
        record: &CandidateRecord,
        signals: &PageSignals,
    ) -> SourceResult<Option<Audience>> {
        let url_path = Url::parse(&record.source_url)
            .map(|u| u.path().replace(['/', '-', '_'], " "))
            .unwrap_or_default();

        let configured = self
            .first_text(source, container, &self.selectors.audience)
            .await?;

        let stages: [Option<&str>; 6] = [
            Some(url_path.as_str()),
            signals.title.as_deref(),
            signals.meta_description.as_deref(),
            signals.breadcrumb.as_deref(),
            configured.as_deref(),
            record.title.as_deref().or(record.description.as_deref()),
        ];

        for text in stages.into_iter().flatten() {
            match classify_audience_text(text) {
                AudienceSignal::Match(audience) => return Ok(Some(audience)),
                AudienceSignal::Ambiguous => return Ok(None),
                AudienceSignal::Inconclusive => continue,
            }
        }

        Ok(None)
    }
}

/// Outcome of classifying one text snippet for audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudienceSignal {
    Match(Audience),
    /// An explicitly mixed signal like "unisex"; stop looking
    Ambiguous,
    Inconclusive,
}

/// Token-based audience classification.
///
/// Token matching (not substring) so "women" never matches inside
/// "menswear" and vice versa. A text carrying both audience tokens, or
/// an explicit "unisex", is ambiguous.
fn classify_audience_text(text: &str) -> AudienceSignal {
    let lower = text.to_lowercase();
    let mut saw_women = false;
    let mut saw_men = false;

    for token in lower.split(|c: char| !c.is_alphanumeric()) {
        match token {
            "unisex" => return AudienceSignal::Ambiguous,
            "women" | "woman" | "womens" | "female" | "ladies" => saw_women = true,
            "men" | "man" | "mens" | "male" => saw_men = true,
            _ => {}
        }
    }

    match (saw_women, saw_men) {
        (true, true) => AudienceSignal::Ambiguous,
        (true, false) => AudienceSignal::Match(Audience::Women),
        (false, true) => AudienceSignal::Match(Audience::Men),
        (false, false) => AudienceSignal::Inconclusive,
    }
}

/// Reject UI chrome text that generic selectors accidentally match.
fn is_plausible(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    !CHROME_DENYLIST.contains(&lower.as_str())
}

/// Coerce an extracted URL to an absolute one.
///
/// Protocol-relative URLs get the secure scheme; root-relative URLs are
/// resolved against the *document's* origin (which may differ from the
/// configured entry URL after redirects). Unresolvable input is `None`.
pub fn normalize_url(raw: &str, origin: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }

    if let Ok(absolute) = Url::parse(raw) {
        if matches!(absolute.scheme(), "http" | "https") {
            return Some(absolute.into());
        }
        return None;
    }

    let base = Url::parse(origin).ok()?;
    base.join(raw).ok().map(Into::into)
}

/// Derive an external id from a product URL path.
///
/// Shopify-style paths keep the handle after `/products/`; a numeric id
/// embedded in the handle wins over the handle itself. Anything else
/// degrades to the slugged path.
pub fn derive_external_id(source_url: &str) -> String {
    let Ok(url) = Url::parse(source_url) else {
        return source_url.to_string();
    };

    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if let Some(pos) = segments.iter().position(|s| *s == "products") {
        if let Some(handle) = segments.get(pos + 1) {
            if let Some(digits) = first_digit_run(handle) {
                return digits;
            }
            return (*handle).to_string();
        }
    }

    if let Some(last) = segments.last() {
        return (*last).to_string();
    }

    url.path().trim_matches('/').replace('/', "-")
}

fn first_digit_run(s: &str) -> Option<String> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let run: String = s[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_protocol_relative() {
        assert_eq!(
            normalize_url("//cdn.example.com/a.jpg", "https://shop.example.com"),
            Some("https://cdn.example.com/a.jpg".to_string())
        );
    }

    #[test]
    fn test_normalize_url_root_relative_uses_document_origin() {
        assert_eq!(
            normalize_url("/p/x", "https://shop.example.com/collections/all"),
            Some("https://shop.example.com/p/x".to_string())
        );
    }

    #[test]
    fn test_normalize_url_absolute_passthrough() {
        assert_eq!(
            normalize_url("https://other.example.com/p", "https://shop.example.com"),
            Some("https://other.example.com/p".to_string())
        );
    }

    #[test]
    fn test_normalize_url_rejects_non_http_and_empty() {
        assert_eq!(normalize_url("javascript:void(0)", "https://x.example"), None);
        assert_eq!(normalize_url("", "https://x.example"), None);
    }

    #[test]
    fn test_derive_external_id_shopify_handle() {
        assert_eq!(
            derive_external_id("https://shop.example.com/products/new-navy-raw-jacket"),
            "new-navy-raw-jacket"
        );
    }

    #[test]
    fn test_derive_external_id_prefers_numeric() {
        assert_eq!(
            derive_external_id("https://shop.example.com/products/item-48213"),
            "48213"
        );
    }

    #[test]
    fn test_derive_external_id_falls_back_to_last_segment() {
        assert_eq!(
            derive_external_id("https://shop.example.com/p/coat"),
            "coat"
        );
    }

    #[test]
    fn test_classify_audience_tokens() {
        assert_eq!(
            classify_audience_text("shop women coats"),
            AudienceSignal::Match(Audience::Women)
        );
        assert_eq!(
            classify_audience_text("mens-jackets"),
            AudienceSignal::Match(Audience::Men)
        );
        // No substring leakage: "menswear" is one token, not "mens"
        assert_eq!(
            classify_audience_text("menswear"),
            AudienceSignal::Inconclusive
        );
        assert_eq!(classify_audience_text("tote bag"), AudienceSignal::Inconclusive);
    }

    #[test]
    fn test_classify_audience_ambiguous_short_circuits() {
        assert_eq!(classify_audience_text("unisex hoodie"), AudienceSignal::Ambiguous);
        assert_eq!(
            classify_audience_text("for men and women"),
            AudienceSignal::Ambiguous
        );
    }

    #[test]
    fn test_chrome_denylist_rejects_navigation_text() {
        assert!(!is_plausible("Sort by"));
        assert!(!is_plausible("  FILTER "));
        assert!(is_plausible("Sorted Wool Coat"));
        assert!(is_plausible("Navy Raw Jacket"));
    }

    use crate::testing::{MockContainer, MockSource, MockStage};
    use crate::types::config::SelectorMap;

    fn container_with_link(href: &str) -> MockContainer {
        MockContainer::new()
            .with_attr("a[href*=\"/products/\"]", "href", href)
            .with_text(".product-title", "Wool Coat")
            .with_attr("img", "src", "//cdn.example.com/a.jpg")
    }

    async fn extract_one(source: &MockSource) -> CandidateRecord {
        source
            .navigate("https://shop.example.com/collections/all")
            .await
            .unwrap();
        let mut pass = ExtractionPipeline::new(SelectorMap::default())
            .extract_visible(source)
            .await;
        assert_eq!(pass.records.len(), 1);
        pass.records.remove(0)
    }

    #[tokio::test]
    async fn test_url_path_signal_outranks_page_title() {
        let source = MockSource::new()
            .with_stage(
                MockStage::new().with_container(container_with_link("/products/women-wool-coat")),
            )
            .with_page_text("title", "Men Essentials | Example Shop");

        let record = extract_one(&source).await;
        assert_eq!(record.audience, Some(Audience::Women));
    }

    #[tokio::test]
    async fn test_page_title_outranks_meta_description() {
        let source = MockSource::new()
            .with_stage(MockStage::new().with_container(container_with_link("/products/item-1")))
            .with_page_text("title", "Women Coats | Example Shop")
            .with_page_attr("meta[name=\"description\"]", "content", "men jackets on sale");

        let record = extract_one(&source).await;
        assert_eq!(record.audience, Some(Audience::Women));
    }

    #[tokio::test]
    async fn test_meta_description_signal_applies_without_earlier_stages() {
        let source = MockSource::new()
            .with_stage(MockStage::new().with_container(container_with_link("/products/item-1")))
            .with_page_attr("meta[name=\"description\"]", "content", "men jackets on sale");

        let record = extract_one(&source).await;
        assert_eq!(record.audience, Some(Audience::Men));
    }

    #[tokio::test]
    async fn test_breadcrumb_signal_applies_without_earlier_stages() {
        let source = MockSource::new()
            .with_stage(MockStage::new().with_container(container_with_link("/products/item-1")))
            .with_page_text(
                ".breadcrumb, .breadcrumbs, nav[aria-label=\"breadcrumb\"]",
                "Home Women Coats",
            );

        let record = extract_one(&source).await;
        assert_eq!(record.audience, Some(Audience::Women));
    }
}
