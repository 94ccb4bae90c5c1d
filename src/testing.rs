//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the harvesting
//! library without a real browser session, embedding service, or
//! database.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{EmbedError, SinkResult, SourceError, SourceResult};
use crate::sinks::MemorySink;
use crate::traits::embedder::ImageEmbedder;
use crate::traits::sink::RecordSink;
use crate::traits::source::{ContentSource, ElementHandle, Locator, TriggerMethod};
use crate::types::record::PersistableRecord;

/// One scripted listing container.
#[derive(Debug, Clone, Default)]
pub struct MockContainer {
    texts: HashMap<String, String>,
    attrs: HashMap<(String, String), String>,
    poisoned: bool,
}

impl MockContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// A standard product container matching the default selector map.
    pub fn product(index: usize) -> Self {
        Self::new()
            .with_attr(
                "a[href*=\"/products/\"]",
                "href",
                format!("/products/item-{index}"),
            )
            .with_text(".product-title", format!("Item {index}"))
            .with_text(".price", "19,00 EUR")
            .with_attr("img", "src", format!("//cdn.example.com/item-{index}.jpg"))
    }

    /// Script a text for a selector.
    pub fn with_text(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.texts.insert(selector.into(), text.into());
        self
    }

    /// Script an attribute for a selector.
    pub fn with_attr(
        mut self,
        selector: impl Into<String>,
        attr: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attrs
            .insert((selector.into(), attr.into()), value.into());
        self
    }

    /// Make every field access on this container fail, simulating an
    /// extraction-time exception.
    pub fn poisoned(mut self) -> Self {
        self.poisoned = true;
        self
    }

    fn has_selector(&self, selector: &str) -> bool {
        self.texts.contains_key(selector)
            || self.attrs.keys().any(|(s, _)| s == selector)
    }
}

/// Reveal-affordance state within one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AffordanceState {
    /// Visible and enabled
    Present,

    /// Visible but disabled: explicit "no more content"
    Disabled,

    /// In the document but not visible
    Hidden,

    /// Not in the document at all
    Absent,
}

/// One document state; triggering the affordance advances to the next
/// stage (stages are cumulative views, like a real load-more page).
#[derive(Debug, Clone)]
pub struct MockStage {
    containers: Vec<MockContainer>,
    affordance: AffordanceState,
    affordance_text: String,
    container_selector: String,
}

impl Default for MockStage {
    fn default() -> Self {
        Self {
            containers: Vec::new(),
            affordance: AffordanceState::Present,
            affordance_text: "Load More".to_string(),
            container_selector: ".product-item".to_string(),
        }
    }
}

impl MockStage {
    /// Create an empty stage with a visible affordance.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stage showing `count` standard product containers.
    pub fn with_products(count: usize) -> Self {
        let mut stage = Self::new();
        stage.containers = (0..count).map(MockContainer::product).collect();
        stage
    }

    /// Add a scripted container.
    pub fn with_container(mut self, container: MockContainer) -> Self {
        self.containers.push(container);
        self
    }

    /// No affordance anywhere in this stage.
    pub fn without_affordance(mut self) -> Self {
        self.affordance = AffordanceState::Absent;
        self
    }

    /// Affordance present but disabled (explicit exhaustion signal).
    pub fn with_disabled_affordance(mut self) -> Self {
        self.affordance = AffordanceState::Disabled;
        self
    }

    /// Affordance present but invisible.
    pub fn with_hidden_affordance(mut self) -> Self {
        self.affordance = AffordanceState::Hidden;
        self
    }

    /// Override the affordance text.
    pub fn with_affordance_text(mut self, text: impl Into<String>) -> Self {
        self.affordance_text = text.into();
        self
    }
}

/// What a mock element handle refers to.
#[derive(Debug, Clone)]
enum MockElement {
    Container(usize),
    Field { container: usize, selector: String },
    Page { selector: String },
    Affordance,
}

#[derive(Debug, Default)]
struct MockSourceState {
    current_stage: usize,
    url: Option<String>,
    handles: HashMap<u64, MockElement>,
    next_handle: u64,
}

/// A scripted content source for testing the pagination controller and
/// extraction pipeline without a browser.
pub struct MockSource {
    stages: Vec<MockStage>,
    page_texts: HashMap<String, String>,
    page_attrs: HashMap<(String, String), String>,
    fail_direct_trigger: bool,
    fail_all_triggers: bool,
    state: RwLock<MockSourceState>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    /// Create a source with no stages (always empty).
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            page_texts: HashMap::new(),
            page_attrs: HashMap::new(),
            fail_direct_trigger: false,
            fail_all_triggers: false,
            state: RwLock::new(MockSourceState::default()),
        }
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: MockStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Script a page-level text (e.g. `"title"` or a breadcrumb).
    pub fn with_page_text(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.page_texts.insert(selector.into(), text.into());
        self
    }

    /// Script a page-level attribute (e.g. a description meta tag).
    pub fn with_page_attr(
        mut self,
        selector: impl Into<String>,
        attr: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.page_attrs
            .insert((selector.into(), attr.into()), value.into());
        self
    }

    /// Make `TriggerMethod::Direct` fail; `Synthetic` still works.
    pub fn failing_direct_trigger(mut self) -> Self {
        self.fail_direct_trigger = true;
        self
    }

    /// Make every trigger method fail.
    pub fn failing_all_triggers(mut self) -> Self {
        self.fail_all_triggers = true;
        self
    }

    fn current(&self) -> Option<&MockStage> {
        let idx = self.state.read().unwrap().current_stage;
        self.stages.get(idx)
    }

    fn register(&self, element: MockElement) -> ElementHandle {
        let mut state = self.state.write().unwrap();
        let id = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(id, element);
        ElementHandle(id)
    }

    fn resolve(&self, handle: ElementHandle) -> SourceResult<MockElement> {
        self.state
            .read()
            .unwrap()
            .handles
            .get(&handle.0)
            .cloned()
            .ok_or(SourceError::StaleElement)
    }

    fn container(&self, index: usize) -> SourceResult<&MockContainer> {
        self.current()
            .and_then(|stage| stage.containers.get(index))
            .ok_or(SourceError::StaleElement)
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn navigate(&self, url: &str) -> SourceResult<()> {
        let mut state = self.state.write().unwrap();
        state.url = Some(url.to_string());
        state.current_stage = 0;
        state.handles.clear();
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.state.read().unwrap().url.clone()
    }

    async fn find_all(&self, locator: &Locator) -> SourceResult<Vec<ElementHandle>> {
        let Some(stage) = self.current() else {
            return Ok(Vec::new());
        };

        match locator {
            Locator::Css(selector) => {
                if *selector == stage.container_selector {
                    Ok((0..stage.containers.len())
                        .map(|i| self.register(MockElement::Container(i)))
                        .collect())
                } else if self.page_texts.contains_key(selector)
                    || self.page_attrs.keys().any(|(s, _)| s == selector)
                {
                    Ok(vec![self.register(MockElement::Page {
                        selector: selector.clone(),
                    })])
                } else {
                    Ok(Vec::new())
                }
            }
            Locator::ButtonText(phrases) => {
                if stage.affordance == AffordanceState::Absent {
                    return Ok(Vec::new());
                }
                let lower = stage.affordance_text.to_lowercase();
                if phrases.iter().any(|p| lower.contains(&p.to_lowercase())) {
                    Ok(vec![self.register(MockElement::Affordance)])
                } else {
                    Ok(Vec::new())
                }
            }
            Locator::AnyButton => {
                if stage.affordance == AffordanceState::Absent {
                    Ok(Vec::new())
                } else {
                    Ok(vec![self.register(MockElement::Affordance)])
                }
            }
            // Mock affordances are only discoverable by text; precise
            // strategies fall through so ordering is exercised
            Locator::Id(_) | Locator::DataAttr(_) => Ok(Vec::new()),
        }
    }

    async fn find_in(
        &self,
        container: ElementHandle,
        locator: &Locator,
    ) -> SourceResult<Option<ElementHandle>> {
        let MockElement::Container(index) = self.resolve(container)? else {
            return Ok(None);
        };
        let Locator::Css(selector) = locator else {
            return Ok(None);
        };

        if self.container(index)?.has_selector(selector) {
            Ok(Some(self.register(MockElement::Field {
                container: index,
                selector: selector.clone(),
            })))
        } else {
            Ok(None)
        }
    }

    async fn find_all_in(
        &self,
        container: ElementHandle,
        locator: &Locator,
    ) -> SourceResult<Vec<ElementHandle>> {
        Ok(self.find_in(container, locator).await?.into_iter().collect())
    }

    async fn text(&self, el: ElementHandle) -> SourceResult<Option<String>> {
        match self.resolve(el)? {
            MockElement::Field {
                container,
                selector,
            } => {
                let c = self.container(container)?;
                if c.poisoned {
                    return Err(SourceError::StaleElement);
                }
                Ok(c.texts.get(&selector).cloned())
            }
            MockElement::Page { selector } => Ok(self.page_texts.get(&selector).cloned()),
            MockElement::Affordance => Ok(self
                .current()
                .map(|stage| stage.affordance_text.clone())),
            MockElement::Container(_) => Ok(None),
        }
    }

    async fn attr(&self, el: ElementHandle, name: &str) -> SourceResult<Option<String>> {
        match self.resolve(el)? {
            MockElement::Field {
                container,
                selector,
            } => {
                let c = self.container(container)?;
                if c.poisoned {
                    return Err(SourceError::StaleElement);
                }
                Ok(c.attrs.get(&(selector, name.to_string())).cloned())
            }
            MockElement::Page { selector } => {
                Ok(self.page_attrs.get(&(selector, name.to_string())).cloned())
            }
            _ => Ok(None),
        }
    }

    async fn is_visible(&self, el: ElementHandle) -> SourceResult<bool> {
        match self.resolve(el)? {
            MockElement::Affordance => Ok(self
                .current()
                .map(|stage| {
                    matches!(
                        stage.affordance,
                        AffordanceState::Present | AffordanceState::Disabled
                    )
                })
                .unwrap_or(false)),
            _ => Ok(true),
        }
    }

    async fn is_disabled(&self, el: ElementHandle) -> SourceResult<bool> {
        match self.resolve(el)? {
            MockElement::Affordance => Ok(self
                .current()
                .map(|stage| stage.affordance == AffordanceState::Disabled)
                .unwrap_or(false)),
            _ => Ok(false),
        }
    }

    async fn trigger(&self, el: ElementHandle, method: TriggerMethod) -> SourceResult<()> {
        let MockElement::Affordance = self.resolve(el)? else {
            return Err(SourceError::TriggerFailed("not an affordance".to_string()));
        };

        if self.fail_all_triggers {
            return Err(SourceError::TriggerFailed("scripted failure".to_string()));
        }
        if self.fail_direct_trigger && method == TriggerMethod::Direct {
            return Err(SourceError::TriggerFailed(
                "scripted direct-click failure".to_string(),
            ));
        }

        let mut state = self.state.write().unwrap();
        if state.current_stage + 1 < self.stages.len() {
            state.current_stage += 1;
        }
        Ok(())
    }

    async fn wait_for_settle(&self, _timeout: Duration) {}

    fn name(&self) -> &str {
        "mock"
    }
}

/// A mock embedder returning deterministic vectors.
///
/// Failures can be scripted per image URL, permanently or for the first
/// N attempts (to exercise retry behavior).
pub struct MockEmbedder {
    dimension: usize,
    permanent_failures: RwLock<HashSet<String>>,
    transient_failures: RwLock<HashMap<String, u32>>,
    calls: RwLock<Vec<String>>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedder {
    /// Create a mock embedder with a 512-dim output.
    pub fn new() -> Self {
        Self {
            dimension: 512,
            permanent_failures: RwLock::new(HashSet::new()),
            transient_failures: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Always fail for this image URL.
    pub fn failing(self, url: impl Into<String>) -> Self {
        self.permanent_failures.write().unwrap().insert(url.into());
        self
    }

    /// Fail the first `times` attempts for this URL, then succeed.
    pub fn failing_transiently(self, url: impl Into<String>, times: u32) -> Self {
        self.transient_failures
            .write()
            .unwrap()
            .insert(url.into(), times);
        self
    }

    /// All embed calls made so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl ImageEmbedder for MockEmbedder {
    async fn embed(&self, image_url: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.write().unwrap().push(image_url.to_string());

        if self.permanent_failures.read().unwrap().contains(image_url) {
            return Err(EmbedError::Permanent("scripted failure".to_string()));
        }

        {
            let mut transient = self.transient_failures.write().unwrap();
            if let Some(remaining) = transient.get_mut(image_url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EmbedError::Transient("scripted flake".to_string()));
                }
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(image_url.as_bytes());
        let hash = hasher.finalize();

        Ok((0..self.dimension)
            .map(|i| {
                let byte = hash[i % 32] as f32;
                (byte / 127.5) - 1.0
            })
            .collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A sink wrapper that fails scripted chunk calls, for exercising
/// per-chunk failure isolation.
pub struct FlakySink {
    inner: MemorySink,
    fail_calls: RwLock<HashSet<usize>>,
    fail_all: bool,
    call_count: RwLock<usize>,
}

impl Default for FlakySink {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakySink {
    /// Create a sink that succeeds everything (until scripted).
    pub fn new() -> Self {
        Self {
            inner: MemorySink::new(),
            fail_calls: RwLock::new(HashSet::new()),
            fail_all: false,
            call_count: RwLock::new(0),
        }
    }

    /// Fail the Nth `upsert_chunk` call (zero-based).
    pub fn failing_call(self, index: usize) -> Self {
        self.fail_calls.write().unwrap().insert(index);
        self
    }

    /// Fail every chunk.
    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Access the records that made it through.
    pub fn inner(&self) -> &MemorySink {
        &self.inner
    }
}

#[async_trait]
impl RecordSink for FlakySink {
    async fn upsert_chunk(&self, records: &[PersistableRecord]) -> SinkResult<u64> {
        let call = {
            let mut count = self.call_count.write().unwrap();
            let current = *count;
            *count += 1;
            current
        };

        if self.fail_all || self.fail_calls.read().unwrap().contains(&call) {
            return Err(crate::error::SinkError::ChunkRejected {
                reason: format!("scripted failure for call {call}"),
            });
        }

        self.inner.upsert_chunk(records).await
    }

    async fn count(&self, source: Option<&str>) -> SinkResult<u64> {
        self.inner.count(source).await
    }

    async fn recent(&self, source: &str, limit: usize) -> SinkResult<Vec<PersistableRecord>> {
        self.inner.recent(source, limit).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
