//! One-shot HTTP content source for static catalog pages.
//!
//! Fetches a document once per `navigate` and answers element queries by
//! CSS selection over the parsed HTML. `scraper`'s parsed documents are
//! not `Send`, so the raw HTML string is the retained state and each
//! query reparses inside a synchronous section. Element handles encode
//! the element's position in document order plus a generation counter so
//! handles from a previous document fail as stale instead of resolving
//! to the wrong element.

use std::time::Duration;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::traits::source::{ContentSource, ElementHandle, Locator, TriggerMethod};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Fetch attempts per navigation.
const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Initial fetch backoff, doubled after each failed attempt.
const INITIAL_FETCH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Document {
    html: String,
    url: String,
    generation: u64,
}

/// A `ContentSource` over plain HTTP fetches.
///
/// Cannot trigger reveal actions; pagination against this source
/// converges through the no-affordance path while keeping everything
/// the initial document exposes.
pub struct StaticSource {
    client: Client,
    politeness_delay: Duration,
    state: RwLock<Option<Document>>,
}

impl StaticSource {
    /// Create a source with a default HTTP client.
    pub fn new() -> SourceResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Http(Box::new(e)))?;

        Ok(Self {
            client,
            politeness_delay: Duration::from_millis(500),
            state: RwLock::new(None),
        })
    }

    /// Set the delay observed before each fetch.
    pub fn with_politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }

    /// Preload a document without fetching. For tests and cached pages.
    pub fn with_document(html: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            politeness_delay: Duration::ZERO,
            state: RwLock::new(Some(Document {
                html: html.into(),
                url: url.into(),
                generation: 1,
            })),
        }
    }

    async fn fetch(&self, url: &str) -> SourceResult<(String, String)> {
        let mut backoff = INITIAL_FETCH_BACKOFF;
        let mut last_error: Option<SourceError> = None;

        for attempt in 1..=MAX_FETCH_ATTEMPTS {
            match self.fetch_once(url).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) => {
                    warn!(url, attempt, error = %e, "Fetch failed");
                    last_error = Some(e);
                    if attempt < MAX_FETCH_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(SourceError::Timeout {
            url: url.to_string(),
        }))
    }

    async fn fetch_once(&self, url: &str) -> SourceResult<(String, String)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Http(Box::new(e)))?
            .error_for_status()
            .map_err(|e| SourceError::Http(Box::new(e)))?;

        // Redirects may land on a different origin; record where we are
        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| SourceError::Http(Box::new(e)))?;

        Ok((html, final_url))
    }

    /// Run a closure against the freshly parsed current document.
    fn with_document_state<T>(
        &self,
        f: impl FnOnce(&Html, u64) -> SourceResult<T>,
    ) -> SourceResult<T> {
        let state = self.state.read().unwrap();
        let doc = state.as_ref().ok_or(SourceError::NoDocument)?;
        let html = Html::parse_document(&doc.html);
        f(&html, doc.generation)
    }

    fn locator_selector(locator: &Locator) -> SourceResult<Selector> {
        let css = match locator {
            Locator::Css(selector) => selector.clone(),
            Locator::Id(id) => format!("[id=\"{id}\"]"),
            Locator::DataAttr(attr) => format!("[{attr}]"),
            Locator::ButtonText(_) => "button, a, [role=\"button\"]".to_string(),
            Locator::AnyButton => "button".to_string(),
        };
        Selector::parse(&css).map_err(|e| SourceError::BadLocator(e.to_string()))
    }

    /// Whether a button-like element's text satisfies the locator's
    /// phrase filter (a plain CSS match always does).
    fn matches_locator_text(locator: &Locator, el: ElementRef) -> bool {
        let Locator::ButtonText(phrases) = locator else {
            return true;
        };
        let text = element_text(el).unwrap_or_default().to_lowercase();
        phrases.iter().any(|p| text.contains(&p.to_lowercase()))
    }

    fn resolve<'a>(
        html: &'a Html,
        generation: u64,
        handle: ElementHandle,
    ) -> SourceResult<ElementRef<'a>> {
        let (handle_generation, index) = split_handle(handle);
        if handle_generation != generation {
            return Err(SourceError::StaleElement);
        }
        nth_element(html, index).ok_or(SourceError::StaleElement)
    }
}

/// Handles pack a 32-bit generation above a 32-bit document-order index.
fn make_handle(generation: u64, index: u64) -> ElementHandle {
    ElementHandle((generation << 32) | (index & 0xffff_ffff))
}

fn split_handle(handle: ElementHandle) -> (u64, u64) {
    (handle.0 >> 32, handle.0 & 0xffff_ffff)
}

fn nth_element(html: &Html, index: u64) -> Option<ElementRef<'_>> {
    html.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .nth(index as usize)
}

fn index_of(html: &Html, target: ElementRef) -> Option<u64> {
    html.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .position(|el| el.id() == target.id())
        .map(|i| i as u64)
}

fn element_text(el: ElementRef) -> Option<String> {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[async_trait::async_trait]
impl ContentSource for StaticSource {
    async fn navigate(&self, url: &str) -> SourceResult<()> {
        if url::Url::parse(url).is_err() {
            return Err(SourceError::InvalidUrl {
                url: url.to_string(),
            });
        }

        if !self.politeness_delay.is_zero() {
            tokio::time::sleep(self.politeness_delay).await;
        }

        let (html, final_url) = self.fetch(url).await?;
        debug!(url, final_url, bytes = html.len(), "Document loaded");

        let mut state = self.state.write().unwrap();
        let generation = state.as_ref().map(|d| d.generation).unwrap_or(0) + 1;
        *state = Some(Document {
            html,
            url: final_url,
            generation,
        });
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .as_ref()
            .map(|d| d.url.clone())
    }

    async fn find_all(&self, locator: &Locator) -> SourceResult<Vec<ElementHandle>> {
        let selector = Self::locator_selector(locator)?;
        self.with_document_state(|html, generation| {
            Ok(html
                .root_element()
                .descendants()
                .filter_map(ElementRef::wrap)
                .enumerate()
                .filter(|(_, el)| selector.matches(el))
                .filter(|(_, el)| Self::matches_locator_text(locator, *el))
                .map(|(index, _)| make_handle(generation, index as u64))
                .collect())
        })
    }

    async fn find_in(
        &self,
        container: ElementHandle,
        locator: &Locator,
    ) -> SourceResult<Option<ElementHandle>> {
        Ok(self.find_all_in(container, locator).await?.into_iter().next())
    }

    async fn find_all_in(
        &self,
        container: ElementHandle,
        locator: &Locator,
    ) -> SourceResult<Vec<ElementHandle>> {
        let selector = Self::locator_selector(locator)?;
        self.with_document_state(|html, generation| {
            let container = Self::resolve(html, generation, container)?;
            let mut handles = Vec::new();
            for el in container.select(&selector) {
                if !Self::matches_locator_text(locator, el) {
                    continue;
                }
                if let Some(index) = index_of(html, el) {
                    handles.push(make_handle(generation, index));
                }
            }
            Ok(handles)
        })
    }

    async fn text(&self, el: ElementHandle) -> SourceResult<Option<String>> {
        self.with_document_state(|html, generation| {
            let el = Self::resolve(html, generation, el)?;
            Ok(element_text(el))
        })
    }

    async fn attr(&self, el: ElementHandle, name: &str) -> SourceResult<Option<String>> {
        self.with_document_state(|html, generation| {
            let el = Self::resolve(html, generation, el)?;
            Ok(el.value().attr(name).map(|v| v.to_string()))
        })
    }

    async fn is_visible(&self, el: ElementHandle) -> SourceResult<bool> {
        self.with_document_state(|html, generation| {
            let el = Self::resolve(html, generation, el)?;
            if el.value().attr("hidden").is_some() {
                return Ok(false);
            }
            let style = el.value().attr("style").unwrap_or_default().replace(' ', "");
            Ok(!style.contains("display:none") && !style.contains("visibility:hidden"))
        })
    }

    async fn is_disabled(&self, el: ElementHandle) -> SourceResult<bool> {
        self.with_document_state(|html, generation| {
            let el = Self::resolve(html, generation, el)?;
            Ok(el.value().attr("disabled").is_some()
                || el.value().attr("aria-disabled") == Some("true"))
        })
    }

    async fn trigger(&self, _el: ElementHandle, _method: TriggerMethod) -> SourceResult<()> {
        Err(SourceError::TriggerUnsupported)
    }

    async fn wait_for_settle(&self, _timeout: Duration) {
        // A fetched document is already settled
    }

    fn name(&self) -> &str {
        "static"
    }
}
