//! ContentSource trait for navigable documents.
//!
//! A content source is anything that can load a document, answer element
//! queries against it, and (for interactive sources) trigger "reveal
//! more" actions: a rendered browser session, or a static HTML fetch.
//!
//! The pagination controller and extraction pipeline only ever talk to
//! this trait, so interactive and static sites share one code path.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SourceResult;

/// Opaque handle to an element in the currently loaded document.
///
/// Handles are only valid for the document state they were issued
/// against; a source may invalidate them after `navigate` or a
/// content-revealing trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// A locator strategy for finding elements.
///
/// Affordance discovery and field extraction both run down *ordered
/// lists* of locators, preferring structurally precise matches (id,
/// data attribute) over fuzzy text matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// CSS selector
    Css(String),

    /// Element with this exact `id` attribute
    Id(String),

    /// Element carrying this data attribute (e.g. `data-load-more`)
    DataAttr(String),

    /// Button-like element whose text contains any of these phrases
    /// (case-insensitive)
    ButtonText(Vec<String>),

    /// Any `<button>` element. Last-resort enumeration; callers are
    /// expected to filter by text before acting on a match.
    AnyButton,
}

impl Locator {
    /// Convenience constructor for a CSS locator.
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }
}

/// How to activate a reveal affordance.
///
/// `Direct` is the primary method. Some affordances are not reliably
/// triggerable that way under certain rendering states, so `Synthetic`
/// (programmatic event dispatch) exists as a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMethod {
    /// Direct interaction (a real click)
    Direct,

    /// Programmatic/synthetic event dispatch
    Synthetic,
}

/// A navigable document source.
///
/// Implementations:
/// - `StaticSource` - one-shot HTTP fetch, CSS queries over parsed HTML
/// - browser-session sources (external) - rendered DOM with live triggers
/// - `MockSource` (in `testing`) - scripted reveal behavior for tests
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Load a document. Invalidates all previously issued handles.
    async fn navigate(&self, url: &str) -> SourceResult<()>;

    /// URL of the currently loaded document (after redirects).
    ///
    /// Used to resolve root-relative links against the document's own
    /// origin, which may legitimately differ from the configured entry
    /// URL.
    fn current_url(&self) -> Option<String>;

    /// Find all elements matching the locator in the whole document.
    async fn find_all(&self, locator: &Locator) -> SourceResult<Vec<ElementHandle>>;

    /// Find the first matching element *within* a container element.
    async fn find_in(
        &self,
        container: ElementHandle,
        locator: &Locator,
    ) -> SourceResult<Option<ElementHandle>>;

    /// Find all matching elements within a container element.
    async fn find_all_in(
        &self,
        container: ElementHandle,
        locator: &Locator,
    ) -> SourceResult<Vec<ElementHandle>>;

    /// Text content of an element, if any.
    async fn text(&self, el: ElementHandle) -> SourceResult<Option<String>>;

    /// Attribute value of an element, if present.
    async fn attr(&self, el: ElementHandle, name: &str) -> SourceResult<Option<String>>;

    /// Whether the element is visible to a user.
    async fn is_visible(&self, el: ElementHandle) -> SourceResult<bool>;

    /// Whether the element is disabled. A disabled reveal affordance is
    /// an explicit "no more content" signal.
    async fn is_disabled(&self, el: ElementHandle) -> SourceResult<bool>;

    /// Activate a reveal affordance using the given method.
    async fn trigger(&self, el: ElementHandle, method: TriggerMethod) -> SourceResult<()>;

    /// Wait for network/content activity to settle, up to `timeout`.
    ///
    /// Best-effort: a timeout simply ends the wait early, it is never an
    /// error.
    async fn wait_for_settle(&self, timeout: Duration);

    /// Source name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_css_constructor() {
        assert_eq!(
            Locator::css(".product"),
            Locator::Css(".product".to_string())
        );
    }

    #[test]
    fn test_element_handle_is_copy() {
        let h = ElementHandle(7);
        let h2 = h;
        assert_eq!(h, h2);
    }
}
