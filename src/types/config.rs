//! Site catalog configuration.
//!
//! A catalog maps site names to per-site static configuration: source
//! identity, merchant/currency/country statics, the fetch mode, category
//! entry points, and per-field selector fallback lists. Selector entries
//! a site omits fall back to built-in defaults, so a minimal config only
//! needs `source` and `categories`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// How a site's documents are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteMode {
    /// Rendered browsing session with live reveal triggers
    Interactive,

    /// One-shot HTTP fetch of a static document
    Static,
}

/// One category entry point within a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Category listing URL
    pub url: String,

    /// Human-readable category name
    #[serde(default)]
    pub name: Option<String>,
}

impl CategoryConfig {
    /// Create a new category.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Display label: explicit name, or the URL.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// Ordered per-field selector fallback lists.
///
/// The extraction pipeline walks each list in order and takes the first
/// selector that yields non-empty, plausible text. Fields omitted from
/// configuration use these defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorMap {
    /// Listing container selector(s)
    #[serde(default = "default_containers")]
    pub containers: Vec<String>,

    /// Product link selector(s)
    #[serde(default = "default_link")]
    pub link: Vec<String>,

    /// Title selector(s)
    #[serde(default = "default_title")]
    pub title: Vec<String>,

    /// Price selector(s)
    #[serde(default = "default_price")]
    pub price: Vec<String>,

    /// Image selector(s)
    #[serde(default = "default_image")]
    pub image: Vec<String>,

    /// Size option selector(s)
    #[serde(default = "default_sizes")]
    pub sizes: Vec<String>,

    /// Audience/category hint selector(s)
    #[serde(default = "default_audience")]
    pub audience: Vec<String>,

    /// Description selector(s)
    #[serde(default = "default_description")]
    pub description: Vec<String>,
}

fn default_containers() -> Vec<String> {
    vec![
        ".product-block__inner".into(),
        ".product-item".into(),
        ".product-card".into(),
    ]
}

fn default_link() -> Vec<String> {
    vec!["a[href*=\"/products/\"]".into(), "a[href]".into()]
}

fn default_title() -> Vec<String> {
    vec![
        ".product-title".into(),
        ".title".into(),
        "h3".into(),
        "h2".into(),
    ]
}

fn default_price() -> Vec<String> {
    vec![
        ".price".into(),
        ".product-price".into(),
        "[data-price]".into(),
    ]
}

fn default_image() -> Vec<String> {
    vec!["img".into()]
}

fn default_sizes() -> Vec<String> {
    vec![".size-option".into(), "[data-size]".into()]
}

fn default_audience() -> Vec<String> {
    vec![".gender".into(), ".category".into()]
}

fn default_description() -> Vec<String> {
    vec![
        ".product-description".into(),
        ".description".into(),
        "[data-description]".into(),
    ]
}

impl Default for SelectorMap {
    fn default() -> Self {
        Self {
            containers: default_containers(),
            link: default_link(),
            title: default_title(),
            price: default_price(),
            image: default_image(),
            sizes: default_sizes(),
            audience: default_audience(),
            description: default_description(),
        }
    }
}

/// Static configuration for one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Stable source identifier (half of the natural unique key)
    pub source: String,

    /// Site entry URL (informational; categories carry their own URLs)
    pub base_url: String,

    /// Merchant display name
    #[serde(default)]
    pub merchant: Option<String>,

    /// Brand applied to records that don't extract their own
    #[serde(default)]
    pub brand: Option<String>,

    /// ISO currency code for this site's prices
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Country/region tag
    #[serde(default = "default_country")]
    pub country: String,

    /// Whether this site sells second-hand goods
    #[serde(default)]
    pub second_hand: bool,

    /// Fetch mode. The application uses this to pick which
    /// `ContentSource` to pair with the site (`StaticSource`, or an
    /// externally constructed browser session); the library itself
    /// never switches on it.
    #[serde(default = "default_mode")]
    pub mode: SiteMode,

    /// Category entry points
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,

    /// Per-field selector fallbacks
    #[serde(default)]
    pub selectors: SelectorMap,
}

fn default_currency() -> String {
    "EUR".to_string()
}

fn default_country() -> String {
    "eu".to_string()
}

fn default_mode() -> SiteMode {
    SiteMode::Static
}

impl SiteConfig {
    /// Create a minimal config with defaults.
    pub fn new(source: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            base_url: base_url.into(),
            merchant: None,
            brand: None,
            currency: default_currency(),
            country: default_country(),
            second_hand: false,
            mode: default_mode(),
            categories: Vec::new(),
            selectors: SelectorMap::default(),
        }
    }

    /// Add a category.
    pub fn with_category(mut self, category: CategoryConfig) -> Self {
        self.categories.push(category);
        self
    }

    /// Set the fetch mode.
    pub fn with_mode(mut self, mode: SiteMode) -> Self {
        self.mode = mode;
        self
    }
}

/// An ordered catalog of site configurations, keyed by site name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteCatalog {
    pub sites: IndexMap<String, SiteConfig>,
}

impl SiteCatalog {
    /// Parse a catalog from a JSON string.
    ///
    /// Rejects sites with an empty source identifier; everything
    /// downstream (identity, dedup, per-source queries) keys on it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(json)?;
        for (name, site) in &catalog.sites {
            if site.source.trim().is_empty() {
                return Err(HarvestError::Config(format!(
                    "site '{name}' has an empty source identifier"
                )));
            }
        }
        Ok(catalog)
    }

    /// Load a catalog from a JSON file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Look up a site by name.
    pub fn get(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.get(name)
    }

    /// Iterate over (name, config) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SiteConfig)> {
        self.sites.iter()
    }

    /// Number of configured sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
