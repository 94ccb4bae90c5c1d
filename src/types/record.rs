//! Record types at each stage of the pipeline.
//!
//! A record passes through three shapes: `CandidateRecord` (ephemeral,
//! re-extracted on every pagination pass), `NormalizedRecord` (candidate
//! merged with site statics, price parsed), and `PersistableRecord`
//! (normalized plus deterministic identity and optional embedding).
//! The latter two are built once per product right before persistence
//! and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::config::SiteConfig;

/// Inferred audience segment for a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Women,
    Men,
}

impl Audience {
    /// Stable string form used in persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Women => "women",
            Audience::Men => "men",
        }
    }
}

/// A provisional catalog entry extracted from one listing container.
///
/// `source_url` is always absolute: the extraction pipeline discards
/// containers whose link cannot be resolved rather than emitting a
/// record with a relative or missing URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Absolute product URL
    pub source_url: String,

    /// Identifier derived from the URL path or an explicit attribute
    pub external_id: String,

    /// Product title, if extracted
    pub title: Option<String>,

    /// Price exactly as the page formats it ("139,00 EUR"); parsing is
    /// a normalization concern, not an extraction concern
    pub price_raw: Option<String>,

    /// Absolute image URL, if extracted
    pub image_url: Option<String>,

    /// Inferred audience segment
    pub audience: Option<Audience>,

    /// Brand, if the listing exposes one
    pub brand: Option<String>,

    /// Available sizes
    pub sizes: Vec<String>,

    /// Free-form description text
    pub description: Option<String>,
}

impl CandidateRecord {
    /// Create a candidate with the two required fields.
    pub fn new(source_url: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            external_id: external_id.into(),
            title: None,
            price_raw: None,
            image_url: None,
            audience: None,
            brand: None,
            sizes: Vec::new(),
            description: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the raw price text.
    pub fn with_price_raw(mut self, price: impl Into<String>) -> Self {
        self.price_raw = Some(price.into());
        self
    }

    /// Set the image URL.
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Set the audience.
    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = Some(audience);
        self
    }
}

/// A candidate merged with site-level static configuration.
///
/// `price` is either `None` or a non-negative finite number; parsing
/// never fails loudly, it degrades to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub source: String,
    pub source_url: String,
    pub external_id: String,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub audience: Option<Audience>,
    pub brand: Option<String>,
    pub merchant: Option<String>,
    pub country: String,
    pub second_hand: bool,
    pub sizes: Vec<String>,
    pub description: Option<String>,
}

impl NormalizedRecord {
    /// Merge a candidate with site statics, parsing the raw price.
    pub fn from_candidate(candidate: CandidateRecord, site: &SiteConfig) -> Self {
        let price = candidate
            .price_raw
            .as_deref()
            .and_then(crate::normalize::parse_price);

        Self {
            source: site.source.clone(),
            source_url: candidate.source_url,
            external_id: candidate.external_id,
            title: candidate.title,
            image_url: candidate.image_url,
            price,
            currency: site.currency.clone(),
            audience: candidate.audience,
            brand: candidate.brand.clone().or_else(|| site.brand.clone()),
            merchant: site.merchant.clone(),
            country: site.country.clone(),
            second_hand: site.second_hand,
            sizes: candidate.sizes,
            description: candidate.description,
        }
    }
}

/// A record ready for idempotent persistence.
///
/// `id` is a pure function of `(source, source_url)`; title, price and
/// image changes over time overwrite the stored row rather than
/// creating a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistableRecord {
    /// Deterministic identity, see `normalize::record_id`
    pub id: String,

    pub source: String,
    pub source_url: String,
    pub external_id: String,
    pub title: String,
    pub image_url: String,
    pub price: Option<f64>,
    pub currency: String,
    pub audience: Option<Audience>,
    pub brand: Option<String>,
    pub merchant: Option<String>,
    pub country: String,
    pub second_hand: bool,
    pub sizes: Vec<String>,
    pub description: Option<String>,

    /// Optional visual embedding from the enrichment stage
    pub embedding: Option<Vec<f32>>,

    /// When this record was produced
    pub harvested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::config::SiteConfig;

    fn site() -> SiteConfig {
        SiteConfig::new("testsite", "https://shop.example.com")
    }

    #[test]
    fn test_candidate_builder() {
        let c = CandidateRecord::new("https://shop.example.com/p/x", "x")
            .with_title("Raw Jacket")
            .with_price_raw("139,00 EUR")
            .with_audience(Audience::Men);

        assert_eq!(c.title.as_deref(), Some("Raw Jacket"));
        assert_eq!(c.price_raw.as_deref(), Some("139,00 EUR"));
        assert_eq!(c.audience, Some(Audience::Men));
    }

    #[test]
    fn test_normalize_parses_price() {
        let c = CandidateRecord::new("https://shop.example.com/p/x", "x")
            .with_price_raw("139,00 EUR");
        let n = NormalizedRecord::from_candidate(c, &site());
        assert_eq!(n.price, Some(139.0));
        assert_eq!(n.source, "testsite");
    }

    #[test]
    fn test_normalize_unparseable_price_is_none() {
        let c = CandidateRecord::new("https://shop.example.com/p/x", "x")
            .with_price_raw("sold out");
        let n = NormalizedRecord::from_candidate(c, &site());
        assert_eq!(n.price, None);
    }

    #[test]
    fn test_site_brand_fills_missing_candidate_brand() {
        let mut s = site();
        s.brand = Some("Acme".to_string());
        let c = CandidateRecord::new("https://shop.example.com/p/x", "x");
        let n = NormalizedRecord::from_candidate(c, &s);
        assert_eq!(n.brand.as_deref(), Some("Acme"));
    }
}
