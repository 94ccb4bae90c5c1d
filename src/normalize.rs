//! Price normalization, deterministic identity, and the required-field
//! gate between extraction and persistence.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::record::{NormalizedRecord, PersistableRecord};

/// Parse a source-formatted price string into a number.
///
/// Handles the European decimal-comma convention ("139,00") and mixed
/// thousands-separator formats ("1,139.00" / "1.139,00" after comma
/// rewrite). Pure: same input, same output, no locale state. Any
/// failure degrades to `None`, never an error.
pub fn parse_price(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let rewritten = match (trimmed.rfind(','), trimmed.rfind('.')) {
        // European format: comma is the decimal separator
        (Some(_), None) => trimmed.replace(',', "."),
        // Both present: the later separator is the decimal one, the
        // earlier is a thousands separator ("1.139,00" vs "1,139.00")
        (Some(comma), Some(period)) if comma > period => {
            trimmed.replace('.', "").replace(',', ".")
        }
        (Some(_), Some(_)) => trimmed.replace(',', ""),
        _ => trimmed.to_string(),
    };

    let token = numeric_token_re()
        .find(&rewritten)
        .map(|m| m.as_str())?;

    match token.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => None,
    }
}

/// First contiguous run of digits with at most one decimal point.
fn numeric_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("static regex"))
}

/// Deterministic record identity from the natural unique key.
///
/// `id = "{source}_" + sha256("{source}:{source_url}")`. Two runs over
/// the same product always produce the same id, which is what makes the
/// sink's conflict-keyed upsert idempotent.
pub fn record_id(source: &str, source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(source_url.as_bytes());
    format!("{}_{:x}", source, hasher.finalize())
}

/// Why a record was dropped at the required-field gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingSource,
    MissingSourceUrl,
    MissingImageUrl,
    MissingTitle,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::MissingSource => "missing source",
            DropReason::MissingSourceUrl => "missing source_url",
            DropReason::MissingImageUrl => "missing image_url",
            DropReason::MissingTitle => "missing title",
        };
        f.write_str(s)
    }
}

/// Gate a normalized record into a persistable one.
///
/// A record missing any of source, source_url, image_url or title is
/// invalid and never reaches the sink.
pub fn into_persistable(record: NormalizedRecord) -> Result<PersistableRecord, DropReason> {
    if record.source.trim().is_empty() {
        return Err(DropReason::MissingSource);
    }
    if record.source_url.trim().is_empty() {
        return Err(DropReason::MissingSourceUrl);
    }
    let image_url = match record.image_url {
        Some(ref u) if !u.trim().is_empty() => u.clone(),
        _ => return Err(DropReason::MissingImageUrl),
    };
    let title = match record.title {
        Some(ref t) if !t.trim().is_empty() => t.clone(),
        _ => return Err(DropReason::MissingTitle),
    };

    let id = record_id(&record.source, &record.source_url);

    Ok(PersistableRecord {
        id,
        source: record.source,
        source_url: record.source_url,
        external_id: record.external_id,
        title,
        image_url,
        price: record.price,
        currency: record.currency,
        audience: record.audience,
        brand: record.brand,
        merchant: record.merchant,
        country: record.country,
        second_hand: record.second_hand,
        sizes: record.sizes,
        description: record.description,
        embedding: None,
        harvested_at: Utc::now(),
    })
}

/// Gate a batch, logging each drop with its available identifiers.
pub fn gate_records(records: Vec<NormalizedRecord>) -> (Vec<PersistableRecord>, Vec<DropReason>) {
    let mut kept = Vec::with_capacity(records.len());
    let mut dropped = Vec::new();

    for record in records {
        let url = record.source_url.clone();
        let source = record.source.clone();
        match into_persistable(record) {
            Ok(p) => kept.push(p),
            Err(reason) => {
                debug!(source = %source, url = %url, reason = %reason, "Record dropped at validation gate");
                dropped.push(reason);
            }
        }
    }

    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::config::SiteConfig;
    use crate::types::record::{CandidateRecord, NormalizedRecord};
    use proptest::prelude::*;

    #[test]
    fn test_parse_price_european_decimal_comma() {
        assert_eq!(parse_price("139,00 EUR"), Some(139.0));
        assert_eq!(parse_price("89,95"), Some(89.95));
    }

    #[test]
    fn test_parse_price_mixed_separators() {
        assert_eq!(parse_price("1.139,00"), Some(1139.0));
        assert_eq!(parse_price("1,139.00"), Some(1139.0));
    }

    #[test]
    fn test_parse_price_plain() {
        assert_eq!(parse_price("139.00"), Some(139.0));
        assert_eq!(parse_price("$49.99"), Some(49.99));
        assert_eq!(parse_price("from 20 EUR"), Some(20.0));
    }

    #[test]
    fn test_parse_price_garbage_is_none() {
        assert_eq!(parse_price("not a price"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("   "), None);
        assert_eq!(parse_price("€"), None);
    }

    proptest! {
        #[test]
        fn parse_price_never_panics(s in ".*") {
            let _ = parse_price(&s);
        }

        #[test]
        fn parse_price_is_pure(s in ".{0,40}") {
            prop_assert_eq!(parse_price(&s), parse_price(&s));
        }

        #[test]
        fn parsed_prices_are_non_negative_and_finite(s in ".{0,40}") {
            if let Some(v) = parse_price(&s) {
                prop_assert!(v.is_finite());
                prop_assert!(v >= 0.0);
            }
        }
    }

    #[test]
    fn test_record_id_is_stable() {
        let a = record_id("shop", "https://shop.example.com/p/x");
        let b = record_id("shop", "https://shop.example.com/p/x");
        assert_eq!(a, b);
        assert!(a.starts_with("shop_"));
        // source prefix + '_' + 64 hex chars of SHA-256
        assert_eq!(a.len(), "shop".len() + 1 + 64);
    }

    #[test]
    fn test_record_id_distinguishes_sources_and_urls() {
        let base = record_id("shop", "https://shop.example.com/p/x");
        assert_ne!(base, record_id("other", "https://shop.example.com/p/x"));
        assert_ne!(base, record_id("shop", "https://shop.example.com/p/y"));
    }

    fn normalized(title: Option<&str>, image: Option<&str>) -> NormalizedRecord {
        let mut c = CandidateRecord::new("https://shop.example.com/p/x", "x");
        c.title = title.map(String::from);
        c.image_url = image.map(String::from);
        NormalizedRecord::from_candidate(c, &SiteConfig::new("shop", "https://shop.example.com"))
    }

    #[test]
    fn test_gate_requires_title_and_image() {
        assert_eq!(
            into_persistable(normalized(None, Some("https://cdn.example.com/a.jpg"))),
            Err(DropReason::MissingTitle)
        );
        assert_eq!(
            into_persistable(normalized(Some("Jacket"), None)),
            Err(DropReason::MissingImageUrl)
        );

        let ok = into_persistable(normalized(
            Some("Jacket"),
            Some("https://cdn.example.com/a.jpg"),
        ))
        .unwrap();
        assert_eq!(ok.title, "Jacket");
        assert!(ok.id.starts_with("shop_"));
        assert!(ok.embedding.is_none());
    }

    #[test]
    fn test_gate_records_splits_kept_and_dropped() {
        let records = vec![
            normalized(Some("A"), Some("https://cdn.example.com/a.jpg")),
            normalized(None, Some("https://cdn.example.com/b.jpg")),
            normalized(Some("C"), Some("https://cdn.example.com/c.jpg")),
        ];
        let (kept, dropped) = gate_records(records);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, vec![DropReason::MissingTitle]);
    }
}
