use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single product as extracted from one listing page, before
/// canonicalization. Field values are whatever the markup yielded;
/// the normalizer cleans them up and derives the dedup key.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Full product title as shown on the listing page
    pub full_title: String,
    pub brand: Option<String>,
    pub name: Option<String>,
    pub factory: Option<String>,
    /// Article code if it appeared in the title suffix
    pub article: Option<String>,
    /// Absolute URL of the product page
    pub source_url: String,
    /// Formatted price text, e.g. "1 500 руб."
    pub price_text: Option<String>,
    /// Open string-to-string map of listed features (gender,
    /// fragrance_group, quality_level, ...)
    pub attributes: HashMap<String, String>,
}

/// Canonical catalog record owned by the deduplication store.
///
/// Created on first sighting, merged on every subsequent sighting and
/// never hard-deleted: reconciliation only flips `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogRecord {
    /// Stable dedup key: blake3 over canonicalized (brand, name, factory)
    pub normalized_key: String,
    /// External article code; may be absent or unreliable
    pub source_article: Option<String>,
    pub brand: String,
    pub name: String,
    pub factory: Option<String>,
    pub full_title: String,
    pub price: Option<f64>,
    pub price_formatted: Option<String>,
    pub currency: String,
    pub attributes: HashMap<String, String>,
    pub source_url: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub is_active: bool,
}

impl CatalogRecord {
    /// Human-readable label used in logs
    pub fn display_label(&self) -> String {
        match &self.factory {
            Some(factory) => format!("{} - {} ({})", self.brand, self.name, factory),
            None => format!("{} - {}", self.brand, self.name),
        }
    }
}
