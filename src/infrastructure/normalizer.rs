//! Record canonicalization and dedup key derivation
//!
//! Pure functions: the same raw input always yields the same canonical
//! record and the same normalized key. The key is a blake3 hash over the
//! case-folded (brand, name, factory) triple, so it stays stable across
//! re-scrapes regardless of markup or ordering changes.
//!
//! The factory suffix patterns and the known-brand table mirror what the
//! source site actually puts into product titles.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::record::{CatalogRecord, RawRecord};

/// Factories the source site appends to titles as a comma suffix.
/// The second capture group, when present, is an article code.
static FACTORY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i),\s*(Givaudan Premium|Givaudan SuperLux)\s*$",
        r"(?i),\s*(SELUZ)\s*$",
        r"(?i),\s*(Argeville)\s*$",
        r"(?i),\s*(Lz)\s+(\d+[\d\-/TТ]*)\s*$",
        r"(?i),\s*(Lz)\s*$",
        r"(?i),\s*(Bin Tammam|EPS|Hamidi|Iberchem|LZ AG|MG Gulcicek|Reiha|Luzi)\s*([^,]*?)\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("factory pattern must compile"))
    .collect()
});

/// "(мотив ...)" markers carry no identity and are stripped before splitting
static MOTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\(мотив[^)]*\)\s*").expect("motive pattern must compile"));

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern must compile"));

/// Brand prefixes observed in catalog titles, longest matched first
const KNOWN_BRANDS: &[&str] = &[
    "Victoria's Secret",
    "Thomas Kosmala",
    "Giorgio Armani",
    "Dolce & Gabbana",
    "Yves Saint Laurent",
    "Jean Paul Gaultier",
    "Tom Ford",
    "Paco Rabanne",
    "Hugo Boss",
    "Christian Dior",
    "Maison Margiela",
    "Zarkoperfume",
    "Montale",
    "Mancera",
    "Byredo",
    "Creed",
    "Chanel",
    "Versace",
    "Lancome",
    "Guerlain",
    "Givenchy",
    "Burberry",
    "Moschino",
    "Kilian",
    "Amouage",
    "Memo",
    "Xerjoff",
    "Initio",
    "Attar Collection",
    "Ex Nihilo",
    "Escentric Molecules",
];

/// Brand, name, factory and article split out of one full title
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitleParts {
    pub brand: Option<String>,
    pub name: Option<String>,
    pub factory: Option<String>,
    pub article: Option<String>,
}

/// Split a full product title into its identifying parts.
///
/// Titles look like "Tom Ford Lost Cherry (мотив), Givaudan Premium" or
/// "Ajmal Amber Wood, Lz 0345-T". The factory suffix is peeled off first,
/// then the brand prefix.
pub fn split_title(full_title: &str) -> TitleParts {
    let mut parts = TitleParts::default();
    let mut title = full_title.trim().to_string();

    for pattern in FACTORY_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&title) {
            parts.factory = caps.get(1).map(|m| m.as_str().trim().to_string());
            parts.article = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty());
            title = pattern.replace(&title, "").trim().to_string();
            break;
        }
    }

    title = MOTIVE_RE.replace_all(&title, " ").trim().to_string();
    title = WHITESPACE_RE.replace_all(&title, " ").to_string();

    if title.is_empty() {
        return parts;
    }

    // Known brand prefix wins; fall back to a "Brand - Name" separator,
    // then to treating the leading word(s) as the brand.
    let lowered = title.to_lowercase();
    let mut brands: Vec<&str> = KNOWN_BRANDS.to_vec();
    brands.sort_by_key(|b| std::cmp::Reverse(b.len()));
    for known in brands {
        let prefix = format!("{} ", known.to_lowercase());
        if lowered.starts_with(&prefix) {
            parts.brand = Some(known.to_string());
            parts.name = Some(title[known.len()..].trim().to_string());
            return parts;
        }
    }

    if let Some((left, right)) = title.split_once(" - ") {
        let left = left.trim();
        if !left.is_empty() && left.split_whitespace().count() <= 3 {
            parts.brand = Some(left.to_string());
            parts.name = Some(right.trim().to_string());
            return parts;
        }
    }

    let words: Vec<&str> = title.split_whitespace().collect();
    match words.len() {
        0 => {}
        1 => {
            parts.name = Some(words[0].to_string());
        }
        _ => {
            parts.brand = Some(words[0].to_string());
            parts.name = Some(words[1..].join(" "));
        }
    }

    parts
}

/// Deterministic dedup key over the canonicalized identity triple.
///
/// The factory is part of the key: the catalog lists the same fragrance
/// from several factories and those are distinct purchasable records.
pub fn normalized_key(brand: &str, name: &str, factory: Option<&str>) -> String {
    let canonical = format!(
        "{}|{}|{}",
        canonicalize(brand),
        canonicalize(name),
        factory.map(canonicalize).unwrap_or_default()
    );
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

fn canonicalize(value: &str) -> String {
    WHITESPACE_RE
        .replace_all(value.trim(), " ")
        .to_lowercase()
}

/// Parse a formatted price like "1 500 руб." or "2 340,50 ₽" into a
/// numeric value and a currency code. Returns None when no digits appear.
pub fn parse_price(text: &str) -> Option<(f64, String)> {
    let currency = if text.contains('€') {
        "EUR"
    } else if text.contains('$') {
        "USD"
    } else {
        // The source site prices in rubles
        "RUB"
    };

    let mut cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    // A trailing ",NN" is a decimal comma; any other comma is a separator
    if let Some(pos) = cleaned.rfind(',') {
        if cleaned.len() - pos <= 3 {
            cleaned.replace_range(pos..=pos, ".");
        }
    }
    cleaned.retain(|c| c != ',');

    cleaned
        .parse::<f64>()
        .ok()
        .map(|value| (value, currency.to_string()))
}

/// Build the canonical record for a raw listing record.
///
/// Pure apart from the supplied timestamp; missing article codes never
/// block normalization since the key does not depend on them.
pub fn normalize(raw: &RawRecord, now: DateTime<Utc>) -> CatalogRecord {
    let brand = raw.brand.as_deref().unwrap_or("").trim().to_string();
    let name = raw.name.as_deref().unwrap_or("").trim().to_string();
    let factory = raw
        .factory
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let key = normalized_key(&brand, &name, factory.as_deref());

    let (price, currency) = match raw.price_text.as_deref().and_then(parse_price) {
        Some((value, currency)) => (Some(value), currency),
        None => (None, "RUB".to_string()),
    };

    let source_article = raw
        .article
        .clone()
        .or_else(|| raw.attributes.get("article").cloned())
        .filter(|s| !s.trim().is_empty());

    let mut attributes: HashMap<String, String> = raw
        .attributes
        .iter()
        .filter(|(k, v)| k.as_str() != "article" && !v.trim().is_empty())
        .map(|(k, v)| (k.clone(), v.trim().to_string()))
        .collect();
    attributes.shrink_to_fit();

    CatalogRecord {
        normalized_key: key,
        source_article,
        brand,
        name,
        factory,
        full_title: raw.full_title.trim().to_string(),
        price,
        price_formatted: raw.price_text.clone().filter(|s| !s.trim().is_empty()),
        currency,
        attributes,
        source_url: raw.source_url.clone(),
        first_seen_at: now,
        last_seen_at: now,
        is_active: true,
    }
}
