//! Listing-page record extraction
//!
//! Parses one fetched catalog page into raw records using ordered fallback
//! CSS selectors, so layout drift degrades extraction instead of crashing
//! the run. A record missing non-essential fields is kept; a record with
//! neither brand nor name is dropped and counted as a parse anomaly.

use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::domain::record::RawRecord;
use crate::infrastructure::normalizer;

/// Page-level extraction failure: the page fetched fine but produced
/// nothing usable (malformed markup, error page, empty listing).
#[derive(Error, Debug, Clone)]
pub enum ExtractError {
    #[error("no extractable records on {url} (tried selectors: {tried_selectors:?})")]
    NoRecordsFound {
        url: String,
        tried_selectors: Vec<String>,
    },
}

/// Result of parsing one page
#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub records: Vec<RawRecord>,
    /// Records dropped for missing both brand and name
    pub anomalies: u32,
}

/// Extractor for product listing pages.
///
/// Selectors are kept alongside their source text so extraction failures
/// can report exactly which CSS was tried against the drifted layout.
pub struct RecordExtractor {
    container_selectors: Vec<(String, Selector)>,
    title_selectors: Vec<(String, Selector)>,
    price_selectors: Vec<(String, Selector)>,
    feature_selectors: Vec<(String, Selector)>,
    feature_label_selector: Selector,
}

impl RecordExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            container_selectors: Self::compile_selectors(&[
                "div.ut2-gl__content",
                "div.ty-grid-list__item",
                "div.product-item",
                "form[name^='product_form']",
            ])?,
            title_selectors: Self::compile_selectors(&[
                "a.product-title",
                ".ut2-gl__name a",
                ".product-title a",
                "a[href*='/perfume/']",
            ])?,
            price_selectors: Self::compile_selectors(&[
                "span.ty-price-num",
                ".ty-price",
                "[class*='price']",
            ])?,
            feature_selectors: Self::compile_selectors(&[
                ".ty-control-group",
                ".ty-product-feature",
            ])?,
            feature_label_selector: Selector::parse(".ty-product-feature__label")
                .map_err(|e| anyhow::anyhow!("feature label selector: {e}"))?,
        })
    }

    fn compile_selectors(selector_strings: &[&str]) -> Result<Vec<(String, Selector)>> {
        let mut selectors = Vec::new();
        let mut errors = Vec::new();

        for selector_str in selector_strings {
            match Selector::parse(selector_str) {
                Ok(selector) => selectors.push((selector_str.to_string(), selector)),
                Err(e) => {
                    warn!("Failed to compile selector '{}': {}", selector_str, e);
                    errors.push(format!("'{selector_str}': {e}"));
                }
            }
        }

        if selectors.is_empty() {
            anyhow::bail!("No valid selectors compiled. Errors: {}", errors.join(", "));
        }
        Ok(selectors)
    }

    /// Parse a fetched page into raw records.
    ///
    /// Tries each container selector until one matches; when none does,
    /// falls back to scanning title anchors directly (price then unknown).
    pub fn extract(&self, html: &str, page_url: &str) -> Result<ExtractOutcome, ExtractError> {
        let document = Html::parse_document(html);
        let mut outcome = ExtractOutcome::default();
        let mut tried_selectors = Vec::new();

        for (selector_str, selector) in &self.container_selectors {
            tried_selectors.push(selector_str.clone());
            let containers: Vec<ElementRef> = document.select(selector).collect();
            if containers.is_empty() {
                continue;
            }

            debug!(
                "Found {} product containers on {} using '{}'",
                containers.len(),
                page_url,
                selector_str
            );
            for container in &containers {
                match self.extract_record(container, page_url) {
                    Some(record) => outcome.records.push(record),
                    None => outcome.anomalies += 1,
                }
            }
            // First matching container selector decides the page layout
            return Ok(outcome);
        }

        // Layout drift fallback: no recognizable containers, walk the
        // title anchors themselves.
        for (selector_str, selector) in &self.title_selectors {
            tried_selectors.push(selector_str.clone());
            let anchors: Vec<ElementRef> = document.select(selector).collect();
            if anchors.is_empty() {
                continue;
            }
            for anchor in &anchors {
                match self.record_from_anchor(anchor, page_url, None) {
                    Some(record) => outcome.records.push(record),
                    None => outcome.anomalies += 1,
                }
            }
            if !outcome.records.is_empty() {
                return Ok(outcome);
            }
        }

        if outcome.anomalies > 0 {
            // Everything on the page was unusable; report what we saw
            return Ok(outcome);
        }
        Err(ExtractError::NoRecordsFound {
            url: page_url.to_string(),
            tried_selectors,
        })
    }

    fn extract_record(&self, container: &ElementRef, page_url: &str) -> Option<RawRecord> {
        let anchor = self
            .title_selectors
            .iter()
            .find_map(|(_, s)| container.select(s).next())?;

        let price_text = self
            .price_selectors
            .iter()
            .find_map(|(_, s)| container.select(s).next())
            .map(|e| collect_text(&e))
            .filter(|t| !t.is_empty());

        self.record_from_anchor(&anchor, page_url, price_text)
            .map(|mut record| {
                self.collect_features(container, &mut record);
                record
            })
    }

    fn record_from_anchor(
        &self,
        anchor: &ElementRef,
        page_url: &str,
        price_text: Option<String>,
    ) -> Option<RawRecord> {
        let full_title = collect_text(anchor);
        if full_title.is_empty() {
            return None;
        }

        let parts = normalizer::split_title(&full_title);
        if parts.brand.is_none() && parts.name.is_none() {
            warn!("Dropping record with no identifying fields: '{}'", full_title);
            return None;
        }

        let source_url = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_url(href, page_url))
            .unwrap_or_else(|| page_url.to_string());

        Some(RawRecord {
            full_title,
            brand: parts.brand,
            name: parts.name,
            factory: parts.factory,
            article: parts.article,
            source_url,
            price_text,
            attributes: std::collections::HashMap::new(),
        })
    }

    /// Map feature labels the site uses into canonical attribute keys
    fn collect_features(&self, container: &ElementRef, record: &mut RawRecord) {
        for (_, selector) in &self.feature_selectors {
            for feature in container.select(selector) {
                let Some(label_el) = feature.select(&self.feature_label_selector).next() else {
                    continue;
                };
                let label = collect_text(&label_el).to_lowercase();
                let value = collect_text(&feature)
                    .replace(&collect_text(&label_el), "")
                    .trim()
                    .trim_start_matches(':')
                    .trim()
                    .to_string();
                if value.is_empty() {
                    continue;
                }

                let key = if label.contains("артикул") {
                    "article"
                } else if label.contains("пол") {
                    "gender"
                } else if label.contains("группа аромата") {
                    "fragrance_group"
                } else if label.contains("качество") {
                    "quality_level"
                } else if label.contains("фабрика") {
                    "factory"
                } else {
                    continue;
                };
                record.attributes.insert(key.to_string(), value);
            }
        }

        if record.article.is_none() {
            record.article = record.attributes.remove("article");
        }
        if record.factory.is_none() {
            if let Some(factory) = record.attributes.remove("factory") {
                record.factory = Some(factory);
            }
        } else {
            record.attributes.remove("factory");
        }
    }
}

fn collect_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    if href.starts_with("http") {
        return Some(href.to_string());
    }
    Url::parse(base_url)
        .ok()
        .and_then(|base| base.join(href).ok())
        .map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str = "https://aroma-euro.ru/perfume/";

    fn listing_page() -> String {
        r#"
        <html><body>
          <div class="ut2-gl__content">
            <a class="product-title" href="/perfume/lost-cherry-seluz/">
              Tom Ford Lost Cherry (мотив), SELUZ
            </a>
            <span class="ty-price-num">1 500 руб.</span>
          </div>
          <div class="ut2-gl__content">
            <a class="product-title" href="/perfume/hawas/">Rasasi Hawas</a>
            <span class="ty-price-num">990 руб.</span>
            <span class="ty-control-group">
              <span class="ty-product-feature__label">Пол</span>
              <span><em>мужской</em></span>
            </span>
          </div>
          <div class="ut2-gl__content">
            <a class="product-title" href="/perfume/broken/"></a>
          </div>
        </body></html>
        "#
        .to_string()
    }

    #[test]
    fn test_extracts_records_with_prices() {
        let extractor = RecordExtractor::new().unwrap();
        let outcome = extractor.extract(&listing_page(), PAGE_URL).unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.anomalies, 1);

        let first = &outcome.records[0];
        assert_eq!(first.brand.as_deref(), Some("Tom Ford"));
        assert_eq!(first.name.as_deref(), Some("Lost Cherry"));
        assert_eq!(first.factory.as_deref(), Some("SELUZ"));
        assert_eq!(first.price_text.as_deref(), Some("1 500 руб."));
        assert_eq!(
            first.source_url,
            "https://aroma-euro.ru/perfume/lost-cherry-seluz/"
        );
    }

    #[test]
    fn test_feature_labels_become_attributes() {
        let extractor = RecordExtractor::new().unwrap();
        let outcome = extractor.extract(&listing_page(), PAGE_URL).unwrap();

        let hawas = &outcome.records[1];
        assert_eq!(hawas.attributes.get("gender").map(String::as_str), Some("мужской"));
    }

    #[test]
    fn test_missing_factory_kept_as_none() {
        let extractor = RecordExtractor::new().unwrap();
        let outcome = extractor.extract(&listing_page(), PAGE_URL).unwrap();
        assert_eq!(outcome.records[1].factory, None);
    }

    #[test]
    fn test_anchor_fallback_without_containers() {
        let html = r#"
        <html><body>
          <a class="product-title" href="/perfume/aventus/">Creed Aventus, Luzi</a>
        </body></html>
        "#;
        let extractor = RecordExtractor::new().unwrap();
        let outcome = extractor.extract(html, PAGE_URL).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].brand.as_deref(), Some("Creed"));
        assert_eq!(outcome.records[0].price_text, None);
    }

    #[test]
    fn test_malformed_page_yields_error() {
        let extractor = RecordExtractor::new().unwrap();
        let result = extractor.extract("<html><body><p>503</p></body></html>", PAGE_URL);
        assert!(matches!(result, Err(ExtractError::NoRecordsFound { .. })));
    }

    #[test]
    fn test_extraction_error_reports_css_selectors() {
        let extractor = RecordExtractor::new().unwrap();
        let err = extractor
            .extract("<html><body><p>503</p></body></html>", PAGE_URL)
            .unwrap_err();

        let ExtractError::NoRecordsFound { tried_selectors, .. } = err;
        // The diagnostic must name the actual CSS tried, not internal labels
        assert!(tried_selectors.iter().any(|s| s == "div.ut2-gl__content"));
        assert!(tried_selectors.iter().any(|s| s == "a.product-title"));
    }
}
