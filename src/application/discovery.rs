//! Pagination discovery
//!
//! Determines how many listing pages exist without prior knowledge. Page 1
//! is fetched and scanned for pagination links; when the markup gives no
//! usable indicator the discoverer probes forward until two consecutive
//! pages yield zero extractable records, capped by the configured page
//! ceiling. On ambiguous signals it prefers under-counting over unbounded
//! probing against a malformed or adversarial site.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::errors::{FetchError, SyncError};
use crate::domain::services::PageProvider;
use crate::infrastructure::extractor::RecordExtractor;

static PAGE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/page/(\d+)").expect("page path pattern must compile"));
static PAGE_QUERY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]page=(\d+)").expect("page query pattern must compile"));
static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("href pattern must compile"));

/// Outcome of pagination discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Number of listing pages to fetch, always >= 1
    pub pages: u32,
    /// True when the page ceiling cut the count short
    pub truncated: bool,
}

pub struct PaginationDiscoverer {
    provider: Arc<dyn PageProvider>,
    extractor: Arc<RecordExtractor>,
    max_page_ceiling: u32,
}

impl PaginationDiscoverer {
    pub fn new(
        provider: Arc<dyn PageProvider>,
        extractor: Arc<RecordExtractor>,
        max_page_ceiling: u32,
    ) -> Self {
        Self {
            provider,
            extractor,
            max_page_ceiling: max_page_ceiling.max(1),
        }
    }

    /// Resolve the page count. Failure to fetch or parse page 1 is
    /// run-fatal: with zero pages resolvable there is nothing to sync.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<DiscoveryResult, SyncError> {
        let first_page = self
            .provider
            .fetch_page(1, cancel)
            .await
            .map_err(|e| match e {
                FetchError::Cancelled => SyncError::Cancelled,
                other => SyncError::DiscoveryFailed {
                    reason: format!("page 1 unfetchable: {other}"),
                },
            })?;

        let page_url = self.provider.page_url(1);
        let outcome = self
            .extractor
            .extract(&first_page, &page_url)
            .map_err(|e| SyncError::DiscoveryFailed {
                reason: e.to_string(),
            })?;
        if outcome.records.is_empty() {
            return Err(SyncError::DiscoveryFailed {
                reason: format!("page 1 ({page_url}) has no extractable records"),
            });
        }

        if let Some(last_page) = Self::max_page_in_links(&first_page) {
            if last_page > self.max_page_ceiling {
                warn!(
                    "Pagination claims {} pages, capping at ceiling {}",
                    last_page, self.max_page_ceiling
                );
                return Ok(DiscoveryResult {
                    pages: self.max_page_ceiling,
                    truncated: true,
                });
            }
            info!("Discovered {} pages from pagination links", last_page);
            return Ok(DiscoveryResult {
                pages: last_page,
                truncated: false,
            });
        }

        self.probe_forward(cancel).await
    }

    /// No explicit indicator: walk forward until two consecutive empty
    /// pages, or until the ceiling stops us.
    async fn probe_forward(&self, cancel: &CancellationToken) -> Result<DiscoveryResult, SyncError> {
        info!("No pagination indicator on page 1, probing forward");
        let mut last_with_records: u32 = 1;
        let mut consecutive_empty: u32 = 0;
        let mut page: u32 = 2;

        while page <= self.max_page_ceiling {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let has_records = match self.provider.fetch_page(page, cancel).await {
                Ok(html) => {
                    let page_url = self.provider.page_url(page);
                    match self.extractor.extract(&html, &page_url) {
                        Ok(outcome) => !outcome.records.is_empty(),
                        Err(_) => false,
                    }
                }
                // A page we cannot fetch counts as empty: under-counting
                // beats probing forever
                Err(e) => {
                    warn!("Probe of page {} failed: {}", page, e);
                    false
                }
            };

            if has_records {
                last_with_records = page;
                consecutive_empty = 0;
            } else {
                consecutive_empty += 1;
                if consecutive_empty >= 2 {
                    info!("Probe found last page with records: {}", last_with_records);
                    return Ok(DiscoveryResult {
                        pages: last_with_records,
                        truncated: false,
                    });
                }
            }
            page += 1;
        }

        warn!(
            "Probe hit the page ceiling ({}), treating catalog as truncated",
            self.max_page_ceiling
        );
        Ok(DiscoveryResult {
            pages: self.max_page_ceiling.min(last_with_records.max(1)),
            truncated: true,
        })
    }

    /// Highest page number advertised by pagination hrefs in the raw HTML
    fn max_page_in_links(html: &str) -> Option<u32> {
        let mut max_page: Option<u32> = None;
        for caps in HREF_RE.captures_iter(html) {
            let href = &caps[1];
            let number = PAGE_PATH_RE
                .captures(href)
                .or_else(|| PAGE_QUERY_RE.captures(href))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok());
            if let Some(n) = number {
                max_page = Some(max_page.map_or(n, |current| current.max(n)));
            }
        }
        max_page.filter(|n| *n >= 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves canned pages; unknown pages return 404
    struct StubProvider {
        pages: HashMap<u32, String>,
    }

    impl StubProvider {
        fn new(pages: Vec<(u32, String)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
            }
        }
    }

    #[async_trait]
    impl PageProvider for StubProvider {
        fn page_url(&self, page: u32) -> String {
            format!("https://stub.example/perfume/page/{page}/")
        }

        async fn fetch_page(
            &self,
            page: u32,
            _cancel: &CancellationToken,
        ) -> Result<String, FetchError> {
            self.pages
                .get(&page)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    status: 404,
                    url: self.page_url(page),
                })
        }
    }

    fn listing(titles: &[&str], pagination_hrefs: &[&str]) -> String {
        let mut body = String::new();
        for title in titles {
            body.push_str(&format!(
                r#"<div class="ut2-gl__content"><a class="product-title" href="/perfume/p/">{title}</a></div>"#
            ));
        }
        for href in pagination_hrefs {
            body.push_str(&format!(r#"<a href="{href}">page</a>"#));
        }
        format!("<html><body>{body}</body></html>")
    }

    fn discoverer(provider: StubProvider, ceiling: u32) -> PaginationDiscoverer {
        PaginationDiscoverer::new(
            Arc::new(provider),
            Arc::new(RecordExtractor::new().unwrap()),
            ceiling,
        )
    }

    #[tokio::test]
    async fn test_discovers_from_pagination_links() {
        let provider = StubProvider::new(vec![(
            1,
            listing(
                &["Creed Aventus, Luzi"],
                &["/perfume/page/2/", "/perfume/page/17/", "/perfume/page/5/"],
            ),
        )]);
        let result = discoverer(provider, 200)
            .discover(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, DiscoveryResult { pages: 17, truncated: false });
    }

    #[tokio::test]
    async fn test_link_count_capped_by_ceiling() {
        let provider = StubProvider::new(vec![(
            1,
            listing(&["Creed Aventus, Luzi"], &["/perfume/page/9999/"]),
        )]);
        let result = discoverer(provider, 50)
            .discover(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, DiscoveryResult { pages: 50, truncated: true });
    }

    #[tokio::test]
    async fn test_probes_until_two_empty_pages() {
        let provider = StubProvider::new(vec![
            (1, listing(&["Creed Aventus, Luzi"], &[])),
            (2, listing(&["Rasasi Hawas"], &[])),
            (3, listing(&["Montale Intense Cafe"], &[])),
            // pages 4 and 5 are 404 -> two consecutive empties
        ]);
        let result = discoverer(provider, 200)
            .discover(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, DiscoveryResult { pages: 3, truncated: false });
    }

    #[tokio::test]
    async fn test_probe_never_exceeds_ceiling() {
        // Every page has records: cyclic/unbounded pagination
        let pages: Vec<(u32, String)> = (1..=100)
            .map(|p| (p, listing(&["Creed Aventus, Luzi"], &[])))
            .collect();
        let provider = StubProvider::new(pages);
        let result = discoverer(provider, 10)
            .discover(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.pages, 10);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_page1_failure_is_run_fatal() {
        let provider = StubProvider::new(vec![]);
        let err = discoverer(provider, 10)
            .discover(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DiscoveryFailed { .. }));
    }

    #[tokio::test]
    async fn test_page1_without_records_is_run_fatal() {
        let provider = StubProvider::new(vec![(1, "<html><body>maintenance</body></html>".to_string())]);
        let err = discoverer(provider, 10)
            .discover(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DiscoveryFailed { .. }));
    }
}
