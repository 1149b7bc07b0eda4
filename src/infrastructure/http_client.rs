//! HTTP client for catalog page fetching with rate limiting and retries
//!
//! Wraps reqwest with a governor rate limiter, a per-request timeout,
//! exponential backoff for transient failures and cooperative cancellation.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, StatusCode,
    header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::FetchError;
use crate::domain::services::PageProvider;

/// HTTP client configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    /// Retry attempts for transient failures, on top of the first try
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "aroma-sync/0.3 (catalog sync)".to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 3,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

/// Rate-limited HTTP client used by the page fetcher
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    /// Fetch a URL as text, retrying transient failures with exponential
    /// backoff and jitter. Honors any Retry-After cooldown on 429.
    pub async fn fetch_text(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            match self.fetch_once(url, cancel).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.backoff_delay(attempt, err.retry_after());
                    attempt += 1;
                    warn!(
                        "Transient failure for {} (attempt {}/{}): {} - retrying in {:?}",
                        url, attempt, self.config.max_retries, err, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        tokio::select! {
            _ = self.rate_limiter.until_ready() => {}
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        }

        debug!("Fetching URL: {}", url);

        let response = tokio::select! {
            result = self.client.get(url).send() => {
                result.map_err(|e| Self::classify_reqwest_error(url, &e))?
            }
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited {
                url: url.to_string(),
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = tokio::select! {
            result = response.text() => {
                result.map_err(|e| Self::classify_reqwest_error(url, &e))?
            }
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        debug!("Successfully fetched {} ({} chars)", url, body.len());
        Ok(body)
    }

    fn classify_reqwest_error(url: &str, error: &reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }

    /// Exponential backoff with jitter; a server-advertised cooldown
    /// takes precedence over the computed delay.
    fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(cooldown) = retry_after {
            return cooldown;
        }
        let base = self.config.retry_base_delay_ms;
        let exp = base.saturating_mul(1u64 << attempt.min(6));
        let jitter = fastrand::u64(0..=base);
        Duration::from_millis(exp + jitter)
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

/// Production page provider: maps page numbers to listing URLs on the
/// source site and fetches them through the rate-limited client.
pub struct CatalogPageFetcher {
    client: HttpClient,
    base_url: String,
    listing_path: String,
}

impl CatalogPageFetcher {
    pub fn new(client: HttpClient, base_url: &str, listing_path: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            listing_path: format!("/{}/", listing_path.trim_matches('/')),
        }
    }
}

#[async_trait]
impl PageProvider for CatalogPageFetcher {
    fn page_url(&self, page: u32) -> String {
        if page <= 1 {
            format!("{}{}", self.base_url, self.listing_path)
        } else {
            format!("{}{}page/{}/", self.base_url, self.listing_path, page)
        }
    }

    async fn fetch_page(
        &self,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let url = self.page_url(page);
        self.client.fetch_text(&url, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let config = HttpClientConfig::default();
        let client = HttpClient::new(config);
        assert!(client.is_ok());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let config = HttpClientConfig {
            max_requests_per_second: 0,
            ..Default::default()
        };
        assert!(HttpClient::new(config).is_err());
    }

    #[test]
    fn test_page_url_layout() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let fetcher = CatalogPageFetcher::new(client, "https://aroma-euro.ru/", "perfume");

        assert_eq!(fetcher.page_url(1), "https://aroma-euro.ru/perfume/");
        assert_eq!(fetcher.page_url(7), "https://aroma-euro.ru/perfume/page/7/");
    }

    #[test]
    fn test_backoff_honors_retry_after() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let delay = client.backoff_delay(0, Some(Duration::from_secs(42)));
        assert_eq!(delay, Duration::from_secs(42));
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let client = HttpClient::new(HttpClientConfig {
            retry_base_delay_ms: 100,
            ..Default::default()
        })
        .unwrap();

        let first = client.backoff_delay(0, None);
        let third = client.backoff_delay(2, None);
        // Jitter is bounded by the base delay, so attempt 2 always exceeds attempt 0
        assert!(third >= first);
        assert!(first >= Duration::from_millis(100));
    }
}
