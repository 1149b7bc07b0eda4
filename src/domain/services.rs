//! Service traits at the seam between orchestration and infrastructure

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::FetchError;

/// Source of catalog listing pages.
///
/// Implemented by the HTTP fetcher in production and by stubs in tests so
/// that discovery and orchestration can be exercised without a network.
#[async_trait]
pub trait PageProvider: Send + Sync {
    /// Listing URL for the given 1-based page number
    fn page_url(&self, page: u32) -> String;

    /// Fetch one listing page. Retries for transient failures happen
    /// inside the provider; an `Err` here is final for this run.
    async fn fetch_page(&self, page: u32, cancel: &CancellationToken)
        -> Result<String, FetchError>;
}
