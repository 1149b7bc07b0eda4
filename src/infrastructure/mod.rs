//! Infrastructure module - External-world adapters
//!
//! HTTP fetching, HTML extraction, normalization, persistence, config
//! and logging. Everything here is driven by the application layer.

pub mod catalog_repository;
pub mod config;
pub mod database_connection;
pub mod extractor;
pub mod http_client;
pub mod logging;
pub mod normalizer;

// Re-export commonly used items
pub use catalog_repository::CatalogRepository;
pub use config::{AppConfig, ConfigManager};
pub use database_connection::DatabaseConnection;
pub use extractor::{ExtractError, ExtractOutcome, RecordExtractor};
pub use http_client::{CatalogPageFetcher, HttpClient, HttpClientConfig};
