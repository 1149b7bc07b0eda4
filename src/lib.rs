//! aroma-sync - Catalog Synchronization Engine
//!
//! Periodically discovers, fetches, parses, deduplicates and reconciles the
//! paginated perfume catalog of an external shop site into a canonical,
//! queryable SQLite store. The consultant bot consumes the store through
//! two read operations and never writes to it.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-export the main entry points
pub use application::orchestrator::SyncOrchestrator;
pub use application::scheduler::Scheduler;
pub use infrastructure::catalog_repository::CatalogRepository;
