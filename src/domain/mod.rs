//! Domain module - Core entities and contracts
//!
//! Contains the catalog record and sync run entities, the error taxonomy,
//! and the page provider seam between orchestration and the HTTP layer.

pub mod errors;
pub mod record;
pub mod services;
pub mod sync_run;

// Re-export commonly used items
pub use errors::{FetchError, SyncError};
pub use record::{CatalogRecord, RawRecord};
pub use sync_run::{ErrorSummary, ReconcileReport, RunStatus, SyncPhase, SyncRun};
