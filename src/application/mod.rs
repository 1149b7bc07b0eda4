//! Application module - Use case orchestration
//!
//! Coordinates domain logic and infrastructure into complete sync runs:
//! pagination discovery, the run state machine, reconciliation and the
//! periodic scheduler.

pub mod change_detector;
pub mod discovery;
pub mod orchestrator;
pub mod scheduler;

// Re-export commonly used items
pub use change_detector::ChangeDetector;
pub use discovery::{DiscoveryResult, PaginationDiscoverer};
pub use orchestrator::SyncOrchestrator;
pub use scheduler::{Scheduler, Trigger, TriggerHandle};
