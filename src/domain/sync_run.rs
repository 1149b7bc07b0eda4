//! Sync run audit entities
//!
//! A `SyncRun` is the unit of reconciliation: one row per run, appended to
//! the `sync_runs` table. Deactivation of stale records only ever happens
//! for a run that reached `Completed` without page-level gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal and in-flight statuses of a synchronization run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
            RunStatus::TimedOut => "TimedOut",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Running" => Some(RunStatus::Running),
            "Completed" => Some(RunStatus::Completed),
            "Failed" => Some(RunStatus::Failed),
            "TimedOut" => Some(RunStatus::TimedOut),
            _ => None,
        }
    }
}

/// Live phase of the orchestrator state machine, exposed to the status query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Discovering,
    Fetching,
    Reconciling,
    Completed,
    Failed,
    TimedOut,
}

/// Counts of recovered errors plus run-level flags, persisted as JSON
/// in the audit log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorSummary {
    /// Fetches that kept failing transiently after all retries
    pub transient_fetch: u32,
    /// Non-retryable 4xx responses
    pub permanent_fetch: u32,
    /// Pages that fetched fine but yielded no extractable records
    pub parse_pages: u32,
    /// Individual records dropped for missing both brand and name
    pub parse_anomalies: u32,
    /// Records that failed to upsert (store errors, recovered per record)
    pub upsert_failures: u32,
    /// Pagination discovery hit the configured page ceiling
    pub truncated: bool,
    /// Reconciliation was skipped because the run did not observe every page
    pub reconcile_skipped: bool,
    /// Run was cancelled by an external shutdown signal
    pub cancelled: bool,
}

impl ErrorSummary {
    /// Total count of recovered page/record level errors
    pub fn total_errors(&self) -> u32 {
        self.transient_fetch
            + self.permanent_fetch
            + self.parse_pages
            + self.parse_anomalies
            + self.upsert_failures
    }
}

/// One synchronization run, persisted append-only for operational visibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_discovered: u32,
    pub pages_fetched_ok: u32,
    pub pages_failed: u32,
    pub records_upserted: u32,
    pub records_deactivated: u32,
    pub status: RunStatus,
    pub error_summary: ErrorSummary,
}

impl SyncRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            pages_discovered: 0,
            pages_fetched_ok: 0,
            pages_failed: 0,
            records_upserted: 0,
            records_deactivated: 0,
            status: RunStatus::Running,
            error_summary: ErrorSummary::default(),
        }
    }

    /// Whether this run observed the complete catalog and may deactivate
    /// records that were not re-seen.
    pub fn covered_whole_catalog(&self) -> bool {
        self.pages_failed == 0 && !self.error_summary.truncated
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }
}

impl Default for SyncRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Diff produced by reconciliation of a completed run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records first seen during this run
    pub added: u64,
    /// Records re-seen during this run but known from before
    pub updated: u64,
    /// Active records deactivated because the run did not re-observe them
    pub removed: u64,
}
