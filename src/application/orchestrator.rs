//! Sync run orchestration
//!
//! Drives one run through discovery, concurrent page fetching with
//! streaming extraction and upserts, and final reconciliation, all under a
//! wall-clock run budget. Page and record failures are recovered locally
//! and counted; only discovery failure, budget exhaustion or external
//! cancellation end a run with a non-success status.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::{StreamExt, stream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::change_detector::ChangeDetector;
use crate::application::discovery::PaginationDiscoverer;
use crate::domain::errors::{FetchError, SyncError};
use crate::domain::services::PageProvider;
use crate::domain::sync_run::{RunStatus, SyncPhase, SyncRun};
use crate::infrastructure::catalog_repository::CatalogRepository;
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::extractor::RecordExtractor;
use crate::infrastructure::normalizer;

/// What happened to one page, aggregated into the run record
enum PageOutcome {
    Fetched { upserted: u32, anomalies: u32, upsert_failures: u32 },
    TransientFailure,
    PermanentFailure,
    ParseFailure,
    Cancelled,
}

pub struct SyncOrchestrator {
    provider: Arc<dyn PageProvider>,
    extractor: Arc<RecordExtractor>,
    repo: CatalogRepository,
    change_detector: ChangeDetector,
    config: SyncConfig,
    phase: Arc<RwLock<SyncPhase>>,
}

impl SyncOrchestrator {
    pub fn new(
        provider: Arc<dyn PageProvider>,
        extractor: Arc<RecordExtractor>,
        repo: CatalogRepository,
        config: SyncConfig,
    ) -> Self {
        let change_detector = ChangeDetector::new(repo.clone());
        Self {
            provider,
            extractor,
            repo,
            change_detector,
            config,
            phase: Arc::new(RwLock::new(SyncPhase::Idle)),
        }
    }

    /// Handle for the status query surface
    pub fn phase_handle(&self) -> Arc<RwLock<SyncPhase>> {
        Arc::clone(&self.phase)
    }

    pub async fn current_phase(&self) -> SyncPhase {
        *self.phase.read().await
    }

    async fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write().await = phase;
    }

    /// Execute one full synchronization run.
    ///
    /// Always returns the finished run record; store failures while
    /// writing the audit log are the only hard errors.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<SyncRun> {
        let mut run = SyncRun::new();
        info!("🚀 Starting sync run {}", run.id);
        self.repo.insert_run(&run).await?;

        let cancel = shutdown.child_token();
        let budget = Duration::from_secs(self.config.run_budget_minutes * 60);

        let outcome = tokio::select! {
            result = self.execute(&mut run, &cancel) => result,
            _ = tokio::time::sleep(budget) => {
                warn!("⏰ Run budget of {:?} exhausted, cancelling in-flight work", budget);
                cancel.cancel();
                Err(SyncError::BudgetExceeded {
                    budget_seconds: budget.as_secs(),
                })
            }
        };

        run.status = match outcome {
            Ok(()) => RunStatus::Completed,
            Err(SyncError::BudgetExceeded { .. }) => RunStatus::TimedOut,
            Err(SyncError::Cancelled) => {
                run.error_summary.cancelled = true;
                RunStatus::Failed
            }
            Err(SyncError::DiscoveryFailed { ref reason }) => {
                error!("Discovery failed, run is fatal: {}", reason);
                RunStatus::Failed
            }
            Err(SyncError::AlreadyRunning) => RunStatus::Failed,
            Err(SyncError::Store(ref e)) => {
                error!("Store failure ended run {}: {:#}", run.id, e);
                RunStatus::Failed
            }
        };
        run.finished_at = Some(Utc::now());
        self.repo.finalize_run(&run).await?;

        self.set_phase(match run.status {
            RunStatus::Completed => SyncPhase::Completed,
            RunStatus::TimedOut => SyncPhase::TimedOut,
            _ => SyncPhase::Failed,
        })
        .await;

        info!(
            "Run {} finished: {:?} - {} pages ok, {} failed, {} records upserted, {} deactivated ({} recovered errors)",
            run.id,
            run.status,
            run.pages_fetched_ok,
            run.pages_failed,
            run.records_upserted,
            run.records_deactivated,
            run.error_summary.total_errors(),
        );
        Ok(run)
    }

    async fn execute(&self, run: &mut SyncRun, cancel: &CancellationToken) -> Result<(), SyncError> {
        self.set_phase(SyncPhase::Discovering).await;
        let discoverer = PaginationDiscoverer::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.extractor),
            self.config.max_page_ceiling,
        );
        let discovery = discoverer.discover(cancel).await?;
        run.pages_discovered = discovery.pages;
        run.error_summary.truncated = discovery.truncated;
        info!(
            "📄 Discovered {} pages{}",
            discovery.pages,
            if discovery.truncated { " (truncated at ceiling)" } else { "" }
        );

        self.set_phase(SyncPhase::Fetching).await;
        // Counters are folded into the run as each page finishes, not after
        // the whole stream: when the budget drops this future mid-flight the
        // audit row still reports every page that completed.
        let mut cancelled = false;
        {
            let mut pages = stream::iter(1..=discovery.pages)
                .map(|page| self.process_page(page, cancel))
                .buffer_unordered(self.config.max_concurrent_fetches.max(1));

            while let Some(outcome) = pages.next().await {
                match outcome {
                    PageOutcome::Fetched { upserted, anomalies, upsert_failures } => {
                        run.pages_fetched_ok += 1;
                        run.records_upserted += upserted;
                        run.error_summary.parse_anomalies += anomalies;
                        run.error_summary.upsert_failures += upsert_failures;
                    }
                    PageOutcome::TransientFailure => {
                        run.pages_failed += 1;
                        run.error_summary.transient_fetch += 1;
                    }
                    PageOutcome::PermanentFailure => {
                        run.pages_failed += 1;
                        run.error_summary.permanent_fetch += 1;
                    }
                    PageOutcome::ParseFailure => {
                        run.pages_failed += 1;
                        run.error_summary.parse_pages += 1;
                    }
                    PageOutcome::Cancelled => cancelled = true,
                }
            }
        }
        if cancelled || cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.set_phase(SyncPhase::Reconciling).await;
        if ChangeDetector::should_reconcile(run) {
            let report = self.change_detector.reconcile(run).await?;
            run.records_deactivated = report.removed as u32;
        } else {
            run.error_summary.reconcile_skipped = true;
            info!(
                "Reconciliation skipped: run observed {}/{} pages{}",
                run.pages_fetched_ok,
                run.pages_discovered,
                if run.error_summary.truncated { ", discovery truncated" } else { "" }
            );
        }

        Ok(())
    }

    /// Fetch, extract, normalize and upsert one page. Never fails the
    /// run: every error is classified into the page outcome.
    async fn process_page(&self, page: u32, cancel: &CancellationToken) -> PageOutcome {
        let html = match self.provider.fetch_page(page, cancel).await {
            Ok(html) => html,
            Err(FetchError::Cancelled) => return PageOutcome::Cancelled,
            Err(e) if e.is_transient() => {
                warn!("Page {} failed after retries: {}", page, e);
                return PageOutcome::TransientFailure;
            }
            Err(e) => {
                warn!("Page {} failed permanently: {}", page, e);
                return PageOutcome::PermanentFailure;
            }
        };

        let page_url = self.provider.page_url(page);
        // Extraction is synchronous; the parsed DOM never crosses an await
        let outcome = match self.extractor.extract(&html, &page_url) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Page {}: {}", page, e);
                return PageOutcome::ParseFailure;
            }
        };

        let mut upserted = 0u32;
        let mut upsert_failures = 0u32;
        for raw in &outcome.records {
            if cancel.is_cancelled() {
                return PageOutcome::Cancelled;
            }
            let record = normalizer::normalize(raw, Utc::now());
            match self.repo.upsert(&record).await {
                Ok(()) => upserted += 1,
                Err(e) => {
                    // Record-level store failure: skip and count
                    error!("Upsert failed for '{}': {:#}", record.display_label(), e);
                    upsert_failures += 1;
                }
            }
        }

        info!(
            "Page {}: {} records upserted ({} anomalies)",
            page, upserted, outcome.anomalies
        );
        PageOutcome::Fetched {
            upserted,
            anomalies: outcome.anomalies,
            upsert_failures,
        }
    }
}
