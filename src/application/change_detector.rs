//! Soft-delete reconciliation
//!
//! After a run that observed the whole catalog, every active record whose
//! last sighting predates the run start was not re-observed and gets
//! deactivated. A partial run (failed pages, truncated discovery, timeout)
//! must never deactivate records it simply didn't get to visit.

use anyhow::Result;
use tracing::info;

use crate::domain::sync_run::{ReconcileReport, SyncRun};
use crate::infrastructure::catalog_repository::CatalogRepository;

pub struct ChangeDetector {
    repo: CatalogRepository,
}

impl ChangeDetector {
    pub fn new(repo: CatalogRepository) -> Self {
        Self { repo }
    }

    /// Whether this run is allowed to deactivate records
    pub fn should_reconcile(run: &SyncRun) -> bool {
        run.covered_whole_catalog()
    }

    /// Deactivate stale records and produce the run diff
    pub async fn reconcile(&self, run: &SyncRun) -> Result<ReconcileReport> {
        let removed = self.repo.deactivate_stale(run.started_at).await?;
        let report = self.repo.reconcile_report(run.started_at, removed).await?;

        info!(
            "Reconciled run {}: {} added, {} updated, {} removed",
            run.id, report.added, report.updated, report.removed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::{Duration, Utc};

    use crate::domain::record::CatalogRecord;
    use crate::infrastructure::database_connection::DatabaseConnection;

    async fn repo() -> CatalogRepository {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        CatalogRepository::new(db.pool().clone())
    }

    fn record(key: &str, seen: chrono::DateTime<Utc>) -> CatalogRecord {
        CatalogRecord {
            normalized_key: key.to_string(),
            source_article: None,
            brand: "Brand".to_string(),
            name: key.to_string(),
            factory: None,
            full_title: format!("Brand {key}"),
            price: None,
            price_formatted: None,
            currency: "RUB".to_string(),
            attributes: HashMap::new(),
            source_url: "https://aroma-euro.ru/perfume/x/".to_string(),
            first_seen_at: seen,
            last_seen_at: seen,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_reconcile_deactivates_unseen_records() {
        let repo = repo().await;
        let detector = ChangeDetector::new(repo.clone());

        let before = Utc::now() - Duration::hours(2);
        repo.upsert(&record("stale", before)).await.unwrap();

        let mut run = SyncRun::new();
        run.started_at = Utc::now() - Duration::minutes(5);

        // One record re-observed during the run, one brand new
        repo.upsert(&record("reseen", before)).await.unwrap();
        repo.upsert(&record("reseen", Utc::now())).await.unwrap();
        repo.upsert(&record("fresh", Utc::now())).await.unwrap();

        let report = detector.reconcile(&run).await.unwrap();
        assert_eq!(report.removed, 1); // "stale"
        assert_eq!(report.added, 1); // "fresh"
        assert_eq!(report.updated, 1); // "reseen"

        let stale = repo.fetch_by_key("stale").await.unwrap().unwrap();
        assert!(!stale.is_active);
        let fresh = repo.fetch_by_key("fresh").await.unwrap().unwrap();
        assert!(fresh.is_active);
    }

    #[test]
    fn test_partial_runs_do_not_reconcile() {
        let mut run = SyncRun::new();
        assert!(ChangeDetector::should_reconcile(&run));

        run.pages_failed = 2;
        assert!(!ChangeDetector::should_reconcile(&run));

        run.pages_failed = 0;
        run.error_summary.truncated = true;
        assert!(!ChangeDetector::should_reconcile(&run));
    }
}
