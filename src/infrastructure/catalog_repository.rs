//! Deduplication store and sync run audit log
//!
//! Exclusive owner of the `catalog_records` lifecycle. Upserts go through a
//! single SQL statement whose conflict clause merges field-by-field,
//! preferring the newest non-null value, so concurrent extraction workers
//! converge to the same state regardless of page completion order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::debug;

use crate::domain::record::CatalogRecord;
use crate::domain::sync_run::{ErrorSummary, ReconcileReport, RunStatus, SyncRun};

#[derive(Clone)]
pub struct CatalogRepository {
    pool: Arc<SqlitePool>,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    // ===============================
    // CATALOG RECORD OPERATIONS
    // ===============================

    /// Insert or merge one record keyed by its normalized key.
    ///
    /// The conflict clause is the per-field reducer: scalar fields take the
    /// incoming value only when it is non-null, the attributes map is
    /// json-patched, and a re-sighting always reactivates the record and
    /// advances `last_seen_at`. One statement per key keeps concurrent
    /// upserts serialized without an explicit lock.
    pub async fn upsert(&self, record: &CatalogRecord) -> Result<()> {
        let attributes = serde_json::to_string(&record.attributes)
            .context("Failed to serialize record attributes")?;

        sqlx::query(
            r#"
            INSERT INTO catalog_records
            (normalized_key, source_article, brand, name, factory, full_title,
             price, price_formatted, currency, attributes, source_url,
             first_seen_at, last_seen_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(normalized_key) DO UPDATE SET
                source_article  = COALESCE(excluded.source_article, source_article),
                brand           = excluded.brand,
                name            = excluded.name,
                factory         = COALESCE(excluded.factory, factory),
                full_title      = excluded.full_title,
                price           = COALESCE(excluded.price, price),
                price_formatted = COALESCE(excluded.price_formatted, price_formatted),
                currency        = excluded.currency,
                attributes      = json_patch(attributes, excluded.attributes),
                source_url      = excluded.source_url,
                last_seen_at    = excluded.last_seen_at,
                is_active       = 1
            "#,
        )
        .bind(&record.normalized_key)
        .bind(&record.source_article)
        .bind(&record.brand)
        .bind(&record.name)
        .bind(&record.factory)
        .bind(&record.full_title)
        .bind(record.price)
        .bind(&record.price_formatted)
        .bind(&record.currency)
        .bind(attributes)
        .bind(&record.source_url)
        .bind(record.first_seen_at)
        .bind(record.last_seen_at)
        .execute(&*self.pool)
        .await
        .with_context(|| format!("Failed to upsert record {}", record.normalized_key))?;

        Ok(())
    }

    /// All active records, ordered by brand then name (the contract the
    /// prompt-builder collaborators rely on)
    pub async fn fetch_all_active(&self) -> Result<Vec<CatalogRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT normalized_key, source_article, brand, name, factory, full_title,
                   price, price_formatted, currency, attributes, source_url,
                   first_seen_at, last_seen_at, is_active
            FROM catalog_records
            WHERE is_active = 1
            ORDER BY brand COLLATE NOCASE ASC, name COLLATE NOCASE ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        rows.into_iter().map(|row| Self::map_record(&row)).collect()
    }

    /// Single active record by article code, or None
    pub async fn fetch_by_article(&self, code: &str) -> Result<Option<CatalogRecord>> {
        let row = sqlx::query(
            r#"
            SELECT normalized_key, source_article, brand, name, factory, full_title,
                   price, price_formatted, currency, attributes, source_url,
                   first_seen_at, last_seen_at, is_active
            FROM catalog_records
            WHERE source_article = ? AND is_active = 1
            "#,
        )
        .bind(code)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|row| Self::map_record(&row)).transpose()
    }

    pub async fn fetch_by_key(&self, key: &str) -> Result<Option<CatalogRecord>> {
        let row = sqlx::query(
            r#"
            SELECT normalized_key, source_article, brand, name, factory, full_title,
                   price, price_formatted, currency, attributes, source_url,
                   first_seen_at, last_seen_at, is_active
            FROM catalog_records
            WHERE normalized_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|row| Self::map_record(&row)).transpose()
    }

    pub async fn count_active(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM catalog_records WHERE is_active = 1")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Soft-deactivate every active record not re-observed since `cutoff`.
    /// Returns the number of records deactivated.
    pub async fn deactivate_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE catalog_records SET is_active = 0 WHERE is_active = 1 AND last_seen_at < ?",
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;

        debug!("Deactivated {} stale records", result.rows_affected());
        Ok(result.rows_affected())
    }

    /// Added/updated counts for a run, derived from sighting timestamps
    pub async fn sighting_counts(&self, run_started: DateTime<Utc>) -> Result<(u64, u64)> {
        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN first_seen_at >= ? THEN 1 ELSE 0 END) AS added,
                SUM(CASE WHEN last_seen_at >= ? AND first_seen_at < ? THEN 1 ELSE 0 END) AS updated
            FROM catalog_records
            WHERE is_active = 1
            "#,
        )
        .bind(run_started)
        .bind(run_started)
        .bind(run_started)
        .fetch_one(&*self.pool)
        .await?;

        let added: i64 = row.try_get::<Option<i64>, _>("added")?.unwrap_or(0);
        let updated: i64 = row.try_get::<Option<i64>, _>("updated")?.unwrap_or(0);
        Ok((added as u64, updated as u64))
    }

    fn map_record(row: &SqliteRow) -> Result<CatalogRecord> {
        let attributes_json: String = row.get("attributes");
        let attributes: HashMap<String, String> = serde_json::from_str(&attributes_json)
            .context("Corrupt attributes JSON in catalog_records")?;

        Ok(CatalogRecord {
            normalized_key: row.get("normalized_key"),
            source_article: row.get("source_article"),
            brand: row.get("brand"),
            name: row.get("name"),
            factory: row.get("factory"),
            full_title: row.get("full_title"),
            price: row.get("price"),
            price_formatted: row.get("price_formatted"),
            currency: row.get("currency"),
            attributes,
            source_url: row.get("source_url"),
            first_seen_at: row.get("first_seen_at"),
            last_seen_at: row.get("last_seen_at"),
            is_active: row.get("is_active"),
        })
    }

    // ===============================
    // SYNC RUN AUDIT LOG
    // ===============================

    pub async fn insert_run(&self, run: &SyncRun) -> Result<()> {
        let summary = serde_json::to_string(&run.error_summary)?;
        sqlx::query(
            r#"
            INSERT INTO sync_runs
            (id, started_at, finished_at, pages_discovered, pages_fetched_ok,
             pages_failed, records_upserted, records_deactivated, status, error_summary)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.pages_discovered)
        .bind(run.pages_fetched_ok)
        .bind(run.pages_failed)
        .bind(run.records_upserted)
        .bind(run.records_deactivated)
        .bind(run.status.as_str())
        .bind(summary)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Write the final counters and status of a run back to its audit row
    pub async fn finalize_run(&self, run: &SyncRun) -> Result<()> {
        let summary = serde_json::to_string(&run.error_summary)?;
        sqlx::query(
            r#"
            UPDATE sync_runs SET
                finished_at = ?, pages_discovered = ?, pages_fetched_ok = ?,
                pages_failed = ?, records_upserted = ?, records_deactivated = ?,
                status = ?, error_summary = ?
            WHERE id = ?
            "#,
        )
        .bind(run.finished_at)
        .bind(run.pages_discovered)
        .bind(run.pages_fetched_ok)
        .bind(run.pages_failed)
        .bind(run.records_upserted)
        .bind(run.records_deactivated)
        .bind(run.status.as_str())
        .bind(summary)
        .bind(&run.id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Most recent run that reached Completed, used by the scheduler to
    /// skip redundant syncs and by the status query
    pub async fn last_completed_run(&self) -> Result<Option<SyncRun>> {
        let row = sqlx::query(
            "SELECT * FROM sync_runs WHERE status = 'Completed' ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|row| Self::map_run(&row)).transpose()
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query("SELECT * FROM sync_runs ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&*self.pool)
            .await?;

        rows.into_iter().map(|row| Self::map_run(&row)).collect()
    }

    fn map_run(row: &SqliteRow) -> Result<SyncRun> {
        let status_text: String = row.get("status");
        let status = RunStatus::parse(&status_text)
            .with_context(|| format!("Unknown run status '{status_text}' in sync_runs"))?;
        let summary_json: String = row.get("error_summary");
        let error_summary: ErrorSummary =
            serde_json::from_str(&summary_json).unwrap_or_default();

        Ok(SyncRun {
            id: row.get("id"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            pages_discovered: row.get::<i64, _>("pages_discovered") as u32,
            pages_fetched_ok: row.get::<i64, _>("pages_fetched_ok") as u32,
            pages_failed: row.get::<i64, _>("pages_failed") as u32,
            records_upserted: row.get::<i64, _>("records_upserted") as u32,
            records_deactivated: row.get::<i64, _>("records_deactivated") as u32,
            status,
            error_summary,
        })
    }
}

/// Diff counts for a reconciled run
impl CatalogRepository {
    pub async fn reconcile_report(
        &self,
        run_started: DateTime<Utc>,
        removed: u64,
    ) -> Result<ReconcileReport> {
        let (added, updated) = self.sighting_counts(run_started).await?;
        Ok(ReconcileReport {
            added,
            updated,
            removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use chrono::Duration;

    async fn test_repo() -> CatalogRepository {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        CatalogRepository::new(db.pool().clone())
    }

    fn record(key: &str, brand: &str, name: &str, now: DateTime<Utc>) -> CatalogRecord {
        CatalogRecord {
            normalized_key: key.to_string(),
            source_article: None,
            brand: brand.to_string(),
            name: name.to_string(),
            factory: None,
            full_title: format!("{brand} {name}"),
            price: None,
            price_formatted: None,
            currency: "RUB".to_string(),
            attributes: HashMap::new(),
            source_url: "https://aroma-euro.ru/perfume/x/".to_string(),
            first_seen_at: now,
            last_seen_at: now,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_merges() {
        let repo = test_repo().await;
        let t0 = Utc::now();

        let mut first = record("k1", "Creed", "Aventus", t0);
        first.price = Some(1200.0);
        first.price_formatted = Some("1 200 руб.".to_string());
        repo.upsert(&first).await.unwrap();

        // Later sighting omits the price but adds an article and attribute
        let mut second = record("k1", "Creed", "Aventus", t0 + Duration::seconds(60));
        second.source_article = Some("A-77".to_string());
        second
            .attributes
            .insert("gender".to_string(), "мужской".to_string());
        repo.upsert(&second).await.unwrap();

        let merged = repo.fetch_by_key("k1").await.unwrap().unwrap();
        // Non-null preference: old price survives, new article lands
        assert_eq!(merged.price, Some(1200.0));
        assert_eq!(merged.source_article.as_deref(), Some("A-77"));
        assert_eq!(merged.attributes.get("gender").unwrap(), "мужской");
        // first_seen stays, last_seen advances
        assert_eq!(
            merged.first_seen_at.timestamp(),
            t0.timestamp()
        );
        assert!(merged.last_seen_at > merged.first_seen_at);
        assert!(merged.is_active);
    }

    #[tokio::test]
    async fn test_upsert_reactivates() {
        let repo = test_repo().await;
        let t0 = Utc::now();
        repo.upsert(&record("k1", "Creed", "Aventus", t0)).await.unwrap();
        repo.deactivate_stale(t0 + Duration::seconds(1)).await.unwrap();
        assert_eq!(repo.count_active().await.unwrap(), 0);

        repo.upsert(&record("k1", "Creed", "Aventus", t0 + Duration::seconds(2)))
            .await
            .unwrap();
        assert_eq!(repo.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_active_ordering() {
        let repo = test_repo().await;
        let now = Utc::now();
        repo.upsert(&record("k1", "Versace", "Eros", now)).await.unwrap();
        repo.upsert(&record("k2", "Creed", "Aventus", now)).await.unwrap();
        repo.upsert(&record("k3", "creed", "Viking", now)).await.unwrap();

        let all = repo.fetch_all_active().await.unwrap();
        let labels: Vec<String> = all.iter().map(|r| format!("{} {}", r.brand, r.name)).collect();
        assert_eq!(labels, vec!["Creed Aventus", "creed Viking", "Versace Eros"]);
    }

    #[tokio::test]
    async fn test_fetch_by_article() {
        let repo = test_repo().await;
        let now = Utc::now();
        let mut rec = record("k1", "Rasasi", "Hawas", now);
        rec.source_article = Some("0345-T".to_string());
        repo.upsert(&rec).await.unwrap();

        let found = repo.fetch_by_article("0345-T").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().name, "Hawas");

        assert!(repo.fetch_by_article("missing").await.unwrap().is_none());

        // Inactive records are not matched
        repo.deactivate_stale(now + Duration::seconds(1)).await.unwrap();
        assert!(repo.fetch_by_article("0345-T").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_audit_round_trip() {
        let repo = test_repo().await;
        let mut run = SyncRun::new();
        repo.insert_run(&run).await.unwrap();

        run.pages_discovered = 5;
        run.pages_fetched_ok = 4;
        run.pages_failed = 1;
        run.records_upserted = 80;
        run.status = RunStatus::Completed;
        run.error_summary.transient_fetch = 1;
        run.error_summary.reconcile_skipped = true;
        run.finished_at = Some(Utc::now());
        repo.finalize_run(&run).await.unwrap();

        let loaded = repo.recent_runs(10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        let loaded = &loaded[0];
        assert_eq!(loaded.pages_discovered, 5);
        assert_eq!(loaded.status, RunStatus::Completed);
        assert!(loaded.error_summary.reconcile_skipped);
        assert_eq!(loaded.error_summary.transient_fetch, 1);

        let last = repo.last_completed_run().await.unwrap();
        assert!(last.is_some());
        assert_eq!(last.unwrap().id, run.id);
    }
}
