// Database connection and pool management
// Handles SQLite connections using sqlx, with inline schema migration

use std::path::Path;

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        // In-memory databases must share one connection or every pool
        // checkout would see an empty schema
        let in_memory = db_path.contains(":memory:");

        if !in_memory {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 10 })
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_catalog_sql = r#"
            CREATE TABLE IF NOT EXISTS catalog_records (
                normalized_key TEXT PRIMARY KEY,
                source_article TEXT,
                brand TEXT NOT NULL,
                name TEXT NOT NULL,
                factory TEXT,
                full_title TEXT NOT NULL,
                price REAL,
                price_formatted TEXT,
                currency TEXT NOT NULL DEFAULT 'RUB',
                attributes TEXT NOT NULL DEFAULT '{}',
                source_url TEXT NOT NULL,
                first_seen_at DATETIME NOT NULL,
                last_seen_at DATETIME NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1
            )
        "#;

        let create_runs_sql = r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                id TEXT PRIMARY KEY,
                started_at DATETIME NOT NULL,
                finished_at DATETIME,
                pages_discovered INTEGER NOT NULL DEFAULT 0,
                pages_fetched_ok INTEGER NOT NULL DEFAULT 0,
                pages_failed INTEGER NOT NULL DEFAULT 0,
                records_upserted INTEGER NOT NULL DEFAULT 0,
                records_deactivated INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'Running',
                error_summary TEXT NOT NULL DEFAULT '{}'
            )
        "#;

        sqlx::query(create_catalog_sql).execute(&self.pool).await?;
        sqlx::query(create_runs_sql).execute(&self.pool).await?;

        for index_sql in [
            "CREATE INDEX IF NOT EXISTS idx_catalog_article ON catalog_records (source_article)",
            "CREATE INDEX IF NOT EXISTS idx_catalog_active ON catalog_records (is_active)",
            "CREATE INDEX IF NOT EXISTS idx_catalog_last_seen ON catalog_records (last_seen_at)",
            "CREATE INDEX IF NOT EXISTS idx_runs_started ON sync_runs (started_at)",
        ] {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}
