//! aroma-sync binary
//!
//! Commands:
//!   sync    run one synchronization pass and exit
//!   serve   run the periodic scheduler until Ctrl-C
//!   status  print the active record count and recent run history

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aroma_sync::application::orchestrator::SyncOrchestrator;
use aroma_sync::application::scheduler::Scheduler;
use aroma_sync::infrastructure::catalog_repository::CatalogRepository;
use aroma_sync::infrastructure::config::{AppConfig, ConfigManager};
use aroma_sync::infrastructure::database_connection::DatabaseConnection;
use aroma_sync::infrastructure::extractor::RecordExtractor;
use aroma_sync::infrastructure::http_client::{CatalogPageFetcher, HttpClient};
use aroma_sync::infrastructure::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let command = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());

    let config = ConfigManager::new()?.initialize().await?;
    init_logging(&config.logging)?;

    let db = DatabaseConnection::new(&config.storage.database_url()).await?;
    db.migrate().await?;
    let repo = CatalogRepository::new(db.pool().clone());

    match command.as_str() {
        "sync" => run_once(&config, repo).await,
        "serve" => serve(&config, repo).await,
        "status" => status(repo).await,
        other => {
            bail!("Unknown command '{other}'. Usage: aroma-sync [sync|serve|status]");
        }
    }
}

fn build_orchestrator(config: &AppConfig, repo: CatalogRepository) -> Result<SyncOrchestrator> {
    let client = HttpClient::new(config.http.clone())?;
    let fetcher = CatalogPageFetcher::new(
        client,
        &config.source.base_url,
        &config.source.listing_path,
    );
    let extractor = RecordExtractor::new().context("Failed to build record extractor")?;
    Ok(SyncOrchestrator::new(
        Arc::new(fetcher),
        Arc::new(extractor),
        repo,
        config.sync.clone(),
    ))
}

/// Ctrl-C cancels the token; a second Ctrl-C aborts the process
fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, finishing up");
            shutdown.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second shutdown signal, aborting");
            std::process::exit(130);
        }
    });
}

async fn run_once(config: &AppConfig, repo: CatalogRepository) -> Result<()> {
    let orchestrator = build_orchestrator(config, repo)?;
    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let run = orchestrator.run(&shutdown).await?;
    println!(
        "Run {}: {} ({} pages ok, {} failed, {} upserted, {} deactivated, {} recovered errors)",
        run.id,
        run.status.as_str(),
        run.pages_fetched_ok,
        run.pages_failed,
        run.records_upserted,
        run.records_deactivated,
        run.error_summary.total_errors(),
    );
    Ok(())
}

async fn serve(config: &AppConfig, repo: CatalogRepository) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(config, repo.clone())?);
    let scheduler = Scheduler::new(orchestrator, repo, config.sync.clone());

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    // The interval's first tick fires immediately, so startup gets a
    // pass right away, subject to the min-gap check
    scheduler.run(&shutdown).await
}

async fn status(repo: CatalogRepository) -> Result<()> {
    let active = repo.count_active().await?;
    println!("Active catalog records: {active}");

    let runs = repo.recent_runs(10).await?;
    if runs.is_empty() {
        println!("No sync runs recorded yet");
        return Ok(());
    }
    println!("Recent runs:");
    for run in runs {
        let duration = run
            .duration_seconds()
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:<9}  started {}  took {:<6}  pages {}/{}  upserted {}  deactivated {}",
            run.id,
            run.status.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            duration,
            run.pages_fetched_ok,
            run.pages_discovered,
            run.records_upserted,
            run.records_deactivated,
        );
    }
    Ok(())
}
