//! Periodic scheduling with single-run exclusion
//!
//! One run at a time, process-wide: overlapping triggers coalesce into the
//! run already in flight instead of queueing. Interval triggers respect a
//! minimum gap since the last completed run so a restart storm cannot
//! hammer the source; manual triggers always go through.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::orchestrator::SyncOrchestrator;
use crate::infrastructure::catalog_repository::CatalogRepository;
use crate::infrastructure::config::SyncConfig;

/// What caused a run attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Interval,
    Manual,
}

/// Handle for requesting an immediate run from outside the scheduler loop
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Request a run now. Returns false when the scheduler is gone.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

pub struct Scheduler {
    orchestrator: Arc<SyncOrchestrator>,
    repo: CatalogRepository,
    config: SyncConfig,
    run_lock: Arc<Mutex<()>>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<mpsc::Receiver<()>>,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        repo: CatalogRepository,
        config: SyncConfig,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            orchestrator,
            repo,
            config,
            run_lock: Arc::new(Mutex::new(())),
            trigger_tx,
            trigger_rx: Mutex::new(trigger_rx),
        }
    }

    pub fn trigger_handle(&self) -> TriggerHandle {
        TriggerHandle {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Scheduler main loop; returns once the shutdown token fires and any
    /// in-flight run has finished.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sync_interval_minutes * 60));
        // First tick fires immediately; ticks that elapse while a run is
        // in flight are skipped, not replayed as a burst
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rx = self.trigger_rx.lock().await;

        info!(
            "⏱️ Scheduler started: every {} min, min gap {} min",
            self.config.sync_interval_minutes, self.config.min_sync_gap_minutes
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.try_run(Trigger::Interval, shutdown).await;
                }
                Some(()) = rx.recv() => {
                    self.try_run(Trigger::Manual, shutdown).await;
                }
                _ = shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    // Wait for the active run, if any, to wind down
                    let _drain = self.run_lock.lock().await;
                    return Ok(());
                }
            }
        }
    }

    /// Attempt a run under the single-run lock. The run itself executes on
    /// its own task so the loop keeps consuming triggers while it is in
    /// flight; a trigger arriving mid-run fails the try_lock here and is
    /// coalesced, never queued.
    pub async fn try_run(&self, trigger: Trigger, shutdown: &CancellationToken) {
        let Ok(guard) = Arc::clone(&self.run_lock).try_lock_owned() else {
            info!("Run already in flight, coalescing {:?} trigger", trigger);
            return;
        };

        if trigger == Trigger::Interval {
            match self.within_min_gap().await {
                Ok(true) => {
                    info!(
                        "Skipping interval run: last completed run is younger than {} min",
                        self.config.min_sync_gap_minutes
                    );
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!("Could not check last run age, running anyway: {:#}", e),
            }
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = orchestrator.run(&shutdown).await {
                warn!("Sync run failed to record its outcome: {:#}", e);
            }
        });
    }

    async fn within_min_gap(&self) -> Result<bool> {
        let Some(last) = self.repo.last_completed_run().await? else {
            return Ok(false);
        };
        let Some(finished) = last.finished_at else {
            return Ok(false);
        };
        let gap = chrono::Duration::minutes(self.config.min_sync_gap_minutes as i64);
        Ok(Utc::now() - finished < gap)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn test_trigger_requests_coalesce_in_the_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = TriggerHandle { tx };

        assert!(handle.request());
        // A second request while the first is still pending is dropped,
        // not queued
        assert!(!handle.request());

        assert!(rx.try_recv().is_ok());
        assert!(handle.request());
    }

    #[test]
    fn test_request_fails_once_scheduler_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let handle = TriggerHandle { tx };
        drop(rx);
        assert!(!handle.request());
    }
}
