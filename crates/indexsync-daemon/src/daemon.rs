//! Daemon lifecycle management.

use anyhow::{Context, Result};
use indexsync_core::{DataModel, ModelHandle, SyncConfig};
use indexsync_indexer::{
    AclTracker, ContentTracker, FileContentStore, InformationServer, MemoryIndex, MetadataTracker,
    Tracker,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::signals;
use crate::spool::SpoolRepository;

/// The main daemon process
pub struct Daemon {
    config: SyncConfig,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: SyncConfig) -> Result<Self> {
        // Ensure data directories exist
        config
            .ensure_dirs()
            .context("Failed to create data directories")?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Run the trackers on their intervals until a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        self.acquire_pid_lock()?;

        tracing::info!(
            data_dir = %self.config.data_dir.display(),
            index = %self.config.index_path().display(),
            spool = %self.config.repository_spool().display(),
            "Daemon starting"
        );

        let server = self.build_server()?;
        let mut workers = Vec::new();
        for (tracker, period) in self.trackers(&server) {
            let shutdown_rx = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(run_worker(tracker, period, shutdown_rx)));
        }

        signals::wait_for_shutdown(self.shutdown_tx.subscribe()).await;

        // Stop workers; a cycle in flight finishes before its worker exits
        let _ = self.shutdown_tx.send(());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Tracker worker failed: {}", e);
            }
        }

        self.cleanup(&server)
    }

    /// Run every tracker until it has caught up, then exit.
    pub async fn run_once(&self) -> Result<()> {
        self.acquire_pid_lock()?;

        let server = self.build_server()?;
        for (tracker, _) in self.trackers(&server) {
            let cycles = drain(tracker.as_ref()).await;
            tracing::info!(tracker = tracker.name(), cycles, "Tracker caught up");
        }

        self.cleanup(&server)
    }

    fn build_server(&self) -> Result<Arc<InformationServer>> {
        let index = MemoryIndex::open(self.config.index_path())
            .with_context(|| format!("Failed to open index {}", self.config.index_path().display()))?;
        let store = FileContentStore::new(self.config.content_store_dir());
        let repository = SpoolRepository::new(self.config.repository_spool());

        let model = match &self.config.model_path {
            Some(path) => DataModel::load_yaml(path)
                .with_context(|| format!("Failed to load model {}", path.display()))?,
            None => DataModel::builtin(),
        };

        Ok(Arc::new(InformationServer::new(
            &self.config,
            Arc::new(index),
            Arc::new(store),
            Arc::new(repository),
            ModelHandle::new(model),
        )))
    }

    fn trackers(&self, server: &Arc<InformationServer>) -> Vec<(Arc<dyn Tracker>, Duration)> {
        let config = &self.config.tracker;
        vec![
            (
                Arc::new(MetadataTracker::new(server.clone(), config.clone())) as Arc<dyn Tracker>,
                Duration::from_millis(config.metadata_interval_ms),
            ),
            (
                Arc::new(AclTracker::new(server.clone(), config.clone())),
                Duration::from_millis(config.acl_interval_ms),
            ),
            (
                Arc::new(ContentTracker::new(server.clone(), config.clone())),
                Duration::from_millis(config.content_interval_ms),
            ),
        ]
    }

    /// Acquire PID lock to ensure single instance
    fn acquire_pid_lock(&self) -> Result<()> {
        let pid_file = &self.config.pid_file;

        if pid_file.exists() {
            if let Ok(pid_str) = std::fs::read_to_string(pid_file) {
                if let Ok(pid) = pid_str.trim().parse::<u32>() {
                    if is_process_running(pid) {
                        anyhow::bail!("Daemon already running (PID: {})", pid);
                    }
                }
            }
            // Stale PID file
            std::fs::remove_file(pid_file)?;
        }

        std::fs::write(pid_file, std::process::id().to_string())?;

        tracing::debug!(pid = std::process::id(), "PID lock acquired");

        Ok(())
    }

    fn cleanup(&self, server: &InformationServer) -> Result<()> {
        tracing::info!("Cleaning up...");

        let stats = server.stats();
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            stats = %serde_json::to_string(&stats)?,
            "Final statistics"
        );

        if self.config.pid_file.exists() {
            let _ = std::fs::remove_file(&self.config.pid_file);
        }

        tracing::info!("Cleanup complete");

        Ok(())
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if self.config.pid_file.exists() {
            let _ = std::fs::remove_file(&self.config.pid_file);
        }
    }
}

async fn run_worker(
    tracker: Arc<dyn Tracker>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                drain(tracker.as_ref()).await;
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!(tracker = tracker.name(), "Worker stopping");
                break;
            }
        }
    }
}

/// Run cycles back to back while the tracker reports more work and makes
/// progress. Returns the number of cycles that completed.
pub(crate) async fn drain(tracker: &dyn Tracker) -> usize {
    let mut cycles = 0;

    loop {
        match tracker.run_cycle().await {
            Ok(report) => {
                cycles += 1;
                tracing::debug!(tracker = tracker.name(), ?report, "Cycle complete");

                let progressed = report.transactions
                    + report.change_sets
                    + report.holes_filled
                    + report.content_refreshed
                    + report.nodes_indexed
                    > 0;
                if report.exhausted || report.skipped || !progressed {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(
                    tracker = tracker.name(),
                    error = %e,
                    transient = e.is_transient(),
                    "Cycle failed, retrying next interval"
                );
                break;
            }
        }
    }

    cycles
}

/// Check if a process is running by PID
fn is_process_running(pid: u32) -> bool {
    // kill(pid, 0) probes for existence without signalling
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use indexsync_indexer::{CycleReport, IndexerError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> SyncConfig {
        SyncConfig {
            data_dir: dir.to_path_buf(),
            pid_file: dir.join("indexsync.pid"),
            ..Default::default()
        }
    }

    /// Reports unexhausted pages until `pages` cycles have run.
    struct PagedTracker {
        pages: usize,
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Tracker for PagedTracker {
        fn name(&self) -> &'static str {
            "paged"
        }

        async fn run_cycle(&self) -> Result<CycleReport, IndexerError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(IndexerError::Repository("unreachable".to_string()));
            }
            Ok(CycleReport {
                transactions: 1,
                exhausted: run >= self.pages,
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_is_process_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(999999999));
    }

    #[test]
    fn test_stale_pid_file_is_replaced() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.pid_file, "999999999").unwrap();

        let daemon = Daemon::new(config.clone()).unwrap();
        daemon.acquire_pid_lock().unwrap();

        let written = std::fs::read_to_string(&config.pid_file).unwrap();
        assert_eq!(written, std::process::id().to_string());

        drop(daemon);
        assert!(!config.pid_file.exists());
    }

    #[test]
    fn test_live_pid_file_refuses_start() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.pid_file, std::process::id().to_string()).unwrap();

        let daemon = Daemon::new(config).unwrap();
        assert!(daemon.acquire_pid_lock().is_err());
    }

    #[tokio::test]
    async fn test_drain_runs_until_exhausted() {
        let tracker = PagedTracker {
            pages: 3,
            runs: AtomicUsize::new(0),
            fail: false,
        };
        assert_eq!(drain(&tracker).await, 3);
    }

    #[tokio::test]
    async fn test_drain_stops_on_error() {
        let tracker = PagedTracker {
            pages: 3,
            runs: AtomicUsize::new(0),
            fail: true,
        };
        assert_eq!(drain(&tracker).await, 0);
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_once_indexes_spooled_repository() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let mut data = indexsync_indexer::RepositoryData::default();
        data.transactions
            .push(indexsync_core::Transaction::new(7, indexsync_core::now_ms() - 60_000));
        std::fs::write(
            config.repository_spool(),
            serde_json::to_string(&data).unwrap(),
        )
        .unwrap();

        let daemon = Daemon::new(config.clone()).unwrap();
        daemon.run_once().await.unwrap();
        assert!(!config.pid_file.exists());

        let reopened = MemoryIndex::open(config.index_path()).unwrap();
        assert!(!reopened.is_empty());
    }
}
