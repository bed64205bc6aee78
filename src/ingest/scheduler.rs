// src/ingest/scheduler.rs
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::ingest::Poller;
use crate::shutdown;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub workers: usize,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

/// Spawn the polling workers for one site. Nothing is polled until the
/// registry holds at least one feed. Aborting the returned handle aborts
/// every worker.
pub fn spawn_poller_workers(
    poller: Arc<Poller>,
    cfg: SchedulerCfg,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let site = poller.site();
        if poller.registry().is_empty() {
            tracing::info!(target: "ingest", %site, "no follows yet, waiting for the first one");
            tokio::select! {
                _ = shutdown::requested(&mut shutdown_rx) => return,
                _ = poller.registry().wait_for_first_follow() => {}
            }
        }

        let workers = cfg.workers.max(1);
        tracing::info!(target: "ingest", %site, workers, feeds = poller.registry().len(), "starting pollers");
        let mut set = JoinSet::new();
        for i in 0..workers {
            set.spawn(poller.clone().run_worker(i, shutdown_rx.clone()));
        }
        drop(poller);

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                tracing::error!(target: "ingest", %site, error = ?e, "poller worker panicked");
            }
        }
    })
}
