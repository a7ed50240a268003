//! Orchestrator — starts/stops the sub-managers and wires the
//! `MarketsRefreshed` signal into the realtime manager's resubscribe path.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

use super::batch::{BatchStatus, BatchSyncManager};
use super::realtime::RealtimeSyncManager;
use super::retention::RetentionSweeper;
use crate::errors::ManagerError;

pub struct Orchestrator {
    batch: Arc<BatchSyncManager>,
    realtime: Arc<RealtimeSyncManager>,
    retention: Arc<RetentionSweeper>,
    markets_refreshed: Arc<Notify>,
    shutdown: Arc<Notify>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub batch: BatchStatus,
}

impl Orchestrator {
    pub fn new(
        batch: Arc<BatchSyncManager>,
        realtime: Arc<RealtimeSyncManager>,
        retention: Arc<RetentionSweeper>,
    ) -> Self {
        Self {
            batch,
            realtime,
            retention,
            markets_refreshed: Arc::new(Notify::new()),
            shutdown: Arc::new(Notify::new()),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) -> Result<(), ManagerError> {
        info!("orchestrator starting");

        self.batch.initial_sync().await?;

        let mut handles = self.batch.spawn_tasks(self.markets_refreshed.clone(), self.shutdown.clone());

        self.realtime.start().await?;

        {
            let realtime = self.realtime.clone();
            let markets_refreshed = self.markets_refreshed.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = markets_refreshed.notified() => {
                            let _ = realtime.resubscribe().await;
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            }));
        }

        handles.push(self.retention.clone().spawn(self.shutdown.clone()));

        *self.handles.lock().expect("handles mutex poisoned") = handles;

        info!("orchestrator started");
        Ok(())
    }

    pub async fn stop(&self) {
        info!("orchestrator stopping");
        self.shutdown.notify_waiters();
        self.realtime.stop().await;

        let handles = std::mem::take(&mut *self.handles.lock().expect("handles mutex poisoned"));
        for handle in handles {
            let _ = handle.await;
        }
        info!("orchestrator stopped");
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            batch: self.batch.status().await,
        }
    }
}
