//! Retention sweep — chunked deletes of old Price Samples and Trades.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Notify;
use tracing::info;

use crate::store::Store;

const CHUNK_SIZE: i64 = 5000;
const CHUNK_YIELD: Duration = Duration::from_millis(100);
const STARTUP_DELAY: Duration = Duration::from_secs(5 * 60);
const SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

pub struct RetentionSweeper {
    store: Arc<dyn Store>,
    price_history_retention_days: u32,
    trades_retention_days: u32,
    trades_enabled: bool,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn Store>,
        price_history_retention_days: u32,
        trades_retention_days: u32,
        trades_enabled: bool,
    ) -> Self {
        Self {
            store,
            price_history_retention_days,
            trades_retention_days,
            trades_enabled,
        }
    }

    pub async fn sweep_once(&self) -> Result<(), crate::errors::ManagerError> {
        let price_cutoff = Utc::now() - ChronoDuration::days(self.price_history_retention_days as i64);
        let mut total = 0u64;
        loop {
            let deleted = self.store.delete_expired_price_samples(price_cutoff, CHUNK_SIZE).await?;
            total += deleted;
            if deleted < CHUNK_SIZE as u64 {
                break;
            }
            tokio::time::sleep(CHUNK_YIELD).await;
        }
        if total > 0 {
            info!(deleted = total, "retention sweep pruned price samples");
        }

        if self.trades_enabled {
            let trades_cutoff = Utc::now() - ChronoDuration::days(self.trades_retention_days as i64);
            let mut total = 0u64;
            loop {
                let deleted = self.store.delete_expired_trades(trades_cutoff, CHUNK_SIZE).await?;
                total += deleted;
                if deleted < CHUNK_SIZE as u64 {
                    break;
                }
                tokio::time::sleep(CHUNK_YIELD).await;
            }
            if total > 0 {
                info!(deleted = total, "retention sweep pruned trades");
            }
        }

        Ok(())
    }

    pub fn spawn(self: Arc<Self>, shutdown: Arc<Notify>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(STARTUP_DELAY) => {}
                _ = shutdown.notified() => return,
            }

            loop {
                let _ = self.sweep_once().await;
                tokio::select! {
                    _ = tokio::time::sleep(SWEEP_PERIOD) => {}
                    _ = shutdown.notified() => return,
                }
            }
        })
    }
}
