//! Batch Sync Manager — catalog refresh, trade ingestion,
//! CLOB tradability audit, expiration audit.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::CacheInvalidator;
use crate::clients::catalog::Catalog;
use crate::clients::clob::Clob;
use crate::clients::trades::Trades;
use crate::config::Config;
use crate::errors::ManagerError;
use crate::models::{PriceSource, SyncStatus, TradeRecord};
use crate::store::Store;

use super::lock::EntityLock;

/// Per-entity snapshot returned by `Status()`.
#[derive(Debug, Clone, Default)]
pub struct BatchStatus {
    pub events: Option<String>,
    pub markets: Option<String>,
    pub trades: Option<String>,
}

pub struct BatchSyncManager {
    store: Arc<dyn Store>,
    catalog: Arc<dyn Catalog>,
    clob: Arc<dyn Clob>,
    trades_client: Arc<dyn Trades>,
    cache: Arc<dyn CacheInvalidator>,
    config: Config,
    events_lock: EntityLock,
    markets_lock: EntityLock,
    trades_lock: EntityLock,
}

impl BatchSyncManager {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn Catalog>,
        clob: Arc<dyn Clob>,
        trades_client: Arc<dyn Trades>,
        cache: Arc<dyn CacheInvalidator>,
        config: Config,
    ) -> Self {
        Self {
            store,
            catalog,
            clob,
            trades_client,
            cache,
            config,
            events_lock: EntityLock::new(),
            markets_lock: EntityLock::new(),
            trades_lock: EntityLock::new(),
        }
    }

    /// One-shot at startup.
    pub async fn initial_sync(&self) -> Result<(), ManagerError> {
        let fresh = self.store.is_fresh_database().await?;
        info!(fresh, "running initial sync");

        self.sync_events(false).await?;
        if fresh {
            self.sync_events(true).await?;
        }
        self.sync_markets(false).await?;
        if fresh {
            self.sync_markets(true).await?;
        }
        Ok(())
    }

    /// Paginated event pull. `include_closed` selects the `closed=true` page set.
    pub async fn sync_events(&self, include_closed: bool) -> Result<(), ManagerError> {
        let Some(_guard) = self.events_lock.try_acquire() else {
            warn!("events sync already in flight, dropping this tick");
            return Ok(());
        };

        let result = self.run_events_sync(include_closed).await;
        match &result {
            Ok(()) => {
                self.store.set_sync_state("events", SyncStatus::Idle, None).await?;
                self.cache.invalidate_pattern("*GET:/events*").await.ok();
            }
            Err(e) => {
                self.store
                    .set_sync_state("events", SyncStatus::Error, Some(e.to_string()))
                    .await
                    .ok();
            }
        }
        result
    }

    async fn run_events_sync(&self, include_closed: bool) -> Result<(), ManagerError> {
        self.store.set_sync_state("events", SyncStatus::Syncing, None).await?;

        let batch_size = self.config.markets_batch_size;
        let mut offset = 0u32;
        let mut all_pairs: Vec<(String, String)> = Vec::new();
        let mut missing_children = 0usize;

        loop {
            let page = self
                .catalog
                .fetch_events_page(include_closed, batch_size, offset)
                .await?;
            let page_len = page.len() as u32;

            for event in &page {
                match &event.child_market_ids {
                    Some(ids) => {
                        for market_id in ids {
                            all_pairs.push((market_id.clone(), event.id.clone()));
                        }
                    }
                    None => missing_children += 1,
                }
            }

            self.store.upsert_events_page(&page).await?;

            if page_len < batch_size {
                break;
            }
            offset += batch_size;
        }

        if missing_children > 0 {
            warn!(missing_children, "event pages omitted nested child markets");
        }

        // Linkage happens only after every event page in this sync has landed.
        self.store.link_event_markets(&all_pairs).await?;

        Ok(())
    }

    /// Paginated market pull; standalone markets are the source of truth for market fields.
    pub async fn sync_markets(&self, include_closed: bool) -> Result<(), ManagerError> {
        let Some(_guard) = self.markets_lock.try_acquire() else {
            warn!("markets sync already in flight, dropping this tick");
            return Ok(());
        };

        let result = self.run_markets_sync(include_closed).await;
        match &result {
            Ok(()) => {
                self.store.set_sync_state("markets", SyncStatus::Idle, None).await?;
                self.cache.invalidate_pattern("*GET:/markets*").await.ok();
            }
            Err(e) => {
                self.store
                    .set_sync_state("markets", SyncStatus::Error, Some(e.to_string()))
                    .await
                    .ok();
            }
        }
        result
    }

    async fn run_markets_sync(&self, include_closed: bool) -> Result<(), ManagerError> {
        self.store.set_sync_state("markets", SyncStatus::Syncing, None).await?;

        let batch_size = self.config.markets_batch_size;
        let mut offset = 0u32;

        loop {
            let page = self
                .catalog
                .fetch_markets_page(include_closed, batch_size, offset)
                .await?;
            let page_len = page.len() as u32;

            self.store.upsert_markets_page(&page).await?;

            if page_len < batch_size {
                break;
            }
            offset += batch_size;
        }

        Ok(())
    }

    /// Filters the global trades feed against tracked tokens and bulk-inserts.
    pub async fn sync_recent_trades(&self) -> Result<(), ManagerError> {
        if !self.config.enable_trades_sync {
            self.store
                .set_sync_state("trades", SyncStatus::Disabled, None)
                .await?;
            return Ok(());
        }

        let Some(_guard) = self.trades_lock.try_acquire() else {
            warn!("trades sync already in flight, dropping this tick");
            return Ok(());
        };

        let result = self.run_trades_sync().await;
        match &result {
            Ok(()) => {
                self.store.set_sync_state("trades", SyncStatus::Idle, None).await?;
            }
            Err(e) => {
                self.store
                    .set_sync_state("trades", SyncStatus::Error, Some(e.to_string()))
                    .await
                    .ok();
            }
        }
        result
    }

    async fn run_trades_sync(&self) -> Result<(), ManagerError> {
        self.store.set_sync_state("trades", SyncStatus::Syncing, None).await?;

        let token_map = self.store.live_token_map().await?;
        let raw_trades = self.trades_client.fetch_recent(self.config.trades_batch_size).await?;

        for raw in raw_trades {
            let Some(market_id) = token_map.get(&raw.asset) else {
                continue;
            };

            let market_id = market_id.clone();
            let trade = TradeRecord {
                id: trade_id(
                    &raw.asset,
                    &raw.side,
                    raw.price,
                    raw.size,
                    raw.timestamp,
                    raw.transaction_hash.as_deref(),
                    raw.proxy_wallet.as_deref(),
                ),
                market_id: Some(market_id.clone()),
                token_id: raw.asset,
                side: raw.side,
                price: raw.price,
                size: raw.size,
                timestamp: raw.timestamp_utc(),
                transaction_hash: raw.transaction_hash,
                proxy_wallet: raw.proxy_wallet,
                created_at: chrono::Utc::now(),
            };

            // Only a newly-verified trade moves last_trade_price; a
            // re-ingested duplicate is a no-op here too.
            if self.store.insert_trade(&trade).await? {
                self.store.update_last_trade_price(&market_id, trade.price).await?;
            }
        }

        Ok(())
    }

    /// Reconciles catalog optimism against actual CLOB tradability.
    pub async fn audit_clob_tradability(&self) -> Result<(), ManagerError> {
        let result = self.run_clob_audit().await;
        if let Err(e) = &result {
            self.store
                .set_sync_state("clob_audit", SyncStatus::Error, Some(e.to_string()))
                .await
                .ok();
        } else {
            self.store.set_sync_state("clob_audit", SyncStatus::Idle, None).await.ok();
        }
        result
    }

    async fn run_clob_audit(&self) -> Result<(), ManagerError> {
        let mut candidates = self
            .store
            .clob_audit_candidates(self.config.clob_audit_batch_size)
            .await?;
        candidates.extend(self.store.mixed_event_open_markets().await?);
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates.dedup_by(|a, b| a.id == b.id);

        let closed_ids = self.probe_markets(&candidates).await;

        if closed_ids.is_empty() {
            return Ok(());
        }

        let touched_events: Vec<String> = candidates
            .iter()
            .filter(|m| closed_ids.contains(&m.id))
            .filter_map(|m| m.event_id.clone())
            .collect();

        // Pass 2: propagate to other open markets in every touched event.
        let mut all_closed = closed_ids;
        for event_id in &touched_events {
            let siblings = self.store.open_markets_for_event(event_id).await?;
            let sibling_closed = self.probe_markets(&siblings).await;
            all_closed.extend(sibling_closed);
        }
        all_closed.sort();
        all_closed.dedup();

        self.store.close_markets_and_events(&all_closed).await?;

        self.cache.invalidate_pattern("*GET:/markets*").await.ok();
        self.cache.invalidate_pattern("*GET:/events*").await.ok();
        self.cache.invalidate_pattern("*GET:/stats*").await.ok();

        Ok(())
    }

    async fn probe_markets(&self, markets: &[crate::models::Market]) -> Vec<String> {
        let concurrency = self.config.clob_audit_concurrency;
        let clob = &self.clob;

        stream::iter(markets.iter())
            .map(|market| async move {
                match clob.tradability(&market.condition_id).await {
                    Ok(status) if status.is_closed() => Some(market.id.clone()),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(market_id = %market.id, error = %e, "clob audit probe failed");
                        None
                    }
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(|r| async move { r })
            .collect()
            .await
    }

    /// Pure-SQL, runs independently of catalog sync.
    pub async fn expiration_audit(&self) -> Result<(), ManagerError> {
        self.store.run_expiration_audit().await?;
        Ok(())
    }

    pub async fn status(&self) -> BatchStatus {
        let get = |entity: &str| async move {
            self.store
                .get_sync_state(entity)
                .await
                .ok()
                .flatten()
                .map(|row| row.status)
        };
        BatchStatus {
            events: get("events").await,
            markets: get("markets").await,
            trades: get("trades").await,
        }
    }

    /// Spawns every independent timer loop owned by this manager.
    /// `on_markets_refreshed` fires after every successful markets sync.
    pub fn spawn_tasks(
        self: &Arc<Self>,
        on_markets_refreshed: Arc<Notify>,
        shutdown: Arc<Notify>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        {
            let manager = self.clone();
            let shutdown = shutdown.clone();
            let interval = self.config.markets_interval();
            let notify = on_markets_refreshed.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if manager.sync_markets(false).await.is_ok() {
                                notify.notify_waiters();
                            }
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            }));
        }

        {
            let manager = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(manager.config.events_phase_shift()).await;
                let mut ticker = tokio::time::interval(manager.config.markets_interval());
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let _ = manager.sync_events(false).await;
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            }));
        }

        if self.config.enable_trades_sync {
            let manager = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(manager.config.trades_interval());
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let _ = manager.sync_recent_trades().await;
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            }));
        }

        {
            let manager = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let _ = manager.expiration_audit().await;
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            }));
        }

        {
            let manager = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(120)).await;
                let _ = manager.audit_clob_tradability().await;

                let mut ticker = tokio::time::interval(manager.config.clob_audit_interval());
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let _ = manager.audit_clob_tradability().await;
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            }));
        }

        handles
    }
}

/// Deterministic trade id: lowercase hex SHA-256 over the
/// pipe-joined content tuple, so re-ingestion is idempotent by construction.
pub fn trade_id(
    asset: &str,
    side: &str,
    price: rust_decimal::Decimal,
    size: rust_decimal::Decimal,
    timestamp: i64,
    transaction_hash: Option<&str>,
    proxy_wallet: Option<&str>,
) -> String {
    let content = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        asset,
        side,
        price,
        size,
        timestamp,
        transaction_hash.unwrap_or(""),
        proxy_wallet.unwrap_or(""),
    );
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::cache::NoopInvalidator;
    use crate::clients::catalog::MockCatalog;
    use crate::clients::clob::{MockClob, TradabilityStatus};
    use crate::clients::trades::{MockTrades, RawTrade};
    use crate::models::Market;
    use crate::store::MockStore;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            db_pool_max: 5,
            query_timeout_ms: 5_000,
            markets_interval_ms: 300_000,
            trades_interval_ms: 60_000,
            enable_trades_sync: true,
            price_flush_interval_ms: 1_000,
            ws_url: "wss://example.invalid/ws".to_string(),
            ws_reconnect_interval_ms: 3_000,
            ws_max_reconnect_attempts: 10,
            ws_connections: 1,
            markets_batch_size: 500,
            trades_batch_size: 500,
            trades_sync_market_limit: 100,
            clob_audit_interval_ms: 600_000,
            clob_audit_batch_size: 200,
            clob_audit_concurrency: 6,
            price_history_retention_days: 30,
            trades_retention_days: 30,
            sync_stale_threshold_ms: 900_000,
            catalog_base_url: "https://catalog.invalid".to_string(),
            clob_base_url: "https://clob.invalid".to_string(),
            data_base_url: "https://data.invalid".to_string(),
            clob_credentials: None,
        }
    }

    fn market_fixture(id: &str, condition_id: &str, event_id: Option<&str>) -> Market {
        Market {
            id: id.to_string(),
            event_id: event_id.map(|s| s.to_string()),
            condition_id: condition_id.to_string(),
            question: "Will it happen?".to_string(),
            description: None,
            slug: None,
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            outcome_token_ids: vec![],
            outcome_prices: vec![],
            best_bid: None,
            best_ask: None,
            spread: None,
            last_trade_price: None,
            volume: dec!(0),
            volume_24h: dec!(0),
            liquidity: dec!(0),
            category: None,
            end_date: None,
            active: true,
            closed: false,
            archived: false,
            resolved: false,
            winning_outcome_index: None,
            price_updated_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn trades_sync_updates_last_trade_price_only_for_tracked_tokens() {
        let mut store = MockStore::new();
        store
            .expect_set_sync_state()
            .withf(|entity, status, _| entity == "trades" && matches!(status, SyncStatus::Syncing))
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_set_sync_state()
            .withf(|entity, status, _| entity == "trades" && matches!(status, SyncStatus::Idle))
            .times(1)
            .returning(|_, _, _| Ok(()));
        store.expect_live_token_map().times(1).returning(|| {
            let mut map = std::collections::HashMap::new();
            map.insert("tracked-token".to_string(), "market-1".to_string());
            Ok(map)
        });
        store.expect_insert_trade().times(1).returning(|_| Ok(true));
        store
            .expect_update_last_trade_price()
            .withf(|market_id, price| market_id == "market-1" && *price == dec!(0.42))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut trades_client = MockTrades::new();
        trades_client.expect_fetch_recent().times(1).returning(|_| {
            Ok(vec![
                RawTrade {
                    asset: "tracked-token".to_string(),
                    side: "BUY".to_string(),
                    price: dec!(0.42),
                    size: dec!(5),
                    timestamp: 1_700_000_000,
                    transaction_hash: None,
                    proxy_wallet: None,
                },
                RawTrade {
                    asset: "untracked-token".to_string(),
                    side: "SELL".to_string(),
                    price: dec!(0.9),
                    size: dec!(1),
                    timestamp: 1_700_000_001,
                    transaction_hash: None,
                    proxy_wallet: None,
                },
            ])
        });

        let manager = BatchSyncManager::new(
            Arc::new(store),
            Arc::new(MockCatalog::new()),
            Arc::new(MockClob::new()),
            Arc::new(trades_client),
            Arc::new(NoopInvalidator),
            test_config(),
        );

        manager.sync_recent_trades().await.unwrap();
    }

    #[tokio::test]
    async fn clob_audit_closes_markets_and_propagates_to_event_siblings() {
        let mut store = MockStore::new();
        store
            .expect_clob_audit_candidates()
            .times(1)
            .returning(|_| Ok(vec![market_fixture("market-a", "cond-a", Some("event-1"))]));
        store.expect_mixed_event_open_markets().times(1).returning(|| Ok(vec![]));
        store
            .expect_open_markets_for_event()
            .withf(|event_id| event_id == "event-1")
            .times(1)
            .returning(|_| Ok(vec![market_fixture("market-b", "cond-b", Some("event-1"))]));
        store
            .expect_close_markets_and_events()
            .withf(|ids| ids == &[String::from("market-a")])
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_set_sync_state()
            .withf(|entity, status, _| entity == "clob_audit" && matches!(status, SyncStatus::Idle))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut clob = MockClob::new();
        clob.expect_tradability()
            .withf(|condition_id| condition_id == "cond-a")
            .times(1)
            .returning(|_| {
                Ok(TradabilityStatus {
                    closed: true,
                    accepting_orders: true,
                    enable_order_book: true,
                })
            });
        clob.expect_tradability()
            .withf(|condition_id| condition_id == "cond-b")
            .times(1)
            .returning(|_| {
                Ok(TradabilityStatus {
                    closed: false,
                    accepting_orders: true,
                    enable_order_book: true,
                })
            });

        let manager = BatchSyncManager::new(
            Arc::new(store),
            Arc::new(MockCatalog::new()),
            Arc::new(clob),
            Arc::new(MockTrades::new()),
            Arc::new(NoopInvalidator),
            test_config(),
        );

        manager.audit_clob_tradability().await.unwrap();
    }

    #[test]
    fn trade_id_is_deterministic_for_identical_content() {
        let a = trade_id("A", "BUY", dec!(0.5), dec!(10), 1700, Some("0xabc"), Some("0xdef"));
        let b = trade_id("A", "BUY", dec!(0.5), dec!(10), 1700, Some("0xabc"), Some("0xdef"));
        assert_eq!(a, b);
    }

    #[test]
    fn trade_id_changes_with_content() {
        let a = trade_id("A", "BUY", dec!(0.5), dec!(10), 1700, None, None);
        let b = trade_id("A", "SELL", dec!(0.5), dec!(10), 1700, None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn trade_id_is_lowercase_hex() {
        let id = trade_id("A", "BUY", dec!(0.5), dec!(10), 1700, None, None);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
