//! The transactional store seam.

pub mod repository;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::clients::catalog::{CatalogEvent, CatalogMarket};
use crate::db::DbError;
use crate::models::{Market, PriceSample, SyncStateRow, SyncStatus, TradeRecord};

pub use repository::PgStore;

/// Everything a sync manager needs from the relational store. Kept as a
/// trait so managers can be exercised against a `mockall` fake in tests
/// without a live Postgres instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// "Fresh database": no closed markets observed yet.
    async fn is_fresh_database(&self) -> Result<bool, DbError>;

    async fn upsert_events_page(&self, events: &[CatalogEvent]) -> Result<(), DbError>;
    async fn upsert_markets_page(&self, markets: &[CatalogMarket]) -> Result<(), DbError>;
    async fn link_event_markets(&self, pairs: &[(String, String)]) -> Result<(), DbError>;

    /// `token_id -> market_id` over the live-market universe.
    async fn live_token_map(&self) -> Result<HashMap<String, String>, DbError>;

    async fn clob_audit_candidates(&self, batch_size: u32) -> Result<Vec<Market>, DbError>;
    async fn mixed_event_open_markets(&self) -> Result<Vec<Market>, DbError>;
    async fn open_markets_for_event(&self, event_id: &str) -> Result<Vec<Market>, DbError>;

    /// Closes every listed market and then every event left with no live
    /// markets, in a single transaction.
    async fn close_markets_and_events(&self, ids: &[String]) -> Result<(), DbError>;

    async fn run_expiration_audit(&self) -> Result<(), DbError>;

    /// Returns `true` if the row was newly inserted (false on idempotent conflict).
    async fn insert_price_sample(&self, sample: &PriceSample) -> Result<bool, DbError>;
    async fn apply_price_updates(
        &self,
        market_id: &str,
        updates: &[(String, Decimal)],
        instant: DateTime<Utc>,
    ) -> Result<(), DbError>;

    async fn insert_trade(&self, trade: &TradeRecord) -> Result<bool, DbError>;

    /// Sets `markets.last_trade_price` from a verified trade record.
    async fn update_last_trade_price(&self, market_id: &str, price: Decimal) -> Result<(), DbError>;

    async fn get_sync_state(&self, entity: &str) -> Result<Option<SyncStateRow>, DbError>;
    async fn set_sync_state(
        &self,
        entity: &str,
        status: SyncStatus,
        error: Option<String>,
    ) -> Result<(), DbError>;

    async fn markets_without_price_samples(&self, limit: u32) -> Result<Vec<Market>, DbError>;

    async fn delete_expired_price_samples(&self, cutoff: DateTime<Utc>, chunk: i64) -> Result<u64, DbError>;
    async fn delete_expired_trades(&self, cutoff: DateTime<Utc>, chunk: i64) -> Result<u64, DbError>;
}
