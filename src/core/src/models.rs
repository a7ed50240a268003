//! Shared data models for the event/market/price mirror.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Source of a price sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Clob,
    Websocket,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Clob => "clob",
            PriceSource::Websocket => "websocket",
        }
    }
}

/// Status of a named sync-state entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
    Connected,
    Disconnected,
    Disabled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
            SyncStatus::Connected => "connected",
            SyncStatus::Disconnected => "disconnected",
            SyncStatus::Disabled => "disabled",
        }
    }
}

/// An aggregate container of markets, mirrored from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub images: Option<serde_json::Value>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub volume: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single binary or N-outcome market inside an event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Market {
    pub id: String,
    pub event_id: Option<String>,
    pub condition_id: String,
    pub question: String,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub outcomes: Vec<String>,
    pub outcome_token_ids: Vec<String>,
    pub outcome_prices: Vec<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    pub volume: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub category: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub resolved: bool,
    pub winning_outcome_index: Option<i32>,
    pub price_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    /// `active ∧ ¬closed ∧ ¬archived` — the "live market" predicate.
    pub fn is_live(&self) -> bool {
        self.active && !self.closed && !self.archived
    }
}

/// A single `(market, token, instant)` price point.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PriceSample {
    pub market_id: String,
    pub token_id: String,
    pub instant: DateTime<Utc>,
    pub price: Decimal,
    pub source: String,
}

/// An append-only executed-trade row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub market_id: Option<String>,
    pub token_id: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: Option<String>,
    pub proxy_wallet: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A per-entity row in the `sync_state` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncStateRow {
    pub entity: String,
    pub status: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl SyncStateRow {
    /// Whether this row is stale relative to `threshold`.
    pub fn is_stale(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.last_sync_at {
            Some(t) => now - t > threshold,
            None => true,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == SyncStatus::Error.as_str()
    }
}

/// A trading position. Reserved for a future order-execution layer — this core
/// never writes one; it exists so downstream readers have a stable shape to join against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: uuid::Uuid,
    pub market_id: String,
    pub outcome_index: i32,
    pub shares: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// A wallet balance snapshot. Reserved — never written by this core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletBalance {
    pub id: uuid::Uuid,
    pub wallet_address: String,
    pub asset: String,
    pub balance: Decimal,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(active: bool, closed: bool, archived: bool) -> Market {
        Market {
            id: "m1".into(),
            event_id: None,
            condition_id: "c1".into(),
            question: "q".into(),
            description: None,
            slug: None,
            outcomes: vec!["Yes".into(), "No".into()],
            outcome_token_ids: vec!["t0".into(), "t1".into()],
            outcome_prices: vec![Decimal::new(5, 1), Decimal::new(5, 1)],
            best_bid: None,
            best_ask: None,
            spread: None,
            last_trade_price: None,
            volume: Decimal::ZERO,
            volume_24h: Decimal::ZERO,
            liquidity: Decimal::ZERO,
            category: None,
            end_date: None,
            active,
            closed,
            archived,
            resolved: false,
            winning_outcome_index: None,
            price_updated_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn is_live_requires_active_not_closed_not_archived() {
        assert!(market(true, false, false).is_live());
        assert!(!market(false, false, false).is_live());
        assert!(!market(true, true, false).is_live());
        assert!(!market(true, false, true).is_live());
    }

    #[test]
    fn sync_state_staleness() {
        let now = Utc::now();
        let row = SyncStateRow {
            entity: "markets".into(),
            status: "idle".into(),
            last_sync_at: Some(now - chrono::Duration::minutes(20)),
            metadata: None,
            error_message: None,
        };
        assert!(row.is_stale(chrono::Duration::minutes(15), now));
        assert!(!row.is_stale(chrono::Duration::minutes(30), now));
    }

    #[test]
    fn sync_state_missing_last_sync_is_stale() {
        let row = SyncStateRow {
            entity: "prices".into(),
            status: "idle".into(),
            last_sync_at: None,
            metadata: None,
            error_message: None,
        };
        assert!(row.is_stale(chrono::Duration::minutes(15), Utc::now()));
    }

    #[test]
    fn sync_state_error_is_degraded() {
        let row = SyncStateRow {
            entity: "events".into(),
            status: "error".into(),
            last_sync_at: Some(Utc::now()),
            metadata: None,
            error_message: Some("boom".into()),
        };
        assert!(row.is_degraded());
    }
}
