//! Backfill Manager — one-shot per-market historical price import.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::clients::price_history::{Interval, PriceHistoryClient};
use crate::errors::ManagerError;
use crate::models::{Market, PriceSample, PriceSource};
use crate::store::Store;

const MISSING_SCAN_LIMIT: u32 = 100;
const BACKFILL_SPACING: Duration = Duration::from_millis(100);

pub struct BackfillManager {
    store: Arc<dyn Store>,
    history: PriceHistoryClient,
}

impl BackfillManager {
    pub fn new(store: Arc<dyn Store>, history: PriceHistoryClient) -> Self {
        Self { store, history }
    }

    /// Binary markets get two samples per point; single-token markets get one;
    /// N>2 markets record only the primary token with a warning.
    pub async fn backfill_market(&self, market: &Market, interval: Interval) -> Result<(), ManagerError> {
        let points = self.history.fetch(&primary_token(market), interval).await?;

        match market.outcome_token_ids.len() {
            2 => {
                let (token0, token1) = (&market.outcome_token_ids[0], &market.outcome_token_ids[1]);
                for point in &points {
                    let instant = point_instant(point.timestamp);
                    let p0 = point.price;
                    let p1 = Decimal::ONE - p0;
                    self.insert(market, token0, instant, p0).await?;
                    self.insert(market, token1, instant, p1).await?;
                }
            }
            1 => {
                let token = &market.outcome_token_ids[0];
                for point in &points {
                    self.insert(market, token, point_instant(point.timestamp), point.price).await?;
                }
            }
            n => {
                warn!(market_id = %market.id, outcomes = n, "backfilling only the primary token for N>2 market");
                let token = primary_token(market);
                for point in &points {
                    self.insert(market, &token, point_instant(point.timestamp), point.price).await?;
                }
            }
        }

        Ok(())
    }

    async fn insert(
        &self,
        market: &Market,
        token_id: &str,
        instant: DateTime<Utc>,
        price: Decimal,
    ) -> Result<(), ManagerError> {
        self.store
            .insert_price_sample(&PriceSample {
                market_id: market.id.clone(),
                token_id: token_id.to_string(),
                instant,
                price,
                source: PriceSource::Clob.as_str().to_string(),
            })
            .await?;
        Ok(())
    }

    /// Selects up to 100 active markets with no samples, ordered by volume,
    /// and backfills each with 100ms spacing.
    pub async fn backfill_missing(&self, interval: Interval) -> Result<(), ManagerError> {
        let markets = self.store.markets_without_price_samples(MISSING_SCAN_LIMIT).await?;
        for market in &markets {
            if let Err(e) = self.backfill_market(market, interval).await {
                warn!(market_id = %market.id, error = %e, "backfill_missing: market failed, continuing");
            }
            tokio::time::sleep(BACKFILL_SPACING).await;
        }
        Ok(())
    }
}

fn primary_token(market: &Market) -> String {
    market.outcome_token_ids.first().cloned().unwrap_or_default()
}

fn point_instant(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_token_is_first_outcome() {
        let market = sample_market(vec!["t0".into(), "t1".into()]);
        assert_eq!(primary_token(&market), "t0");
    }

    fn sample_market(outcome_token_ids: Vec<String>) -> Market {
        Market {
            id: "m1".into(),
            event_id: None,
            condition_id: "c1".into(),
            question: "q".into(),
            description: None,
            slug: None,
            outcomes: vec!["Yes".into(); outcome_token_ids.len()],
            outcome_token_ids,
            outcome_prices: vec![],
            best_bid: None,
            best_ask: None,
            spread: None,
            last_trade_price: None,
            volume: Decimal::ZERO,
            volume_24h: Decimal::ZERO,
            liquidity: Decimal::ZERO,
            category: None,
            end_date: None,
            active: true,
            closed: false,
            archived: false,
            resolved: false,
            winning_outcome_index: None,
            price_updated_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
