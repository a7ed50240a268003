//! SQL implementation of the `Store` trait against Postgres.
//!
//! Uses the runtime `sqlx::query`/`query_as` builders rather than the
//! compile-time-checked macros: those need a live `DATABASE_URL` (or a
//! committed offline query cache) at build time, which this workspace has
//! neither of. Everything else — transactional multi-row upserts,
//! `RETURNING`, chunked `VALUES` joins — follows the same patterns.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;

use crate::clients::catalog::{CatalogEvent, CatalogMarket};
use crate::db::DbError;
use crate::models::{Market, PriceSample, SyncStateRow, SyncStatus, TradeRecord};

use super::Store;

/// Markets are linked to events in chunks this size.
const LINK_CHUNK_SIZE: usize = 5000;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx(err: sqlx::Error) -> DbError {
    DbError::ConnectionError(err)
}

#[async_trait]
impl Store for PgStore {
    async fn is_fresh_database(&self) -> Result<bool, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets WHERE closed = true")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(count == 0)
    }

    async fn upsert_events_page(&self, events: &[CatalogEvent]) -> Result<(), DbError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    id, title, slug, description, images, start_date, end_date,
                    volume, volume_24h, liquidity, active, closed, archived, tags,
                    search_vector, created_at, updated_at
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,
                        to_tsvector('english', coalesce($2,'') || ' ' || coalesce($4,'')), NOW(), NOW())
                ON CONFLICT (id) DO UPDATE SET
                    title = EXCLUDED.title,
                    slug = EXCLUDED.slug,
                    description = EXCLUDED.description,
                    images = EXCLUDED.images,
                    start_date = EXCLUDED.start_date,
                    end_date = EXCLUDED.end_date,
                    volume = EXCLUDED.volume,
                    volume_24h = EXCLUDED.volume_24h,
                    liquidity = EXCLUDED.liquidity,
                    closed = events.closed OR EXCLUDED.closed,
                    archived = events.archived OR EXCLUDED.archived,
                    active = CASE WHEN (events.closed OR EXCLUDED.closed OR events.archived OR EXCLUDED.archived)
                                   THEN false ELSE EXCLUDED.active END,
                    tags = EXCLUDED.tags,
                    search_vector = to_tsvector('english', coalesce(EXCLUDED.title,'') || ' ' || coalesce(EXCLUDED.description,'')),
                    updated_at = NOW()
                "#,
            )
            .bind(&event.id)
            .bind(&event.title)
            .bind(&event.slug)
            .bind(&event.description)
            .bind(&event.images)
            .bind(event.start_date)
            .bind(event.end_date)
            .bind(event.volume)
            .bind(event.volume_24h)
            .bind(event.liquidity)
            .bind(event.active)
            .bind(event.closed)
            .bind(event.archived)
            .bind(&event.tags)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn upsert_markets_page(&self, markets: &[CatalogMarket]) -> Result<(), DbError> {
        if markets.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for market in markets {
            sqlx::query(
                r#"
                INSERT INTO markets (
                    id, condition_id, question, description, slug,
                    outcomes, outcome_token_ids, outcome_prices,
                    best_bid, best_ask, spread, volume, volume_24h, liquidity,
                    category, end_date, active, closed, archived, resolved,
                    search_vector, created_at, updated_at
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,false,
                        to_tsvector('english', coalesce($3,'') || ' ' || coalesce($4,'')), NOW(), NOW())
                ON CONFLICT (id) DO UPDATE SET
                    condition_id = EXCLUDED.condition_id,
                    question = EXCLUDED.question,
                    description = EXCLUDED.description,
                    slug = EXCLUDED.slug,
                    outcomes = EXCLUDED.outcomes,
                    outcome_token_ids = EXCLUDED.outcome_token_ids,
                    outcome_prices = EXCLUDED.outcome_prices,
                    best_bid = EXCLUDED.best_bid,
                    best_ask = EXCLUDED.best_ask,
                    spread = EXCLUDED.spread,
                    volume = EXCLUDED.volume,
                    volume_24h = EXCLUDED.volume_24h,
                    liquidity = EXCLUDED.liquidity,
                    category = EXCLUDED.category,
                    end_date = EXCLUDED.end_date,
                    closed = markets.closed OR EXCLUDED.closed,
                    archived = markets.archived OR EXCLUDED.archived,
                    active = CASE WHEN (markets.closed OR EXCLUDED.closed OR markets.archived OR EXCLUDED.archived)
                                   THEN false ELSE EXCLUDED.active END,
                    search_vector = to_tsvector('english', coalesce(EXCLUDED.question,'') || ' ' || coalesce(EXCLUDED.description,'')),
                    updated_at = NOW()
                "#,
            )
            .bind(&market.id)
            .bind(&market.condition_id)
            .bind(&market.question)
            .bind(&market.description)
            .bind(&market.slug)
            .bind(&market.outcomes)
            .bind(&market.outcome_token_ids)
            .bind(&market.outcome_prices)
            .bind(market.best_bid)
            .bind(market.best_ask)
            .bind(market.spread)
            .bind(market.volume)
            .bind(market.volume_24h)
            .bind(market.liquidity)
            .bind(&market.category)
            .bind(market.end_date)
            .bind(market.active)
            .bind(market.closed)
            .bind(market.archived)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn link_event_markets(&self, pairs: &[(String, String)]) -> Result<(), DbError> {
        for chunk in pairs.chunks(LINK_CHUNK_SIZE) {
            if chunk.is_empty() {
                continue;
            }
            let market_ids: Vec<String> = chunk.iter().map(|(m, _)| m.clone()).collect();
            let event_ids: Vec<String> = chunk.iter().map(|(_, e)| e.clone()).collect();

            sqlx::query(
                r#"
                UPDATE markets AS m
                SET event_id = v.event_id
                FROM (SELECT UNNEST($1::text[]) AS market_id, UNNEST($2::text[]) AS event_id) AS v
                WHERE m.id = v.market_id
                "#,
            )
            .bind(&market_ids)
            .bind(&event_ids)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        }
        Ok(())
    }

    async fn live_token_map(&self) -> Result<HashMap<String, String>, DbError> {
        let rows: Vec<(String, Vec<String>)> = sqlx::query_as(
            "SELECT id, outcome_token_ids FROM markets WHERE active = true AND closed = false AND archived = false",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut map = HashMap::new();
        for (market_id, token_ids) in rows {
            for token_id in token_ids {
                map.insert(token_id, market_id.clone());
            }
        }
        Ok(map)
    }

    async fn clob_audit_candidates(&self, batch_size: u32) -> Result<Vec<Market>, DbError> {
        sqlx::query_as::<_, Market>(
            r#"
            SELECT * FROM markets
            WHERE active = true AND closed = false AND archived = false
            ORDER BY volume_24h DESC
            LIMIT $1
            "#,
        )
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn mixed_event_open_markets(&self) -> Result<Vec<Market>, DbError> {
        sqlx::query_as::<_, Market>(
            r#"
            SELECT m.* FROM markets m
            WHERE m.active = true AND m.closed = false AND m.archived = false
              AND m.event_id IN (
                  SELECT event_id FROM markets
                  WHERE event_id IS NOT NULL
                  GROUP BY event_id
                  HAVING bool_or(closed) AND bool_or(NOT closed)
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn open_markets_for_event(&self, event_id: &str) -> Result<Vec<Market>, DbError> {
        sqlx::query_as::<_, Market>(
            "SELECT * FROM markets WHERE event_id = $1 AND active = true AND closed = false AND archived = false",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn close_markets_and_events(&self, ids: &[String]) -> Result<(), DbError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        sqlx::query("UPDATE markets SET closed = true, active = false, updated_at = NOW() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            UPDATE events SET closed = true, active = false, updated_at = NOW()
            WHERE active = true AND id IN (
                SELECT event_id FROM markets
                WHERE event_id IS NOT NULL
                GROUP BY event_id
                HAVING bool_and(closed OR archived OR NOT active)
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn run_expiration_audit(&self) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE markets SET active = false, updated_at = NOW() WHERE active = true AND closed = false AND end_date < NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            "UPDATE events SET active = false, updated_at = NOW() WHERE active = true AND closed = false AND end_date < NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            UPDATE events SET active = false, updated_at = NOW()
            WHERE active = true AND closed = false AND NOT EXISTS (
                SELECT 1 FROM markets m
                WHERE m.event_id = events.id AND m.active = true AND NOT m.closed AND NOT m.archived
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn insert_price_sample(&self, sample: &PriceSample) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO price_samples (market_id, token_id, instant, price, source)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (market_id, token_id, instant, source) DO NOTHING
            "#,
        )
        .bind(&sample.market_id)
        .bind(&sample.token_id)
        .bind(sample.instant)
        .bind(sample.price)
        .bind(&sample.source)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_price_updates(
        &self,
        market_id: &str,
        updates: &[(String, Decimal)],
        instant: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row: Option<(Vec<String>, Vec<Decimal>)> =
            sqlx::query_as("SELECT outcome_token_ids, outcome_prices FROM markets WHERE id = $1 FOR UPDATE")
                .bind(market_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx)?;

        let Some((token_ids, mut prices)) = row else {
            warn!(market_id, "price update for unknown market, dropping");
            return Ok(());
        };

        for (token_id, price) in updates {
            if let Some(idx) = token_ids.iter().position(|t| t == token_id) {
                prices[idx] = *price;
            }
        }

        sqlx::query(
            "UPDATE markets SET outcome_prices = $1, price_updated_at = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(&prices)
        .bind(instant)
        .bind(market_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn insert_trade(&self, trade: &TradeRecord) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                id, market_id, token_id, side, price, size, timestamp,
                transaction_hash, proxy_wallet, created_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9, NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.market_id)
        .bind(&trade.token_id)
        .bind(&trade.side)
        .bind(trade.price)
        .bind(trade.size)
        .bind(trade.timestamp)
        .bind(&trade.transaction_hash)
        .bind(&trade.proxy_wallet)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_last_trade_price(&self, market_id: &str, price: Decimal) -> Result<(), DbError> {
        sqlx::query("UPDATE markets SET last_trade_price = $1, updated_at = NOW() WHERE id = $2")
            .bind(price)
            .bind(market_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_sync_state(&self, entity: &str) -> Result<Option<SyncStateRow>, DbError> {
        sqlx::query_as::<_, SyncStateRow>("SELECT * FROM sync_state WHERE entity = $1")
            .bind(entity)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn set_sync_state(
        &self,
        entity: &str,
        status: SyncStatus,
        error: Option<String>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (entity, status, last_sync_at, error_message)
            VALUES ($1, $2, NOW(), $3)
            ON CONFLICT (entity) DO UPDATE SET
                status = EXCLUDED.status,
                last_sync_at = NOW(),
                error_message = EXCLUDED.error_message
            "#,
        )
        .bind(entity)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn markets_without_price_samples(&self, limit: u32) -> Result<Vec<Market>, DbError> {
        sqlx::query_as::<_, Market>(
            r#"
            SELECT m.* FROM markets m
            WHERE m.active = true
              AND NOT EXISTS (SELECT 1 FROM price_samples p WHERE p.market_id = m.id)
            ORDER BY m.volume_24h DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn delete_expired_price_samples(
        &self,
        cutoff: DateTime<Utc>,
        chunk: i64,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            DELETE FROM price_samples WHERE ctid IN (
                SELECT ctid FROM price_samples WHERE instant < $1 LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(chunk)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_trades(&self, cutoff: DateTime<Utc>, chunk: i64) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            DELETE FROM trades WHERE ctid IN (
                SELECT ctid FROM trades WHERE "timestamp" < $1 LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(chunk)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}
