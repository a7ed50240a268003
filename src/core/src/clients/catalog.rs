//! Catalog Client — paginated REST client over the metadata catalog
//! (events and standalone markets).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::clients::http::HttpRequester;
use crate::errors::ClientError;

/// Raw event row as the catalog returns it (camelCase upstream).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub images: Option<serde_json::Value>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default, rename = "volume24hr")]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub liquidity: Option<f64>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    pub archived: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<RawTag>>,
    /// Nested child markets — present on some pages, absent on others.
    pub markets: Option<Vec<RawMarket>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub label: Option<String>,
    pub slug: Option<String>,
}

/// Raw market row, both as a standalone-endpoint result and as a nested child of an event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarket {
    pub id: String,
    #[serde(rename = "conditionId")]
    pub condition_id: String,
    pub question: String,
    pub description: Option<String>,
    pub slug: Option<String>,
    /// JSON-string-encoded array, e.g. `"[\"Yes\",\"No\"]"`.
    pub outcomes: Option<String>,
    #[serde(rename = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
    #[serde(rename = "outcomePrices")]
    pub outcome_prices: Option<String>,
    #[serde(rename = "bestBid")]
    pub best_bid: Option<f64>,
    #[serde(rename = "bestAsk")]
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default, rename = "volume24hr")]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub liquidity: Option<f64>,
    pub category: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    pub archived: Option<bool>,
}

/// A catalog event after JSON-string fields are decoded and defaults applied.
#[derive(Debug, Clone)]
pub struct CatalogEvent {
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
    /// `(market_id, event_id)` pairs for nested children, if the page carried them.
    pub child_market_ids: Option<Vec<String>>,
}

/// A catalog market after JSON-string fields are decoded and defaults applied.
#[derive(Debug, Clone)]
pub struct CatalogMarket {
    pub id: String,
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
    pub volume: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub category: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
}

fn parse_decimal(v: Option<f64>) -> Decimal {
    v.and_then(|f| Decimal::try_from(f).ok()).unwrap_or(Decimal::ZERO)
}

fn parse_date(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode a JSON-string-encoded array, tolerating malformed upstream values
/// by falling back to `default`.
fn parse_json_string_array(raw: &Option<String>, default: Vec<String>) -> Vec<String> {
    match raw {
        Some(s) => serde_json::from_str::<Vec<String>>(s).unwrap_or(default),
        None => default,
    }
}

fn parse_price_array(raw: &Option<String>, len_hint: usize) -> Vec<Decimal> {
    match raw {
        Some(s) => serde_json::from_str::<Vec<String>>(s)
            .map(|strs| {
                strs.iter()
                    .map(|p| p.parse::<Decimal>().unwrap_or(Decimal::ZERO))
                    .collect()
            })
            .unwrap_or_else(|_| vec![Decimal::ZERO; len_hint]),
        None => vec![Decimal::ZERO; len_hint],
    }
}

impl From<RawMarket> for CatalogMarket {
    fn from(raw: RawMarket) -> Self {
        let outcomes = parse_json_string_array(&raw.outcomes, vec!["Yes".into(), "No".into()]);
        let outcome_token_ids = parse_json_string_array(&raw.clob_token_ids, Vec::new());
        let outcome_prices = parse_price_array(&raw.outcome_prices, outcomes.len());

        let closed = raw.closed.unwrap_or(false);
        let archived = raw.archived.unwrap_or(false);
        let active = !(closed || archived) && raw.active.unwrap_or(false);

        CatalogMarket {
            id: raw.id,
            condition_id: raw.condition_id,
            question: raw.question,
            description: raw.description,
            slug: raw.slug,
            outcomes,
            outcome_token_ids,
            outcome_prices,
            best_bid: raw.best_bid.and_then(|p| Decimal::try_from(p).ok()),
            best_ask: raw.best_ask.and_then(|p| Decimal::try_from(p).ok()),
            spread: raw.spread.and_then(|p| Decimal::try_from(p).ok()),
            volume: parse_decimal(raw.volume),
            volume_24h: parse_decimal(raw.volume_24h),
            liquidity: parse_decimal(raw.liquidity),
            category: raw.category,
            end_date: parse_date(&raw.end_date),
            active,
            closed,
            archived,
        }
    }
}

impl From<RawEvent> for CatalogEvent {
    fn from(raw: RawEvent) -> Self {
        let closed = raw.closed.unwrap_or(false);
        let archived = raw.archived.unwrap_or(false);
        let active = !(closed || archived) && raw.active.unwrap_or(false);

        let child_market_ids = raw.markets.as_ref().map(|ms| ms.iter().map(|m| m.id.clone()).collect());

        CatalogEvent {
            id: raw.id,
            title: raw.title,
            slug: raw.slug,
            description: raw.description,
            images: raw.images,
            start_date: parse_date(&raw.start_date),
            end_date: parse_date(&raw.end_date),
            volume: parse_decimal(raw.volume),
            volume_24h: parse_decimal(raw.volume_24h),
            liquidity: parse_decimal(raw.liquidity),
            active,
            closed,
            archived,
            tags: raw
                .tags
                .unwrap_or_default()
                .into_iter()
                .filter_map(|t| t.label.or(t.slug))
                .collect(),
            child_market_ids,
        }
    }
}

/// Paginated pulls over the events/markets catalog. Kept as a trait so
/// `BatchSyncManager` can be exercised against a `mockall` fake without a
/// live catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Pull one page of events, `limit` rows, offset `offset`, filtered by `closed`.
    async fn fetch_events_page(
        &self,
        closed: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CatalogEvent>, ClientError>;

    /// Pull one page of standalone markets, the source of truth for market fields
    /// over any nested market a page of events may have carried.
    async fn fetch_markets_page(
        &self,
        closed: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CatalogMarket>, ClientError>;
}

/// Paginated client over the events/markets catalog.
pub struct CatalogClient {
    requester: HttpRequester,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            requester: HttpRequester::new(timeout),
            base_url,
        }
    }
}

#[async_trait]
impl Catalog for CatalogClient {
    async fn fetch_events_page(
        &self,
        closed: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CatalogEvent>, ClientError> {
        let params = [
            ("closed", closed.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let raw: Vec<RawEvent> = self.requester.get_json(&self.base_url, "/events", &params).await?;
        if raw.iter().any(|e| e.markets.is_none()) {
            let missing = raw.iter().filter(|e| e.markets.is_none()).count();
            warn!(missing, "event page omitted nested child markets");
        }
        Ok(raw.into_iter().map(CatalogEvent::from).collect())
    }

    async fn fetch_markets_page(
        &self,
        closed: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CatalogMarket>, ClientError> {
        let params = [
            ("closed", closed.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let raw: Vec<RawMarket> = self.requester.get_json(&self.base_url, "/markets", &params).await?;
        debug!(count = raw.len(), closed, offset, "fetched markets page");
        Ok(raw.into_iter().map(CatalogMarket::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_parses_json_string_fields() {
        let raw = RawMarket {
            id: "m1".into(),
            condition_id: "c1".into(),
            question: "Will it rain?".into(),
            description: None,
            slug: None,
            outcomes: Some(r#"["Yes","No"]"#.into()),
            clob_token_ids: Some(r#"["t0","t1"]"#.into()),
            outcome_prices: Some(r#"["0.6","0.4"]"#.into()),
            best_bid: None,
            best_ask: None,
            spread: None,
            volume: Some(100.0),
            volume_24h: None,
            liquidity: None,
            category: None,
            end_date: None,
            active: Some(true),
            closed: Some(false),
            archived: Some(false),
        };
        let market: CatalogMarket = raw.into();
        assert_eq!(market.outcomes, vec!["Yes", "No"]);
        assert_eq!(market.outcome_token_ids, vec!["t0", "t1"]);
        assert_eq!(market.outcome_prices, vec![Decimal::new(6, 1), Decimal::new(4, 1)]);
        assert!(market.active);
    }

    #[test]
    fn market_falls_back_to_default_outcomes_on_malformed_json() {
        let raw = RawMarket {
            id: "m1".into(),
            condition_id: "c1".into(),
            question: "q".into(),
            description: None,
            slug: None,
            outcomes: Some("not json".into()),
            clob_token_ids: None,
            outcome_prices: None,
            best_bid: None,
            best_ask: None,
            spread: None,
            volume: None,
            volume_24h: None,
            liquidity: None,
            category: None,
            end_date: None,
            active: Some(true),
            closed: Some(false),
            archived: Some(false),
        };
        let market: CatalogMarket = raw.into();
        assert_eq!(market.outcomes, vec!["Yes", "No"]);
    }

    #[test]
    fn closed_or_archived_forces_active_false() {
        let raw = RawMarket {
            id: "m1".into(),
            condition_id: "c1".into(),
            question: "q".into(),
            description: None,
            slug: None,
            outcomes: None,
            clob_token_ids: None,
            outcome_prices: None,
            best_bid: None,
            best_ask: None,
            spread: None,
            volume: None,
            volume_24h: None,
            liquidity: None,
            category: None,
            end_date: None,
            active: Some(true),
            closed: Some(true),
            archived: Some(false),
        };
        let market: CatalogMarket = raw.into();
        assert!(!market.active);
    }

    #[test]
    fn event_collects_nested_child_market_ids() {
        let raw_market = RawMarket {
            id: "m1".into(),
            condition_id: "c1".into(),
            question: "q".into(),
            description: None,
            slug: None,
            outcomes: None,
            clob_token_ids: None,
            outcome_prices: None,
            best_bid: None,
            best_ask: None,
            spread: None,
            volume: None,
            volume_24h: None,
            liquidity: None,
            category: None,
            end_date: None,
            active: Some(true),
            closed: Some(false),
            archived: Some(false),
        };
        let raw_event = RawEvent {
            id: "e1".into(),
            title: "t".into(),
            slug: "s".into(),
            description: None,
            images: None,
            start_date: None,
            end_date: None,
            volume: None,
            volume_24h: None,
            liquidity: None,
            active: Some(true),
            closed: Some(false),
            archived: Some(false),
            tags: None,
            markets: Some(vec![raw_market]),
        };
        let event: CatalogEvent = raw_event.into();
        assert_eq!(event.child_market_ids, Some(vec!["m1".to_string()]));
    }

    #[test]
    fn event_without_nested_markets_has_none_child_ids() {
        let raw_event = RawEvent {
            id: "e1".into(),
            title: "t".into(),
            slug: "s".into(),
            description: None,
            images: None,
            start_date: None,
            end_date: None,
            volume: None,
            volume_24h: None,
            liquidity: None,
            active: Some(true),
            closed: Some(false),
            archived: Some(false),
            tags: None,
            markets: None,
        };
        let event: CatalogEvent = raw_event.into();
        assert!(event.child_market_ids.is_none());
    }
}
