//! Trades Client — global, time-ordered recent-trades feed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::clients::http::HttpRequester;
use crate::errors::ClientError;

#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    pub asset: String,
    pub side: String,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub size: Decimal,
    pub timestamp: i64,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<String>,
    #[serde(rename = "proxyWallet")]
    pub proxy_wallet: Option<String>,
}

fn deserialize_decimal_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(f64),
    }
    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
        StrOrNum::Num(f) => Decimal::try_from(f).map_err(serde::de::Error::custom),
    }
}

impl RawTrade {
    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, 0).unwrap_or_else(Utc::now)
    }
}

/// The global recent-trades feed. Kept as a trait so `BatchSyncManager` can
/// be exercised against a `mockall` fake without a live trades feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Trades: Send + Sync {
    /// Fetch one batch of the global trades feed, newest first.
    async fn fetch_recent(&self, limit: u32) -> Result<Vec<RawTrade>, ClientError>;
}

pub struct TradesClient {
    requester: HttpRequester,
    base_url: String,
}

impl TradesClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            requester: HttpRequester::new(timeout),
            base_url,
        }
    }
}

#[async_trait]
impl Trades for TradesClient {
    async fn fetch_recent(&self, limit: u32) -> Result<Vec<RawTrade>, ClientError> {
        let params = [("limit", limit.to_string())];
        self.requester.get_json(&self.base_url, "/trades", &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_price_and_size_from_strings() {
        let json = r#"{"asset":"A","side":"BUY","price":"0.5","size":"10","timestamp":1700,"transactionHash":"0xabc","proxyWallet":"0xdef"}"#;
        let trade: RawTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.price, Decimal::new(5, 1));
        assert_eq!(trade.size, Decimal::new(10, 0));
    }
}
