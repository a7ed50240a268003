//! Price History Client — per-condition time-series.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::clients::http::HttpRequester;
use crate::errors::ClientError;

/// Supported history intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Max,
    OneWeek,
    OneDay,
    SixHours,
    OneHour,
}

impl Interval {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Interval::Max => "max",
            Interval::OneWeek => "1w",
            Interval::OneDay => "1d",
            Interval::SixHours => "6h",
            Interval::OneHour => "1h",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPoint {
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "p", deserialize_with = "deserialize_price")]
    pub price: Decimal,
}

fn deserialize_price<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Decimal::try_from(raw).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryPoint>,
}

pub struct PriceHistoryClient {
    requester: HttpRequester,
    base_url: String,
}

impl PriceHistoryClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            requester: HttpRequester::new(timeout),
            base_url,
        }
    }

    pub async fn fetch(
        &self,
        token_id: &str,
        interval: Interval,
    ) -> Result<Vec<HistoryPoint>, ClientError> {
        let params = [
            ("market", token_id.to_string()),
            ("interval", interval.as_query_value().to_string()),
        ];
        let response: HistoryResponse = self
            .requester
            .get_json(&self.base_url, "/prices-history", &params)
            .await?;
        Ok(response.history)
    }
}
