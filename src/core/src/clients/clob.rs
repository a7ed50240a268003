//! CLOB Client — per-market tradability lookup.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::auth::L2Signer;
use crate::clients::http::HttpRequester;
use crate::errors::ClientError;

#[derive(Debug, Clone, Deserialize)]
pub struct TradabilityStatus {
    #[serde(default)]
    pub closed: bool,
    #[serde(default = "default_true", rename = "accepting_orders")]
    pub accepting_orders: bool,
    #[serde(default = "default_true", rename = "enable_order_book")]
    pub enable_order_book: bool,
}

fn default_true() -> bool {
    true
}

impl TradabilityStatus {
    /// A market is deemed closed if any of the three signals says so.
    pub fn is_closed(&self) -> bool {
        self.closed || !self.accepting_orders || !self.enable_order_book
    }
}

/// Per-market tradability lookup. Kept as a trait so `BatchSyncManager` can
/// be exercised against a `mockall` fake without a live CLOB.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Clob: Send + Sync {
    /// Look up tradability for a single condition id.
    async fn tradability(&self, condition_id: &str) -> Result<TradabilityStatus, ClientError>;
}

pub struct ClobClient {
    requester: HttpRequester,
    base_url: String,
}

impl ClobClient {
    pub fn new(base_url: String, timeout: Duration, signer: Option<L2Signer>) -> Self {
        let requester = match signer {
            Some(s) => HttpRequester::with_signer(timeout, s),
            None => HttpRequester::new(timeout),
        };
        Self { requester, base_url }
    }
}

#[async_trait]
impl Clob for ClobClient {
    async fn tradability(&self, condition_id: &str) -> Result<TradabilityStatus, ClientError> {
        let params = [("condition_id", condition_id.to_string())];
        self.requester
            .get_json(&self.base_url, "/markets", &params)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_flag_alone_marks_closed() {
        let s = TradabilityStatus {
            closed: true,
            accepting_orders: true,
            enable_order_book: true,
        };
        assert!(s.is_closed());
    }

    #[test]
    fn not_accepting_orders_marks_closed() {
        let s = TradabilityStatus {
            closed: false,
            accepting_orders: false,
            enable_order_book: true,
        };
        assert!(s.is_closed());
    }

    #[test]
    fn disabled_order_book_marks_closed() {
        let s = TradabilityStatus {
            closed: false,
            accepting_orders: true,
            enable_order_book: false,
        };
        assert!(s.is_closed());
    }

    #[test]
    fn fully_open_is_not_closed() {
        let s = TradabilityStatus {
            closed: false,
            accepting_orders: true,
            enable_order_book: true,
        };
        assert!(!s.is_closed());
    }
}
