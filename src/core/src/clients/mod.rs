//! The four upstream REST clients, sharing a common HTTP pipeline.

pub mod catalog;
pub mod clob;
pub mod http;
pub mod price_history;
pub mod trades;

pub use catalog::{Catalog, CatalogClient};
pub use clob::{Clob, ClobClient};
pub use http::HttpRequester;
pub use price_history::PriceHistoryClient;
pub use trades::{Trades, TradesClient};
