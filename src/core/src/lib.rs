//! Core synchronization engine for the prediction-market indexer.
//!
//! Provides:
//! - Configuration loading from the environment
//! - Database connection pooling and schema verification
//! - The four upstream REST clients (catalog, CLOB, trades, price history)
//! - L2 request signing and the cache-invalidation seam
//! - The transactional store
//! - Batch sync, realtime sync, backfill, retention, and orchestration

pub mod auth;
pub mod cache;
pub mod clients;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod store;
pub mod sync;

pub use config::Config;
pub use db::Database;
pub use sync::Orchestrator;
