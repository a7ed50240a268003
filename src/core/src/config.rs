//! Configuration loading from environment variables.

use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

/// Optional L2 signing credentials for the CLOB client.
#[derive(Debug, Clone)]
pub struct ClobCredentials {
    pub address: String,
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    // Store
    pub database_url: String,
    pub db_pool_max: u32,
    pub query_timeout_ms: u64,

    // Batch sync cadence
    pub markets_interval_ms: u64,
    pub trades_interval_ms: u64,
    pub enable_trades_sync: bool,

    // Realtime
    pub price_flush_interval_ms: u64,
    pub ws_url: String,
    pub ws_reconnect_interval_ms: u64,
    pub ws_max_reconnect_attempts: u32,
    pub ws_connections: usize,

    // Batch sizes
    pub markets_batch_size: u32,
    pub trades_batch_size: u32,
    pub trades_sync_market_limit: u32,

    // CLOB audit
    pub clob_audit_interval_ms: u64,
    pub clob_audit_batch_size: u32,
    pub clob_audit_concurrency: usize,

    // Retention
    pub price_history_retention_days: u32,
    pub trades_retention_days: u32,

    // Staleness
    pub sync_stale_threshold_ms: u64,

    // Upstream base URLs
    pub catalog_base_url: String,
    pub clob_base_url: String,
    pub data_base_url: String,

    // Optional L2 signing credentials
    pub clob_credentials: Option<ClobCredentials>,
}

impl Config {
    /// Load configuration, reading a `.env` file first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from environment variables only (no `.env` file).
    /// Exists so tests can exercise env parsing deterministically.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let db_pool_max = parse_env("DB_POOL_MAX", 20)?;
        let query_timeout_ms = parse_env("QUERY_TIMEOUT_MS", 30_000)?;

        let markets_interval_ms = parse_env("MARKETS_INTERVAL_MS", 5 * 60 * 1000)?;
        let trades_interval_ms = parse_env("TRADES_INTERVAL_MS", 60 * 1000)?;
        let enable_trades_sync = parse_env("ENABLE_TRADES_SYNC", true)?;

        let price_flush_interval_ms = parse_env("PRICE_FLUSH_INTERVAL_MS", 1_000)?;
        let ws_url = env::var("WS_URL")
            .unwrap_or_else(|_| "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string());
        let ws_reconnect_interval_ms = parse_env("WS_RECONNECT_INTERVAL_MS", 3_000)?;
        let ws_max_reconnect_attempts = parse_env("WS_MAX_RECONNECT_ATTEMPTS", 10)?;
        let ws_connections: usize = parse_env("WS_CONNECTIONS", 1usize)?;
        if ws_connections == 0 {
            return Err(ConfigError::InvalidValue {
                var: "WS_CONNECTIONS".to_string(),
                value: "0".to_string(),
            });
        }

        let markets_batch_size = parse_env("MARKETS_BATCH_SIZE", 500)?;
        let trades_batch_size = parse_env("TRADES_BATCH_SIZE", 500)?;
        let trades_sync_market_limit = parse_env("TRADES_SYNC_MARKET_LIMIT", 100)?;

        let clob_audit_interval_ms = parse_env("CLOB_AUDIT_INTERVAL_MS", 10 * 60 * 1000)?;
        let clob_audit_batch_size = parse_env("CLOB_AUDIT_BATCH_SIZE", 200)?;
        let clob_audit_concurrency = parse_env("CLOB_AUDIT_CONCURRENCY", 6usize)?;

        let price_history_retention_days = parse_env("PRICE_HISTORY_RETENTION_DAYS", 30)?;
        let trades_retention_days = parse_env("TRADES_RETENTION_DAYS", 30)?;

        let sync_stale_threshold_ms = parse_env("SYNC_STALE_THRESHOLD_MS", 15 * 60 * 1000)?;

        let catalog_base_url = env::var("CATALOG_BASE_URL")
            .unwrap_or_else(|_| "https://gamma-api.polymarket.com".to_string());
        let clob_base_url =
            env::var("CLOB_BASE_URL").unwrap_or_else(|_| "https://clob.polymarket.com".to_string());
        let data_base_url =
            env::var("DATA_BASE_URL").unwrap_or_else(|_| "https://data-api.polymarket.com".to_string());

        let clob_credentials = load_credentials();

        Ok(Self {
            database_url,
            db_pool_max,
            query_timeout_ms,
            markets_interval_ms,
            trades_interval_ms,
            enable_trades_sync,
            price_flush_interval_ms,
            ws_url,
            ws_reconnect_interval_ms,
            ws_max_reconnect_attempts,
            ws_connections,
            markets_batch_size,
            trades_batch_size,
            trades_sync_market_limit,
            clob_audit_interval_ms,
            clob_audit_batch_size,
            clob_audit_concurrency,
            price_history_retention_days,
            trades_retention_days,
            sync_stale_threshold_ms,
            catalog_base_url,
            clob_base_url,
            data_base_url,
            clob_credentials,
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn markets_interval(&self) -> Duration {
        Duration::from_millis(self.markets_interval_ms)
    }

    /// Events refresh half a period offset from markets.
    pub fn events_phase_shift(&self) -> Duration {
        Duration::from_millis(self.markets_interval_ms / 2)
    }

    pub fn trades_interval(&self) -> Duration {
        Duration::from_millis(self.trades_interval_ms)
    }

    pub fn price_flush_interval(&self) -> Duration {
        Duration::from_millis(self.price_flush_interval_ms)
    }

    pub fn ws_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.ws_reconnect_interval_ms)
    }

    pub fn clob_audit_interval(&self) -> Duration {
        Duration::from_millis(self.clob_audit_interval_ms)
    }

    pub fn sync_stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.sync_stale_threshold_ms as i64)
    }
}

fn load_credentials() -> Option<ClobCredentials> {
    let address = env::var("CLOB_ADDRESS").ok()?;
    let api_key = env::var("CLOB_API_KEY").ok()?;
    let secret = env::var("CLOB_SECRET").ok()?;
    let passphrase = env::var("CLOB_PASSPHRASE").ok()?;
    Some(ClobCredentials {
        address,
        api_key,
        secret,
        passphrase,
    })
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_all() {
        for var in [
            "DATABASE_URL",
            "DB_POOL_MAX",
            "MARKETS_INTERVAL_MS",
            "WS_CONNECTIONS",
            "CLOB_ADDRESS",
            "CLOB_API_KEY",
            "CLOB_SECRET",
            "CLOB_PASSPHRASE",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_database_url_is_an_error() {
        clear_all();
        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    #[serial]
    fn defaults_match_spec() {
        clear_all();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        let config = Config::from_env_only().unwrap();

        assert_eq!(config.db_pool_max, 20);
        assert_eq!(config.query_timeout_ms, 30_000);
        assert_eq!(config.markets_interval_ms, 5 * 60 * 1000);
        assert_eq!(config.trades_interval_ms, 60 * 1000);
        assert!(config.enable_trades_sync);
        assert_eq!(config.price_flush_interval_ms, 1_000);
        assert_eq!(config.ws_reconnect_interval_ms, 3_000);
        assert_eq!(config.ws_max_reconnect_attempts, 10);
        assert_eq!(config.ws_connections, 1);
        assert_eq!(config.markets_batch_size, 500);
        assert_eq!(config.trades_batch_size, 500);
        assert_eq!(config.trades_sync_market_limit, 100);
        assert_eq!(config.price_history_retention_days, 30);
        assert_eq!(config.sync_stale_threshold_ms, 15 * 60 * 1000);
        assert!(config.clob_credentials.is_none());

        env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial]
    fn events_phase_shift_is_half_markets_interval() {
        clear_all();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("MARKETS_INTERVAL_MS", "100000");
        let config = Config::from_env_only().unwrap();
        assert_eq!(config.events_phase_shift(), Duration::from_millis(50_000));
        clear_all();
    }

    #[test]
    #[serial]
    fn zero_ws_connections_is_rejected() {
        clear_all();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("WS_CONNECTIONS", "0");
        let result = Config::from_env_only();
        assert!(result.is_err());
        clear_all();
    }

    #[test]
    #[serial]
    fn credentials_load_only_when_all_present() {
        clear_all();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("CLOB_ADDRESS", "0xabc");
        let config = Config::from_env_only().unwrap();
        assert!(config.clob_credentials.is_none());

        env::set_var("CLOB_API_KEY", "key");
        env::set_var("CLOB_SECRET", "c2VjcmV0");
        env::set_var("CLOB_PASSPHRASE", "pass");
        let config = Config::from_env_only().unwrap();
        assert!(config.clob_credentials.is_some());
        clear_all();
    }
}
