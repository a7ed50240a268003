//! Database connection pool and startup schema verification.

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Failed to connect to database: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Schema verification failed: missing table(s) {0:?}")]
    SchemaMismatch(Vec<String>),
}

/// Tables the core expects to exist before any sync manager is started.
const REQUIRED_TABLES: &[&str] = &[
    "events",
    "markets",
    "price_samples",
    "trades",
    "sync_state",
];

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and verify the schema. Fatal on mismatch.
    pub async fn connect(config: &Config) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_pool_max)
            .acquire_timeout(config.query_timeout())
            .connect(&config.database_url)
            .await?;

        let db = Self { pool };
        db.verify_schema().await?;
        Ok(db)
    }

    /// Connect without verifying schema. Used by tests that manage their own fixtures.
    pub async fn connect_unchecked(config: &Config) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_pool_max)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database connection is healthy.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Confirm every table the core writes to is present via `information_schema`.
    async fn verify_schema(&self) -> Result<(), DbError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'",
        )
        .fetch_all(&self.pool)
        .await?;

        let missing: Vec<String> = REQUIRED_TABLES
            .iter()
            .filter(|t| !rows.iter().any(|r| r == *t))
            .map(|t| t.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DbError::SchemaMismatch(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_verifies_schema() {
        dotenvy::dotenv().ok();
        let Ok(config) = Config::from_env() else {
            return;
        };

        let db = Database::connect(&config).await;
        assert!(db.is_ok(), "should connect and find required tables");

        let db = db.unwrap();
        assert!(db.health_check().await.is_ok());
    }
}
