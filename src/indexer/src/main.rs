//! Prediction-market indexer service.
//!
//! Loads configuration from the environment, connects to Postgres, wires the
//! upstream clients into the batch and realtime sync managers, and runs until
//! interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use indexer_core::auth::L2Signer;
use indexer_core::cache::NoopInvalidator;
use indexer_core::clients::catalog::CatalogClient;
use indexer_core::clients::clob::ClobClient;
use indexer_core::clients::price_history::PriceHistoryClient;
use indexer_core::clients::trades::TradesClient;
use indexer_core::store::PgStore;
use indexer_core::sync::{BackfillManager, BatchSyncManager, Orchestrator, RealtimeSyncManager, RetentionSweeper};
use indexer_core::{Config, Database};

/// Prediction-market indexer - syncs catalog, trades, and live prices into Postgres.
#[derive(Parser, Debug)]
#[command(name = "indexer")]
#[command(about = "Indexes prediction markets, trades, and live prices")]
struct Args {
    /// Run a one-shot historical backfill for markets with no price samples, then exit
    #[arg(long)]
    backfill_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("indexer=info".parse().unwrap())
                .add_directive("indexer_core=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let config = Config::from_env().context("failed to load configuration")?;

    info!("connecting to database...");
    let db = Database::connect(&config).await?;
    db.health_check().await?;
    info!("database connected and schema verified");

    let timeout = Duration::from_millis(config.query_timeout_ms);
    let signer = config.clob_credentials.clone().map(L2Signer::new);

    let catalog: Arc<dyn indexer_core::clients::Catalog> =
        Arc::new(CatalogClient::new(config.catalog_base_url.clone(), timeout));
    let clob: Arc<dyn indexer_core::clients::Clob> =
        Arc::new(ClobClient::new(config.clob_base_url.clone(), timeout, signer));
    let trades_client: Arc<dyn indexer_core::clients::Trades> =
        Arc::new(TradesClient::new(config.data_base_url.clone(), timeout));
    let price_history = PriceHistoryClient::new(config.data_base_url.clone(), timeout);

    let store: Arc<dyn indexer_core::store::Store> = Arc::new(PgStore::new(db.pool().clone()));
    let cache = Arc::new(NoopInvalidator);

    if args.backfill_once {
        info!("running one-shot backfill and exiting");
        let backfill = BackfillManager::new(store.clone(), price_history);
        backfill
            .backfill_missing(indexer_core::clients::price_history::Interval::Max)
            .await?;
        return Ok(());
    }

    let batch = Arc::new(BatchSyncManager::new(
        store.clone(),
        catalog,
        clob,
        trades_client,
        cache,
        config.clone(),
    ));

    let realtime = Arc::new(RealtimeSyncManager::new(
        store.clone(),
        config.ws_url.clone(),
        config.ws_connections,
        config.ws_reconnect_interval(),
        config.ws_max_reconnect_attempts,
        config.price_flush_interval(),
    ));

    let retention = Arc::new(RetentionSweeper::new(
        store.clone(),
        config.price_history_retention_days,
        config.trades_retention_days,
        config.enable_trades_sync,
    ));

    let orchestrator = Orchestrator::new(batch, realtime, retention);

    orchestrator.start().await.context("failed to start orchestrator")?;
    info!("indexer running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    orchestrator.stop().await;
    info!("indexer stopped");

    Ok(())
}
