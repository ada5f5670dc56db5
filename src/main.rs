//! `utxo-indexer` binary.
//!
//! Consumes the chain's topics from the `tx_pool` table and, when a node RPC
//! endpoint is configured, applies staking reward payouts alongside.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use utxo_indexer::utils::logging::{log_error, log_startup};
use utxo_indexer::{
    AtomicTxConsumer, Dispatcher, HttpNodeRpc, InMemoryMetrics, IndexerConfig,
    JsonPayloadDecoder, PgStorage, Result, RewardsPoller, StorageBackend, TelemetryConfig,
    TxPoolSource, Writer, init_telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _telemetry = init_telemetry(TelemetryConfig::default());

    let config = IndexerConfig::from_env()?;
    let topics = config.topics();
    log_startup(
        &config.chain_id,
        &config.database_url,
        config.node_rpc_url.as_deref(),
        &topics.all(),
    );

    let storage = PgStorage::new(&config.database_url, config.lock_timeout).await?;
    storage.initialize().await?;
    let pool = storage.pool().clone();
    let storage: Arc<dyn StorageBackend> = Arc::new(storage);
    let decoder = Arc::new(JsonPayloadDecoder);
    let metrics = Arc::new(InMemoryMetrics::new());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(err) => log_error("Failed to listen for shutdown signal", &err.to_string()),
        }
        signal_token.cancel();
    });

    let rewards = match &config.node_rpc_url {
        Some(url) => {
            let poller = RewardsPoller::from_config(
                &config,
                Arc::clone(&storage),
                Arc::new(HttpNodeRpc::new(url)?),
                decoder.clone(),
            )
            .with_metrics(metrics.clone());
            let token = shutdown.clone();
            Some(tokio::spawn(async move { poller.run(token).await }))
        }
        None => {
            tracing::info!("NODE_RPC_URL not set, rewards poller disabled");
            None
        }
    };

    let consumer = AtomicTxConsumer::new(Writer::from_config(&config));
    let dispatcher = Dispatcher::from_config(&config, storage, decoder, Arc::new(consumer))
        .with_metrics(metrics.clone())
        .with_shutdown_token(shutdown.clone());
    let source = TxPoolSource::new(
        pool,
        topics.all().map(str::to_string).to_vec(),
        config.batch_size,
        config.poll_interval(),
    );

    let result = dispatcher.run(Box::new(source)).await;

    shutdown.cancel();
    if let Some(handle) = rewards {
        if let Err(err) = handle.await {
            log_error("Rewards poller task failed", &err.to_string());
        }
    }
    metrics.report();
    result
}
