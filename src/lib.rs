//! `utxo-indexer` - the write side of a UTXO chain explorer.
//!
//! Decoded transactions arrive as stream messages. The [`Dispatcher`] routes
//! each one to the [`Writer`], which turns spent inputs and created outputs
//! into idempotent relational rows: outputs, redemptions, owner addresses and
//! the accumulate rows a balance aggregator folds into running totals. Lock
//! contention rolls the attempt back and retries it with backoff. The
//! [`RewardsPoller`] applies staking reward payouts fetched from a node
//! through the same writer.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use utxo_indexer::{
//!     AtomicTxConsumer, Dispatcher, IndexerConfig, JsonPayloadDecoder, PgStorage,
//!     StorageBackend, TxPoolSource, Writer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     dotenvy::dotenv().ok();
//!     let config = IndexerConfig::from_env()?;
//!
//!     let storage = PgStorage::new(&config.database_url, config.lock_timeout).await?;
//!     storage.initialize().await?;
//!     let pool = storage.pool().clone();
//!
//!     let consumer = AtomicTxConsumer::new(Writer::from_config(&config));
//!     let dispatcher = Dispatcher::from_config(
//!         &config,
//!         Arc::new(storage),
//!         Arc::new(JsonPayloadDecoder),
//!         Arc::new(consumer),
//!     );
//!
//!     let topics = config.topics().all().map(str::to_string).to_vec();
//!     let source = TxPoolSource::new(pool, topics, config.batch_size, config.poll_interval());
//!     dispatcher.run(Box::new(source)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! See [`IndexerConfig::from_env`] for the environment variables read by the
//! binary.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub use config::{IndexerConfig, IndexerConfigBuilder, RetryConfig, RewardsConfig};
pub use core::{
    AtomicTxConsumer, BalanceManager, ChainConsumer, ConsumerCtx, Dispatcher, JsonPayloadDecoder,
    NoopBalanceManager, NotifyBalanceManager, PayloadDecoder, RewardsPoller, Writer,
};
pub use storage::{MemoryStorage, Persist, PgStorage, StorageBackend, Tables};
pub use streams::{ChannelSource, MessageSource, Outcome, TxPoolSource};
pub use telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
pub use types::*;
pub use utils::error::{IndexerError, Result};
pub use utils::metrics::{InMemoryMetrics, MetricsSink, PrometheusMetrics, SourceCounts};
pub use utils::retry::RetrySleeper;
pub use utils::rpc::{HttpNodeRpc, NodeRpc};

pub mod config;
pub mod core;
pub mod storage;
pub mod streams;
pub mod telemetry;
pub mod types;
pub mod utils;
