//! Staking reward payouts.
//!
//! Rewards are not carried by the stream: once a staking period ends the
//! node pays out outputs that only its RPC can list. The poller finds reward
//! rows whose block has settled, fetches the payouts and applies them with
//! the same [`Writer`] the dispatcher uses.

use crate::config::{IndexerConfig, RewardsConfig};
use crate::core::context::ConsumerCtx;
use crate::core::decoder::PayloadDecoder;
use crate::core::writer::Writer;
use crate::storage::StorageBackend;
use crate::types::{BlockType, Id, PendingReward};
use crate::utils::error::{IndexerError, Result};
use crate::utils::logging::log_error;
use crate::utils::metrics::{MetricsSink, PrometheusMetrics};
use crate::utils::rpc::NodeRpc;
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

const METRICS_SOURCE: &str = "rewards";

/// Floor for the tick period; `interval` rejects a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Periodically applies reward payouts.
pub struct RewardsPoller {
    storage: Arc<dyn StorageBackend>,
    rpc: Arc<dyn NodeRpc>,
    decoder: Arc<dyn PayloadDecoder>,
    writer: Writer,
    metrics: Arc<dyn MetricsSink>,
    config: RewardsConfig,
    perform_updates: bool,
}

impl RewardsPoller {
    /// Creates a poller writing through `writer`.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        rpc: Arc<dyn NodeRpc>,
        decoder: Arc<dyn PayloadDecoder>,
        writer: Writer,
    ) -> Self {
        Self {
            storage,
            rpc,
            decoder,
            writer,
            metrics: Arc::new(PrometheusMetrics),
            config: RewardsConfig::default(),
            perform_updates: false,
        }
    }

    /// Creates a poller for the platform chain, whose id is the empty id.
    pub fn from_config(
        config: &IndexerConfig,
        storage: Arc<dyn StorageBackend>,
        rpc: Arc<dyn NodeRpc>,
        decoder: Arc<dyn PayloadDecoder>,
    ) -> Self {
        let writer = Writer::new(Id::EMPTY.to_string(), config.native_asset_id)
            .with_bech32_hrp(config.bech32_hrp.clone());
        Self::new(storage, rpc, decoder, writer)
            .with_config(config.rewards)
            .with_perform_updates(config.perform_updates)
    }

    #[must_use]
    pub fn with_config(mut self, config: RewardsConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_perform_updates(mut self, enabled: bool) -> Self {
        self.perform_updates = enabled;
        self
    }

    /// Ticks until `token` is cancelled.
    ///
    /// Cancellation is only observed between ticks; a tick already running
    /// completes.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.poll_interval_secs,
            quiescence_secs = self.config.quiescence_secs,
            "Rewards poller started"
        );

        let mut ticker = interval(self.config.poll_interval().max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let start = Instant::now();
            let result = self.process_rewards().await;
            self.metrics.record_processed(METRICS_SOURCE, start.elapsed());
            match result {
                Ok(0) => {}
                Ok(applied) => {
                    self.metrics.record_success(METRICS_SOURCE);
                    tracing::info!(applied, "Rewards cycle complete");
                }
                Err(err) => {
                    self.metrics.record_failure(METRICS_SOURCE);
                    log_error("Rewards cycle failed", &err.to_string());
                }
            }
        }

        tracing::info!("Rewards poller stopped");
    }

    /// Runs one scan, returning how many rewards were marked processed.
    ///
    /// # Errors
    ///
    /// The first failing reward aborts the cycle; rewards handled before it
    /// stay processed and the rest are retried on the next tick.
    pub async fn process_rewards(&self) -> Result<usize> {
        let quiescence = TimeDelta::from_std(self.config.quiescence())
            .map_err(|e| IndexerError::ConfigError(format!("quiescence window: {e}")))?;
        let cutoff = Utc::now() - quiescence;
        let pending = self.storage.pending_rewards(cutoff).await?;

        let mut handled = 0;
        for reward in &pending {
            self.process_reward(reward).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn process_reward(&self, reward: &PendingReward) -> Result<()> {
        if reward.block_type == BlockType::Abort {
            tracing::debug!(reward_id = %reward.id, tx_id = %reward.tx_id, "Reward aborted");
            return self.storage.mark_reward_processed(&reward.id).await;
        }

        let encoded = self.rpc.get_reward_utxos(&reward.tx_id).await?;
        if encoded.is_empty() {
            return Err(IndexerError::RpcError(format!(
                "no reward UTXOs returned for tx {}",
                reward.tx_id
            )));
        }
        let utxos = encoded
            .iter()
            .map(|bytes| self.decoder.decode_utxo(bytes))
            .collect::<Result<Vec<_>>>()?;

        let mut session = self.storage.begin().await?;
        {
            let mut ctx = ConsumerCtx::new(reward.created_at, session.as_mut(), self.perform_updates);
            for utxo in &utxos {
                self.writer
                    .process_state_out(
                        &mut ctx,
                        &utxo.out,
                        utxo.tx_id,
                        utxo.output_index,
                        utxo.asset_id,
                        0,
                        0,
                        self.writer.chain_id(),
                        false,
                        false,
                    )
                    .await?;
            }
        }
        session.commit().await?;

        self.storage.mark_reward_processed(&reward.id).await?;
        tracing::debug!(
            reward_id = %reward.id,
            tx_id = %reward.tx_id,
            outputs = utxos.len(),
            "Reward applied"
        );
        Ok(())
    }
}
