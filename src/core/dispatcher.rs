//! Stream dispatcher.
//!
//! Routes each message by topic to the block, trace or logs path, decodes it,
//! and persists it through a [`ChainConsumer`] inside one storage session.
//!
//! # Failure handling
//!
//! | Failure                 | Handling                                       |
//! |-------------------------|------------------------------------------------|
//! | decode                  | reported, message dropped                      |
//! | lock contention         | session rolled back, retried with backoff      |
//! | write budget exceeded   | reported, message dropped                      |
//! | any other storage error | reported, message dropped                      |
//!
//! Contention is retried without bound; the loop only gives up once the
//! shutdown token is cancelled, leaving the message unacknowledged so it is
//! delivered again on restart.

use crate::config::{IndexerConfig, RetryConfig};
use crate::core::balance::{BalanceManager, NoopBalanceManager};
use crate::core::consumer::ChainConsumer;
use crate::core::context::ConsumerCtx;
use crate::core::decoder::PayloadDecoder;
use crate::storage::StorageBackend;
use crate::streams::{MessageSource, Outcome};
use crate::types::{
    BlockPayload, Id, LogPayload, Message, PayloadKind, SourceMessage, Topics, TracePayload,
};
use crate::utils::error::{IndexerError, Result};
use crate::utils::logging::{log_batch, log_error, log_message};
use crate::utils::metrics::{MetricsSink, PrometheusMetrics};
use crate::utils::retry::RetrySleeper;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Pause after a source error before polling again.
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy)]
enum Payload<'p> {
    Block(&'p BlockPayload),
    Trace(&'p TracePayload),
    Logs(&'p LogPayload),
}

/// Routes, decodes and persists stream messages.
pub struct Dispatcher {
    topics: Topics,
    storage: Arc<dyn StorageBackend>,
    decoder: Arc<dyn PayloadDecoder>,
    consumer: Arc<dyn ChainConsumer>,
    metrics: Arc<dyn MetricsSink>,
    balance: Arc<dyn BalanceManager>,
    retry: RetryConfig,
    write_timeout: Duration,
    perform_updates: bool,
    workers: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Creates a dispatcher with default retry, timeout and worker settings.
    pub fn new(
        topics: Topics,
        storage: Arc<dyn StorageBackend>,
        decoder: Arc<dyn PayloadDecoder>,
        consumer: Arc<dyn ChainConsumer>,
    ) -> Self {
        Self {
            topics,
            storage,
            decoder,
            consumer,
            metrics: Arc::new(PrometheusMetrics),
            balance: Arc::new(NoopBalanceManager),
            retry: RetryConfig::default(),
            write_timeout: Duration::from_secs(180),
            perform_updates: false,
            workers: 10,
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a dispatcher configured from `config`.
    pub fn from_config(
        config: &IndexerConfig,
        storage: Arc<dyn StorageBackend>,
        decoder: Arc<dyn PayloadDecoder>,
        consumer: Arc<dyn ChainConsumer>,
    ) -> Self {
        Self::new(config.topics(), storage, decoder, consumer)
            .with_retry(config.retry)
            .with_write_timeout(config.write_timeout)
            .with_perform_updates(config.perform_updates)
            .with_workers(config.worker_threads)
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_balance_manager(mut self, balance: Arc<dyn BalanceManager>) -> Self {
        self.balance = balance;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_perform_updates(mut self, enabled: bool) -> Self {
        self.perform_updates = enabled;
        self
    }

    /// Maximum number of partitions processed concurrently.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops [`Dispatcher::run`] between batches.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Consumes `source` until it is exhausted or shutdown is requested.
    ///
    /// Messages sharing a partition are processed in delivery order; distinct
    /// partitions run concurrently up to the worker limit.
    ///
    /// # Errors
    ///
    /// Never fails on message errors: those are reported and acknowledged
    /// as dropped. The `Result` is kept for callers that join this future.
    pub async fn run(&self, mut source: Box<dyn MessageSource>) -> Result<()> {
        tracing::info!(
            source = source.source_name(),
            topics = ?self.topics.all(),
            workers = self.workers,
            "Dispatcher started"
        );

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = source.next_batch() => next,
            };

            let batch = match next {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    tracing::info!(source = source.source_name(), "Source exhausted");
                    break;
                }
                Err(err) => {
                    log_error("Failed to read from source", &err.to_string());
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(SOURCE_ERROR_BACKOFF) => continue,
                    }
                }
            };

            let start = Instant::now();
            let total = batch.len();
            let outcomes = self.process_batch(batch).await;

            let mut dropped = 0;
            for (message, outcome) in &outcomes {
                let Some(outcome) = outcome else { continue };
                if *outcome == Outcome::Dropped {
                    dropped += 1;
                }
                if let Err(err) = source.ack(message, *outcome).await {
                    log_error("Failed to acknowledge message", &err.to_string());
                }
            }
            log_batch(total, dropped, start.elapsed().as_millis() as u64);
        }

        tracing::info!("Dispatcher stopped");
        Ok(())
    }

    /// Processes one batch, grouping messages into ordered partition lanes.
    ///
    /// Each message is paired with its outcome; `None` means the message was
    /// interrupted by shutdown and must not be acknowledged. Once a lane is
    /// interrupted, or shutdown is requested before it starts, its remaining
    /// messages are left unprocessed with `None`.
    pub async fn process_batch(
        &self,
        batch: Vec<SourceMessage>,
    ) -> Vec<(SourceMessage, Option<Outcome>)> {
        let mut lanes: BTreeMap<String, Vec<SourceMessage>> = BTreeMap::new();
        for message in batch {
            lanes.entry(message.partition.clone()).or_default().push(message);
        }

        stream::iter(lanes.into_values())
            .map(|lane| self.process_lane(lane))
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn process_lane(
        &self,
        lane: Vec<SourceMessage>,
    ) -> Vec<(SourceMessage, Option<Outcome>)> {
        let mut outcomes = Vec::with_capacity(lane.len());
        let mut pending = lane.into_iter();
        for message in pending.by_ref() {
            if self.shutdown.is_cancelled() {
                outcomes.push((message, None));
                break;
            }
            let outcome = match self.process(&message).await {
                Ok(()) => Some(Outcome::Processed),
                Err(err) if err.is_contention() => None,
                Err(_) => Some(Outcome::Dropped),
            };
            let interrupted = outcome.is_none();
            outcomes.push((message, outcome));
            if interrupted {
                break;
            }
        }
        // Later messages of an interrupted lane wait for redelivery behind it.
        outcomes.extend(pending.map(|message| (message, None)));
        outcomes
    }

    /// Handles one message: route, decode, persist, report.
    ///
    /// Messages on topics this dispatcher does not serve are ignored.
    ///
    /// # Errors
    ///
    /// Returns the decode or storage error after recording it.
    pub async fn process(&self, source_message: &SourceMessage) -> Result<()> {
        let Some(kind) = self.topics.route(&source_message.topic) else {
            tracing::debug!(topic = %source_message.topic, "Ignoring message on unknown topic");
            return Ok(());
        };
        let message = &source_message.message;
        let label = kind.as_str();

        let start = Instant::now();
        let result = self.consume(kind, message).await;
        self.metrics.record_processed(label, start.elapsed());

        match &result {
            Ok(()) => {
                self.metrics.record_success(label);
                if kind == PayloadKind::Block {
                    self.balance.exec();
                }
                log_message(&message.id, &source_message.topic, label);
            }
            Err(err) if err.is_contention() => {
                tracing::info!(
                    message_id = %message.id,
                    topic = %source_message.topic,
                    kind = label,
                    "Shutdown during contended write, leaving message for redelivery"
                );
            }
            Err(err) => {
                self.metrics.record_failure(label);
                tracing::error!(
                    message_id = %message.id,
                    topic = %source_message.topic,
                    kind = label,
                    error = %err,
                    "Failed to consume message"
                );
            }
        }
        result
    }

    async fn consume(&self, kind: PayloadKind, message: &Message) -> Result<()> {
        let time = message.time();
        match kind {
            PayloadKind::Block => {
                let block = self.decoder.decode_block(&message.body)?;
                let content_id = Id::hash_of(&message.body);
                self.persist_with_retry(kind, content_id, time, Payload::Block(&block))
                    .await
            }
            PayloadKind::Trace => {
                let trace = self.decoder.decode_trace(&message.body)?;
                let content_id = Id::hash_of(&trace.trace);
                self.persist_with_retry(kind, content_id, time, Payload::Trace(&trace))
                    .await
            }
            PayloadKind::Logs => {
                let log = self.decoder.decode_logs(&message.body)?;
                let content_id = Id::hash_of(&message.body);
                self.persist_with_retry(kind, content_id, time, Payload::Logs(&log))
                    .await
            }
        }
    }

    async fn persist_with_retry(
        &self,
        kind: PayloadKind,
        content_id: Id,
        time: DateTime<Utc>,
        payload: Payload<'_>,
    ) -> Result<()> {
        let mut sleeper = RetrySleeper::new(self.retry);
        loop {
            match self.persist_once(content_id, time, payload).await {
                Err(err) if err.is_contention() => {
                    if self.shutdown.is_cancelled() {
                        return Err(err);
                    }
                    self.metrics.record_retry(kind.as_str());
                    tracing::warn!(
                        content_id = %content_id,
                        kind = kind.as_str(),
                        attempt = sleeper.attempts() + 1,
                        delay_ms = sleeper.next_delay().as_millis() as u64,
                        error = %err,
                        "Write contended, retrying"
                    );
                    sleeper.inc().await;
                }
                other => return other,
            }
        }
    }

    /// One bounded attempt in a fresh session. An attempt that fails or runs
    /// out of time drops its session, rolling back every write it made.
    async fn persist_once(
        &self,
        content_id: Id,
        time: DateTime<Utc>,
        payload: Payload<'_>,
    ) -> Result<()> {
        let attempt = async {
            let mut session = self.storage.begin().await?;
            {
                let mut ctx = ConsumerCtx::new(time, session.as_mut(), self.perform_updates);
                match payload {
                    Payload::Block(block) => self.consumer.consume_block(&mut ctx, block).await?,
                    Payload::Trace(trace) => {
                        self.consumer
                            .consume_trace(&mut ctx, content_id, trace)
                            .await?;
                    }
                    Payload::Logs(log) => {
                        self.consumer.consume_logs(&mut ctx, content_id, log).await?;
                    }
                }
            }
            session.commit().await
        };

        tokio::time::timeout(self.write_timeout, attempt)
            .await
            .map_err(|_| IndexerError::write_timeout(self.write_timeout))?
    }
}
