//! Consume metrics.
//!
//! Components receive a [`MetricsSink`] explicitly. [`PrometheusMetrics`]
//! forwards to the `metrics` facade (whatever recorder the binary installs);
//! [`InMemoryMetrics`] keeps per-source counters for tests and embedding.
//!
//! ## Metric names
//!
//! `utxo_indexer_consume_{name}_{unit}`, labelled by `source`.

use metrics::{counter, histogram};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const RECORDS_PROCESSED: &str = "utxo_indexer_consume_records_processed_total";
const RECORDS_SUCCESS: &str = "utxo_indexer_consume_records_success_total";
const RECORDS_FAILURE: &str = "utxo_indexer_consume_records_failure_total";
const RECORDS_RETRY: &str = "utxo_indexer_consume_records_retry_total";
const PROCESS_LATENCY: &str = "utxo_indexer_consume_process_seconds";

/// Receives consume outcomes, keyed by source (`block`, `trace`, `logs`, `rewards`).
pub trait MetricsSink: Send + Sync {
    /// One message was handled, successfully or not, in `elapsed`.
    fn record_processed(&self, source: &str, elapsed: Duration);

    fn record_success(&self, source: &str);

    fn record_failure(&self, source: &str);

    /// A contended write is about to be retried.
    fn record_retry(&self, source: &str);
}

/// Sink backed by the `metrics` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

impl MetricsSink for PrometheusMetrics {
    fn record_processed(&self, source: &str, elapsed: Duration) {
        counter!(RECORDS_PROCESSED, "source" => source.to_string()).increment(1);
        histogram!(PROCESS_LATENCY, "source" => source.to_string()).record(elapsed.as_secs_f64());
    }

    fn record_success(&self, source: &str) {
        counter!(RECORDS_SUCCESS, "source" => source.to_string()).increment(1);
    }

    fn record_failure(&self, source: &str) {
        counter!(RECORDS_FAILURE, "source" => source.to_string()).increment(1);
    }

    fn record_retry(&self, source: &str) {
        counter!(RECORDS_RETRY, "source" => source.to_string()).increment(1);
    }
}

/// Counters for one source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceCounts {
    pub processed: u64,
    pub success: u64,
    pub failure: u64,
    pub retry: u64,
}

/// Sink that keeps counters in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counts: Mutex<BTreeMap<String, SourceCounts>>,
}

impl InMemoryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counters of `source`.
    #[must_use]
    pub fn counts(&self, source: &str) -> SourceCounts {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .copied()
            .unwrap_or_default()
    }

    /// Logs every source's counters at info level.
    pub fn report(&self) {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        for (source, c) in counts.iter() {
            tracing::info!(
                source = %source,
                processed = c.processed,
                success = c.success,
                failure = c.failure,
                retry = c.retry,
                "Consume metrics"
            );
        }
    }

    fn bump(&self, source: &str, f: impl FnOnce(&mut SourceCounts)) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        f(counts.entry(source.to_string()).or_default());
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_processed(&self, source: &str, _elapsed: Duration) {
        self.bump(source, |c| c.processed += 1);
    }

    fn record_success(&self, source: &str) {
        self.bump(source, |c| c.success += 1);
    }

    fn record_failure(&self, source: &str) {
        self.bump(source, |c| c.failure += 1);
    }

    fn record_retry(&self, source: &str) {
        self.bump(source, |c| c.retry += 1);
    }
}
