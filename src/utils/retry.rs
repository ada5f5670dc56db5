//! Backoff primitive for retrying contended writes.
//!
//! This module provides:
//! - [`compute_backoff`]: exponential-backoff delay calculator with optional jitter.
//! - [`RetrySleeper`]: stateful sleeper whose delay grows on every call to [`RetrySleeper::inc`].
//!
//! The sleeper owns no policy about *whether* to retry; callers loop on their
//! own classification (see [`crate::IndexerError::is_contention`]).

use crate::config::RetryConfig;
use std::time::Duration;
use tokio::time::sleep;

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Computes the delay before the next retry.
///
/// `attempt` is 1-indexed: `attempt = 1` is the delay before the first retry,
/// `attempt = 2` before the second, etc.
///
/// Formula: `delay = initial_backoff_ms * backoff_multiplier^(attempt - 1)`,
/// ±25 % jitter if enabled, then capped at `max_backoff_ms`.
#[must_use]
pub fn compute_backoff(cfg: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = cfg.initial_backoff_ms as f64 * cfg.backoff_multiplier.powi(exponent);

    let ms = if cfg.jitter {
        // Pseudo-random factor in [0.75, 1.25] taken from the clock, no rand dep.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let factor = 0.75 + (nanos % 1_000_000) as f64 / 1_000_000.0 * 0.5;
        base * factor
    } else {
        base
    };

    Duration::from_millis(ms.min(cfg.max_backoff_ms as f64) as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// RetrySleeper
// ─────────────────────────────────────────────────────────────────────────────

/// Sleeps for a growing delay each time a retry is taken.
///
/// A fresh sleeper is created per message, so one message's backoff never
/// leaks into the next.
///
/// ```no_run
/// # use utxo_indexer::{RetryConfig, RetrySleeper};
/// # async fn example() {
/// let mut sleeper = RetrySleeper::new(RetryConfig::default());
/// sleeper.inc().await; // 100 ms
/// sleeper.inc().await; // 200 ms
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetrySleeper {
    config: RetryConfig,
    attempts: u32,
}

impl RetrySleeper {
    /// Creates a sleeper with no retries taken yet.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay the next call to [`RetrySleeper::inc`] will sleep for.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        compute_backoff(&self.config, self.attempts.saturating_add(1))
    }

    /// Number of retries taken so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleeps for the current delay and grows it for the next call.
    pub async fn inc(&mut self) {
        let delay = self.next_delay();
        self.attempts = self.attempts.saturating_add(1);
        sleep(delay).await;
    }
}
