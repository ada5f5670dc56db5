//! Message sources feeding the dispatcher.
//!
//! The `MessageSource` trait abstracts over where messages come from: the
//! `tx_pool` table written by the stream producer, or an in-process channel.

use crate::types::SourceMessage;
use crate::utils::error::Result;
use async_trait::async_trait;

pub mod channel;
pub mod tx_pool;

pub use channel::ChannelSource;
pub use tx_pool::TxPoolSource;

/// Final state of a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All rows of the message are committed.
    Processed,
    /// The message failed permanently and was reported.
    Dropped,
}

/// Unified interface for message sources.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits for the next batch of messages.
    ///
    /// Returns `Ok(None)` once the source is exhausted and will never yield again.
    async fn next_batch(&mut self) -> Result<Option<Vec<SourceMessage>>>;

    /// Records the outcome of a message from the last batch.
    async fn ack(&mut self, message: &SourceMessage, outcome: Outcome) -> Result<()>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}
