//! Polling source over the `tx_pool` table.
//!
//! The stream producer appends messages to `tx_pool`; this source reads the
//! unprocessed rows of the configured topics in arrival order.

use crate::streams::{MessageSource, Outcome};
use crate::types::{Message, SourceMessage};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time;

const STATUS_PROCESSED: i16 = 1;
const STATUS_DROPPED: i16 = 2;

/// Reads pending `tx_pool` rows, partitioned by topic.
///
/// # Example
///
/// ```no_run
/// # use utxo_indexer::TxPoolSource;
/// # use std::time::Duration;
/// # async fn example(pool: sqlx::PgPool) {
/// let source = TxPoolSource::new(
///     pool,
///     vec!["1-chainA-atomic".to_string()],
///     100,
///     Duration::from_secs(1),
/// );
/// # }
/// ```
pub struct TxPoolSource {
    pool: PgPool,
    topics: Vec<String>,
    batch_size: usize,
    poll_interval: Duration,
}

impl TxPoolSource {
    #[must_use]
    pub fn new(pool: PgPool, topics: Vec<String>, batch_size: usize, poll_interval: Duration) -> Self {
        Self {
            pool,
            topics,
            batch_size,
            poll_interval,
        }
    }

    async fn fetch(&self) -> Result<Vec<SourceMessage>> {
        let rows: Vec<(String, String, Vec<u8>, String, DateTime<Utc>)> = sqlx::query_as(
            r"
            SELECT id, chain_id, serialization, topic, created_at
            FROM tx_pool
            WHERE processed = 0 AND topic = ANY($1)
            ORDER BY created_at
            LIMIT $2
            ",
        )
        .bind(&self.topics)
        .bind(i64::try_from(self.batch_size).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, chain_id, body, topic, created_at)| SourceMessage {
                source_id: id.clone(),
                partition: topic.clone(),
                topic,
                message: Message {
                    id,
                    chain_id,
                    body,
                    timestamp: created_at.timestamp(),
                    nanosecond: created_at.timestamp_subsec_nanos(),
                },
            })
            .collect())
    }
}

#[async_trait]
impl MessageSource for TxPoolSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<SourceMessage>>> {
        loop {
            let batch = self.fetch().await?;
            if !batch.is_empty() {
                return Ok(Some(batch));
            }
            time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&mut self, message: &SourceMessage, outcome: Outcome) -> Result<()> {
        let status = match outcome {
            Outcome::Processed => STATUS_PROCESSED,
            Outcome::Dropped => STATUS_DROPPED,
        };
        sqlx::query("UPDATE tx_pool SET processed = $1 WHERE id = $2")
            .bind(status)
            .bind(&message.source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn source_name(&self) -> &str {
        "tx_pool"
    }
}
