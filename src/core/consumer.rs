//! Payload persistence.

use crate::core::context::ConsumerCtx;
use crate::core::writer::Writer;
use crate::types::{BlockPayload, Id, LogPayload, TracePayload, TxLogRow, TxTraceRow};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Persists decoded payloads through a write context.
///
/// Implementations must be safe to run again for the same payload: the
/// dispatcher replays a payload after a contended attempt was rolled back,
/// and streams may redeliver.
#[async_trait]
pub trait ChainConsumer: Send + Sync {
    async fn consume_block(&self, ctx: &mut ConsumerCtx<'_>, block: &BlockPayload) -> Result<()>;

    async fn consume_trace(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        content_id: Id,
        trace: &TracePayload,
    ) -> Result<()>;

    async fn consume_logs(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        content_id: Id,
        log: &LogPayload,
    ) -> Result<()>;
}

/// Consumer for chains whose blocks carry UTXO transactions.
#[derive(Debug, Clone)]
pub struct AtomicTxConsumer {
    writer: Writer,
}

impl AtomicTxConsumer {
    #[must_use]
    pub fn new(writer: Writer) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl ChainConsumer for AtomicTxConsumer {
    async fn consume_block(&self, ctx: &mut ConsumerCtx<'_>, block: &BlockPayload) -> Result<()> {
        for tx in &block.txs {
            self.writer.index_tx(ctx, tx).await?;
        }
        Ok(())
    }

    async fn consume_trace(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        content_id: Id,
        trace: &TracePayload,
    ) -> Result<()> {
        let row = TxTraceRow {
            id: content_id,
            hash: trace.hash.clone(),
            idx: trace.idx,
            trace: trace.trace.clone(),
            created_at: ctx.time(),
        };
        let upd = ctx.perform_updates();
        ctx.persist().insert_tx_trace(&row, upd).await
    }

    async fn consume_logs(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        content_id: Id,
        log: &LogPayload,
    ) -> Result<()> {
        let row = TxLogRow {
            id: content_id,
            block_hash: log.block_hash.clone(),
            tx_hash: log.tx_hash.clone(),
            log_index: log.log_index,
            address: log.address.clone(),
            topics: log.topics.clone(),
            data: log.data.clone(),
            removed: log.removed,
            created_at: ctx.time(),
        };
        let upd = ctx.perform_updates();
        ctx.persist().insert_tx_log(&row, upd).await
    }
}
