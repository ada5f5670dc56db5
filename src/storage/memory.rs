//! In-process storage backend.
//!
//! Sessions stage their writes and apply them under a single lock on commit,
//! so a session that fails halfway leaves no trace. Conflict handling mirrors
//! the Postgres backend row for row.

use crate::storage::{Persist, StorageBackend};
use crate::types::{
    AddressBech32Row, AddressChainRow, AddressRow, BlockType, Id, OutputAddressAccumulateRow,
    OutputAddressRow, OutputRow, OutputTxsAccumulateRow, OutputsRedeemingRow, PendingReward,
    ShortId, TransactionRow, TxLogRow, TxTraceRow,
};
use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard};

/// `_in` accumulate row plus its spent flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulateInEntry {
    pub row: OutputAddressAccumulateRow,
    pub output_processed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardEntry {
    pub block_id: String,
    pub tx_id: Id,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub parent_id: String,
    pub block_type: BlockType,
}

/// Snapshot of every table.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub transactions: BTreeMap<Id, TransactionRow>,
    pub outputs: BTreeMap<Id, OutputRow>,
    pub outputs_redeeming: BTreeMap<Id, OutputsRedeemingRow>,
    pub addresses: BTreeMap<ShortId, AddressRow>,
    pub address_chain: BTreeMap<(ShortId, String), AddressChainRow>,
    pub addresses_bech32: BTreeMap<ShortId, AddressBech32Row>,
    pub output_addresses: BTreeMap<(Id, ShortId), OutputAddressRow>,
    pub accumulate_out: BTreeMap<Id, OutputAddressAccumulateRow>,
    pub accumulate_in: BTreeMap<Id, AccumulateInEntry>,
    pub output_txs_accumulate: BTreeMap<Id, OutputTxsAccumulateRow>,
    pub tx_traces: BTreeMap<Id, TxTraceRow>,
    pub tx_logs: BTreeMap<Id, TxLogRow>,
    pub rewards: BTreeMap<String, RewardEntry>,
    pub blocks: BTreeMap<String, BlockEntry>,
    /// Table names in the order committed writes were applied.
    pub write_log: Vec<&'static str>,
}

fn upsert<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V, upd: bool) {
    match map.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
        Entry::Occupied(mut slot) => {
            if upd {
                slot.insert(value);
            }
        }
    }
}

/// Keeps the original creation time when overwriting a row.
fn upsert_keep_created<K: Ord, V: Clone>(
    map: &mut BTreeMap<K, V>,
    key: K,
    value: V,
    upd: bool,
    carry: impl FnOnce(&V, &mut V),
) {
    match map.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
        Entry::Occupied(mut slot) => {
            if upd {
                let mut next = value;
                carry(slot.get(), &mut next);
                slot.insert(next);
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Transaction(TransactionRow, bool),
    Output(OutputRow, bool),
    Redeeming(OutputsRedeemingRow),
    Address(AddressRow, bool),
    AddressChain(AddressChainRow, bool),
    AddressBech32(AddressBech32Row, bool),
    OutputAddress(OutputAddressRow, bool),
    OutputAddressSignature(OutputAddressRow),
    AccumulateOut(OutputAddressAccumulateRow),
    AccumulateIn(OutputAddressAccumulateRow),
    AccumulateInProcessed(Id),
    OutputTxsAccumulate(OutputTxsAccumulateRow),
    Trace(TxTraceRow, bool),
    Log(TxLogRow, bool),
}

impl Op {
    fn table(&self) -> &'static str {
        match self {
            Op::Transaction(..) => "transactions",
            Op::Output(..) => "outputs",
            Op::Redeeming(..) => "outputs_redeeming",
            Op::Address(..) => "addresses",
            Op::AddressChain(..) => "address_chain",
            Op::AddressBech32(..) => "addresses_bech32",
            Op::OutputAddress(..) | Op::OutputAddressSignature(..) => "output_addresses",
            Op::AccumulateOut(..) => "output_addresses_accumulate_out",
            Op::AccumulateIn(..) | Op::AccumulateInProcessed(..) => {
                "output_addresses_accumulate_in"
            }
            Op::OutputTxsAccumulate(..) => "output_txs_accumulate",
            Op::Trace(..) => "tx_traces",
            Op::Log(..) => "tx_logs",
        }
    }

    fn apply(self, tables: &mut Tables) {
        tables.write_log.push(self.table());
        match self {
            Op::Transaction(row, upd) => {
                upsert_keep_created(&mut tables.transactions, row.id, row, upd, |old, new| {
                    new.created_at = old.created_at;
                });
            }
            Op::Output(row, upd) => {
                upsert_keep_created(&mut tables.outputs, row.id, row, upd, |old, new| {
                    new.created_at = old.created_at;
                });
            }
            Op::Redeeming(row) => upsert(&mut tables.outputs_redeeming, row.id, row, false),
            Op::Address(row, upd) => {
                upsert_keep_created(&mut tables.addresses, row.address, row, upd, |old, new| {
                    new.created_at = old.created_at;
                });
            }
            Op::AddressChain(row, upd) => {
                let key = (row.address, row.chain_id.clone());
                upsert_keep_created(&mut tables.address_chain, key, row, upd, |old, new| {
                    new.created_at = old.created_at;
                });
            }
            Op::AddressBech32(row, upd) => {
                upsert(&mut tables.addresses_bech32, row.address, row, upd);
            }
            Op::OutputAddress(row, upd) => {
                let key = (row.output_id, row.address);
                upsert_keep_created(&mut tables.output_addresses, key, row, upd, |old, new| {
                    new.created_at = old.created_at;
                    if new.redeeming_signature.is_none() {
                        new.redeeming_signature.clone_from(&old.redeeming_signature);
                    }
                });
            }
            Op::OutputAddressSignature(row) => {
                if let Some(existing) = tables.output_addresses.get_mut(&(row.output_id, row.address))
                {
                    existing.redeeming_signature = row.redeeming_signature;
                    existing.updated_at = row.updated_at;
                }
            }
            Op::AccumulateOut(row) => upsert(&mut tables.accumulate_out, row.id, row, false),
            Op::AccumulateIn(row) => {
                let entry = AccumulateInEntry {
                    row,
                    output_processed: false,
                };
                upsert(&mut tables.accumulate_in, entry.row.id, entry, false);
            }
            Op::AccumulateInProcessed(output_id) => {
                for entry in tables.accumulate_in.values_mut() {
                    if entry.row.output_id == output_id {
                        entry.output_processed = true;
                    }
                }
            }
            Op::OutputTxsAccumulate(row) => {
                upsert(&mut tables.output_txs_accumulate, row.id, row, false);
            }
            Op::Trace(row, upd) => upsert(&mut tables.tx_traces, row.id, row, upd),
            Op::Log(row, upd) => upsert(&mut tables.tx_logs, row.id, row, upd),
        }
    }
}

/// In-memory [`StorageBackend`].
///
/// Cloning shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        lock_tables(&self.tables)
    }

    /// Copy of the current committed state.
    pub fn snapshot(&self) -> Result<Tables> {
        Ok(self.lock()?.clone())
    }

    /// Records a platform block, as the platform indexer would.
    pub fn insert_block(
        &self,
        id: impl Into<String>,
        parent_id: impl Into<String>,
        block_type: BlockType,
    ) -> Result<()> {
        self.lock()?.blocks.insert(
            id.into(),
            BlockEntry {
                parent_id: parent_id.into(),
                block_type,
            },
        );
        Ok(())
    }

    /// Records a reward decided by the child of `block_id`.
    pub fn insert_reward(
        &self,
        id: impl Into<String>,
        block_id: impl Into<String>,
        tx_id: Id,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.lock()?.rewards.insert(
            id.into(),
            RewardEntry {
                block_id: block_id.into(),
                tx_id,
                processed: false,
                created_at,
            },
        );
        Ok(())
    }
}

fn lock_tables(tables: &Mutex<Tables>) -> Result<MutexGuard<'_, Tables>> {
    tables
        .lock()
        .map_err(|_| IndexerError::InternalError("memory storage lock poisoned".to_string()))
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Persist>> {
        Ok(Box::new(MemorySession {
            tables: Arc::clone(&self.tables),
            ops: Vec::new(),
        }))
    }

    async fn pending_rewards(&self, created_before: DateTime<Utc>) -> Result<Vec<PendingReward>> {
        let tables = self.lock()?;
        let mut pending: Vec<PendingReward> = tables
            .rewards
            .iter()
            .filter(|(_, reward)| !reward.processed && reward.created_at < created_before)
            .flat_map(|(id, reward)| {
                tables
                    .blocks
                    .values()
                    .filter(|block| block.parent_id == reward.block_id)
                    .map(|block| PendingReward {
                        id: id.clone(),
                        tx_id: reward.tx_id,
                        block_type: block.block_type,
                        created_at: reward.created_at,
                    })
            })
            .collect();
        pending.sort_by_key(|reward| reward.created_at);
        Ok(pending)
    }

    async fn mark_reward_processed(&self, id: &str) -> Result<()> {
        if let Some(reward) = self.lock()?.rewards.get_mut(id) {
            reward.processed = true;
        }
        Ok(())
    }
}

struct MemorySession {
    tables: Arc<Mutex<Tables>>,
    ops: Vec<Op>,
}

impl MemorySession {
    fn stage(&mut self, op: Op) -> Result<()> {
        self.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl Persist for MemorySession {
    async fn insert_transaction(&mut self, row: &TransactionRow, upd: bool) -> Result<()> {
        self.stage(Op::Transaction(row.clone(), upd))
    }

    async fn insert_output(&mut self, row: &OutputRow, upd: bool) -> Result<()> {
        self.stage(Op::Output(row.clone(), upd))
    }

    async fn insert_outputs_redeeming(&mut self, row: &OutputsRedeemingRow) -> Result<()> {
        self.stage(Op::Redeeming(row.clone()))
    }

    async fn insert_address(&mut self, row: &AddressRow, upd: bool) -> Result<()> {
        self.stage(Op::Address(row.clone(), upd))
    }

    async fn insert_address_chain(&mut self, row: &AddressChainRow, upd: bool) -> Result<()> {
        self.stage(Op::AddressChain(row.clone(), upd))
    }

    async fn insert_address_bech32(&mut self, row: &AddressBech32Row, upd: bool) -> Result<()> {
        self.stage(Op::AddressBech32(row.clone(), upd))
    }

    async fn insert_output_address(&mut self, row: &OutputAddressRow, upd: bool) -> Result<()> {
        self.stage(Op::OutputAddress(row.clone(), upd))
    }

    async fn update_output_address_signature(&mut self, row: &OutputAddressRow) -> Result<()> {
        self.stage(Op::OutputAddressSignature(row.clone()))
    }

    async fn insert_output_address_accumulate_out(
        &mut self,
        row: &OutputAddressAccumulateRow,
    ) -> Result<()> {
        self.stage(Op::AccumulateOut(row.clone()))
    }

    async fn insert_output_address_accumulate_in(
        &mut self,
        row: &OutputAddressAccumulateRow,
    ) -> Result<()> {
        self.stage(Op::AccumulateIn(row.clone()))
    }

    async fn mark_output_address_accumulate_in_processed(&mut self, output_id: &Id) -> Result<()> {
        self.stage(Op::AccumulateInProcessed(*output_id))
    }

    async fn insert_output_txs_accumulate(&mut self, row: &OutputTxsAccumulateRow) -> Result<()> {
        self.stage(Op::OutputTxsAccumulate(row.clone()))
    }

    async fn insert_tx_trace(&mut self, row: &TxTraceRow, upd: bool) -> Result<()> {
        self.stage(Op::Trace(row.clone(), upd))
    }

    async fn insert_tx_log(&mut self, row: &TxLogRow, upd: bool) -> Result<()> {
        self.stage(Op::Log(row.clone(), upd))
    }

    async fn output_exists(&mut self, id: &Id) -> Result<bool> {
        let staged = self
            .ops
            .iter()
            .any(|op| matches!(op, Op::Output(row, _) if row.id == *id));
        Ok(staged || lock_tables(&self.tables)?.outputs.contains_key(id))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemorySession { tables, ops } = *self;
        let mut tables = lock_tables(&tables)?;
        for op in ops {
            op.apply(&mut tables);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trace(id: u8, hash: &str) -> TxTraceRow {
        TxTraceRow {
            id: Id::new([id; 32]),
            hash: hash.to_string(),
            idx: 0,
            trace: vec![id],
            created_at: Utc.timestamp_opt(1_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_session_leaves_no_rows() {
        let storage = MemoryStorage::new();
        let mut session = storage.begin().await.unwrap();
        session.insert_tx_trace(&trace(1, "a"), false).await.unwrap();
        drop(session);

        assert!(storage.snapshot().unwrap().tx_traces.is_empty());
    }

    #[tokio::test]
    async fn test_upd_flag_controls_overwrite() {
        let storage = MemoryStorage::new();

        let mut session = storage.begin().await.unwrap();
        session.insert_tx_trace(&trace(1, "first"), false).await.unwrap();
        session.commit().await.unwrap();

        let mut session = storage.begin().await.unwrap();
        session.insert_tx_trace(&trace(1, "ignored"), false).await.unwrap();
        session.commit().await.unwrap();
        let id = Id::new([1; 32]);
        assert_eq!(storage.snapshot().unwrap().tx_traces[&id].hash, "first");

        let mut session = storage.begin().await.unwrap();
        session.insert_tx_trace(&trace(1, "updated"), true).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(storage.snapshot().unwrap().tx_traces[&id].hash, "updated");
    }

    #[tokio::test]
    async fn test_pending_rewards_joins_child_block() {
        let storage = MemoryStorage::new();
        let t0 = Utc.timestamp_opt(1_000, 0).unwrap();
        storage.insert_block("commit-1", "proposal-1", BlockType::Commit).unwrap();
        storage
            .insert_reward("r1", "proposal-1", Id::new([9; 32]), t0)
            .unwrap();
        storage
            .insert_reward("orphan", "proposal-x", Id::new([8; 32]), t0)
            .unwrap();

        let pending = storage.pending_rewards(t0).await.unwrap();
        assert!(pending.is_empty(), "cutoff is exclusive");

        let later = Utc.timestamp_opt(1_010, 0).unwrap();
        let pending = storage.pending_rewards(later).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "r1");
        assert_eq!(pending[0].block_type, BlockType::Commit);

        storage.mark_reward_processed("r1").await.unwrap();
        assert!(storage.pending_rewards(later).await.unwrap().is_empty());
    }
}
