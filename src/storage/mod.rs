//! Storage interfaces and backends.
//!
//! A [`StorageBackend`] hands out [`Persist`] sessions. A session wraps one
//! store transaction: every write made through it becomes visible together on
//! [`Persist::commit`], and dropping an uncommitted session discards them.
//!
//! Two backends ship with the crate:
//! - [`PgStorage`]: PostgreSQL through `sqlx`.
//! - [`MemoryStorage`]: ordered in-process tables, for tests and dry runs.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStorage, Tables};
pub use postgres::PgStorage;

use crate::types::{
    AddressBech32Row, AddressChainRow, AddressRow, Id, OutputAddressAccumulateRow,
    OutputAddressRow, OutputRow, OutputTxsAccumulateRow, OutputsRedeemingRow, PendingReward,
    TransactionRow, TxLogRow, TxTraceRow,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Table-scoped writes inside one store transaction.
///
/// `upd` selects the conflict policy for rows keyed by a natural identity:
/// `false` leaves an existing row untouched, `true` overwrites its mutable
/// columns. Rows whose identity is a hash of their content are always
/// insert-if-absent.
#[async_trait]
pub trait Persist: Send {
    async fn insert_transaction(&mut self, row: &TransactionRow, upd: bool) -> Result<()>;

    async fn insert_output(&mut self, row: &OutputRow, upd: bool) -> Result<()>;

    /// Records a spend. Write-once: a second spend of the same output id is ignored.
    async fn insert_outputs_redeeming(&mut self, row: &OutputsRedeemingRow) -> Result<()>;

    async fn insert_address(&mut self, row: &AddressRow, upd: bool) -> Result<()>;

    async fn insert_address_chain(&mut self, row: &AddressChainRow, upd: bool) -> Result<()>;

    async fn insert_address_bech32(&mut self, row: &AddressBech32Row, upd: bool) -> Result<()>;

    /// Inserts an (output, address) association. Under `upd` an existing
    /// signature is kept when `row` carries none.
    async fn insert_output_address(&mut self, row: &OutputAddressRow, upd: bool) -> Result<()>;

    /// Sets the redeeming signature on an existing (output, address) association.
    async fn update_output_address_signature(&mut self, row: &OutputAddressRow) -> Result<()>;

    async fn insert_output_address_accumulate_out(
        &mut self,
        row: &OutputAddressAccumulateRow,
    ) -> Result<()>;

    async fn insert_output_address_accumulate_in(
        &mut self,
        row: &OutputAddressAccumulateRow,
    ) -> Result<()>;

    /// Flags every `_in` accumulate row of `output_id` as spent.
    async fn mark_output_address_accumulate_in_processed(&mut self, output_id: &Id) -> Result<()>;

    async fn insert_output_txs_accumulate(&mut self, row: &OutputTxsAccumulateRow) -> Result<()>;

    async fn insert_tx_trace(&mut self, row: &TxTraceRow, upd: bool) -> Result<()>;

    async fn insert_tx_log(&mut self, row: &TxLogRow, upd: bool) -> Result<()>;

    /// Whether an Output row with `id` is visible to this session.
    async fn output_exists(&mut self, id: &Id) -> Result<bool>;

    /// Makes every write of this session visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Abstract interface for storage operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Creates the schema if it does not exist yet.
    async fn initialize(&self) -> Result<()>;

    /// Opens a write session.
    async fn begin(&self) -> Result<Box<dyn Persist>>;

    /// Unprocessed rewards created strictly before `created_before`, oldest
    /// first, each joined with the type of the block that decided it.
    async fn pending_rewards(&self, created_before: DateTime<Utc>) -> Result<Vec<PendingReward>>;

    async fn mark_reward_processed(&self, id: &str) -> Result<()>;
}
