//! Rows written by the indexer, one struct per table.

use crate::types::ids::{Id, ShortId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted output type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Secp256k1Mint,
    Secp256k1Transfer,
    NftMint,
    NftTransfer,
}

impl OutputType {
    /// Numeric tag stored in `outputs.output_type`.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            OutputType::Secp256k1Mint => 6,
            OutputType::Secp256k1Transfer => 7,
            OutputType::NftMint => 10,
            OutputType::NftTransfer => 11,
        }
    }
}

/// Platform block kind, as stored in `pvm_blocks.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Proposal,
    Abort,
    Commit,
    Standard,
    Atomic,
}

impl BlockType {
    #[must_use]
    pub fn code(&self) -> i16 {
        match self {
            BlockType::Proposal => 0,
            BlockType::Abort => 1,
            BlockType::Commit => 2,
            BlockType::Standard => 3,
            BlockType::Atomic => 4,
        }
    }

    #[must_use]
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(BlockType::Proposal),
            1 => Some(BlockType::Abort),
            2 => Some(BlockType::Commit),
            3 => Some(BlockType::Standard),
            4 => Some(BlockType::Atomic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    pub id: Id,
    pub chain_id: String,
    pub tx_type: String,
    /// `None` when the memo exceeded the stored limit.
    pub memo: Option<Vec<u8>>,
    /// Empty when the serialization exceeded the stored limit.
    pub canonical_serialization: Vec<u8>,
    pub txfee: u64,
    pub genesis: bool,
    pub network_id: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub id: Id,
    pub chain_id: String,
    pub transaction_id: Id,
    pub output_index: u32,
    pub asset_id: Id,
    pub output_type: OutputType,
    pub amount: u64,
    pub locktime: u64,
    pub threshold: u32,
    pub group_id: u32,
    pub payload: Vec<u8>,
    pub stake_locktime: u64,
    pub stake: bool,
    pub frozen: bool,
    pub stakeable_out: bool,
    pub genesis_utxo: bool,
    pub created_at: DateTime<Utc>,
}

/// Spend of an output. `id` equals the spent output's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputsRedeemingRow {
    pub id: Id,
    pub redeemed_at: DateTime<Utc>,
    pub redeeming_transaction_id: Id,
    pub amount: u64,
    pub output_index: u32,
    pub intx: Id,
    pub asset_id: Id,
    pub chain_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRow {
    pub address: ShortId,
    pub public_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressChainRow {
    pub address: ShortId,
    pub chain_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBech32Row {
    pub address: ShortId,
    pub bech32_address: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAddressRow {
    pub output_id: Id,
    pub address: ShortId,
    pub redeeming_signature: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per (output, address) pair feeding the balance aggregator. Written to both
/// the `_out` and `_in` accumulate tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAddressAccumulateRow {
    pub id: Id,
    pub output_id: Id,
    pub address: ShortId,
    pub transaction_id: Id,
    pub output_index: u32,
    pub created_at: DateTime<Utc>,
}

impl OutputAddressAccumulateRow {
    /// Identity: SHA-256 of `"{output_id}:{address}"`.
    #[must_use]
    pub fn compute_id(output_id: &Id, address: &ShortId) -> Id {
        Id::hash_of(format!("{output_id}:{address}").as_bytes())
    }
}

/// Per (chain, asset, address, transaction) tuple feeding transaction counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTxsAccumulateRow {
    pub id: Id,
    pub chain_id: String,
    pub asset_id: Id,
    pub address: ShortId,
    pub transaction_id: Id,
    pub created_at: DateTime<Utc>,
}

impl OutputTxsAccumulateRow {
    /// Identity: SHA-256 of `"{chain_id}:{asset_id}:{address}:{transaction_id}"`.
    #[must_use]
    pub fn compute_id(chain_id: &str, asset_id: &Id, address: &ShortId, transaction_id: &Id) -> Id {
        Id::hash_of(format!("{chain_id}:{asset_id}:{address}:{transaction_id}").as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxTraceRow {
    pub id: Id,
    pub hash: String,
    pub idx: u32,
    pub trace: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxLogRow {
    pub id: Id,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u32,
    pub address: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
    pub removed: bool,
    pub created_at: DateTime<Utc>,
}

/// A reward awaiting payout, joined with the type of the block that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReward {
    pub id: String,
    pub tx_id: Id,
    pub block_type: BlockType,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_type_codes() {
        assert_eq!(OutputType::Secp256k1Mint.code(), 6);
        assert_eq!(OutputType::Secp256k1Transfer.code(), 7);
        assert_eq!(OutputType::NftMint.code(), 10);
        assert_eq!(OutputType::NftTransfer.code(), 11);
    }

    #[test]
    fn test_accumulate_ids_depend_on_every_component() {
        let out = Id::hash_of(b"out");
        let addr = ShortId::new([3u8; 20]);
        let other = ShortId::new([4u8; 20]);
        assert_ne!(
            OutputAddressAccumulateRow::compute_id(&out, &addr),
            OutputAddressAccumulateRow::compute_id(&out, &other)
        );

        let asset = Id::hash_of(b"asset");
        let tx = Id::hash_of(b"tx");
        assert_ne!(
            OutputTxsAccumulateRow::compute_id("chain-a", &asset, &addr, &tx),
            OutputTxsAccumulateRow::compute_id("chain-b", &asset, &addr, &tx)
        );
    }
}
