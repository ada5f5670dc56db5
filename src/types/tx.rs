//! Decoded transaction shapes handed to the writer.
//!
//! These are the in-memory forms produced by a [`crate::PayloadDecoder`]; the
//! binary codec that produces them from wire bytes lives outside this crate.

use crate::types::ids::{Id, ShortId};
use serde::{Deserialize, Serialize};

/// Kind of transaction, persisted as its snake-case tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Base,
    CreateAsset,
    Operation,
    Import,
    Export,
    AddValidator,
    AddAllychainValidator,
    AddNominator,
    CreateChain,
    CreateAllychain,
    PvmImport,
    PvmExport,
    AdvanceTime,
    RewardValidator,
}

impl TransactionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Base => "base",
            TransactionType::CreateAsset => "create_asset",
            TransactionType::Operation => "operation",
            TransactionType::Import => "import",
            TransactionType::Export => "export",
            TransactionType::AddValidator => "add_validator",
            TransactionType::AddAllychainValidator => "add_allychain_validator",
            TransactionType::AddNominator => "add_nominator",
            TransactionType::CreateChain => "create_chain",
            TransactionType::CreateAllychain => "create_allychain",
            TransactionType::PvmImport => "pvm_import",
            TransactionType::PvmExport => "pvm_export",
            TransactionType::AdvanceTime => "advance_time",
            TransactionType::RewardValidator => "reward_validator",
        }
    }
}

/// Spending conditions shared by every output variant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputOwners {
    #[serde(default)]
    pub locktime: u64,
    #[serde(default)]
    pub threshold: u32,
    #[serde(default)]
    pub addresses: Vec<ShortId>,
}

/// The closed set of output variants the writer understands.
///
/// Deserializing any other `type` tag fails, so unknown variants surface as
/// decode errors before reaching storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputState {
    /// Spendable amount owned by `owners`.
    Transfer { amount: u64, owners: OutputOwners },
    /// Stake-locked wrapper; `inner` must be a [`OutputState::Transfer`].
    LockedTransfer {
        locktime: u64,
        inner: Box<OutputState>,
    },
    /// Transfer of a non-fungible unit.
    NftTransfer {
        group_id: u32,
        #[serde(default)]
        payload: Vec<u8>,
        owners: OutputOwners,
    },
    /// Authority to mint units of a non-fungible group.
    NftMint { group_id: u32, owners: OutputOwners },
    /// Authority to mint a fungible asset.
    FungibleMint { owners: OutputOwners },
}

/// A reference to a prior output being spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableInput {
    pub tx_id: Id,
    pub output_index: u32,
    pub asset_id: Id,
    pub amount: u64,
}

impl TransferableInput {
    /// Identity of the spent output, which is also the redemption identity.
    #[must_use]
    pub fn input_id(&self) -> Id {
        self.tx_id.prefix(u64::from(self.output_index))
    }
}

/// An output together with the asset it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableOutput {
    pub asset_id: Id,
    pub out: OutputState,
}

/// Standalone output returned by the node, e.g. a staking reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_id: Id,
    pub output_index: u32,
    pub asset_id: Id,
    pub out: OutputState,
}

/// Witness material attached to a transaction, positionally aligned with its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// One 65-byte recoverable signature per signer.
    Secp256k1 { signatures: Vec<Vec<u8>> },
    /// A credential kind the writer does not attribute signers for.
    Other,
}

/// Fields common to every transaction type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseTx {
    pub id: Id,
    pub network_id: u32,
    #[serde(default)]
    pub memo: Vec<u8>,
    #[serde(default)]
    pub ins: Vec<TransferableInput>,
    #[serde(default)]
    pub outs: Vec<TransferableOutput>,
}

/// Inputs consumed from another chain (imports).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraInputs {
    pub chain_id: Id,
    pub ins: Vec<TransferableInput>,
}

/// Outputs produced onto another chain (exports) or locked as stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraOutputs {
    pub chain_id: Id,
    pub outs: Vec<TransferableOutput>,
    #[serde(default)]
    pub stake: bool,
}

/// A fully decoded transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTx {
    pub tx_type: TransactionType,
    pub base: BaseTx,
    #[serde(default)]
    pub unsigned_bytes: Vec<u8>,
    #[serde(default)]
    pub raw_bytes: Vec<u8>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
    #[serde(default)]
    pub extra_ins: Option<ExtraInputs>,
    #[serde(default)]
    pub extra_outs: Option<ExtraOutputs>,
    #[serde(default)]
    pub extra_fee: u64,
    #[serde(default)]
    pub genesis: bool,
}
