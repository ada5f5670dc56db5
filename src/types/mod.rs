//! Domain types: identifiers, decoded transactions, stored rows and stream messages.

pub mod ids;
pub mod message;
pub mod models;
pub mod tx;

pub use ids::{Id, ShortId};
pub use message::{
    BlockPayload, LogPayload, Message, PayloadKind, SourceMessage, Topics, TracePayload,
};
pub use models::{
    AddressBech32Row, AddressChainRow, AddressRow, BlockType, OutputAddressAccumulateRow,
    OutputAddressRow, OutputRow, OutputTxsAccumulateRow, OutputType, OutputsRedeemingRow,
    PendingReward, TransactionRow, TxLogRow, TxTraceRow,
};
pub use tx::{
    BaseTx, Credential, DecodedTx, ExtraInputs, ExtraOutputs, OutputOwners, OutputState,
    TransactionType, TransferableInput, TransferableOutput, Utxo,
};
