//! Indexing writer.
//!
//! Turns one decoded transaction into its rows:
//!
//! 1. Every input: signer attribution, spend bookkeeping, redemption row.
//! 2. Every output: address associations, accumulate deltas, output row.
//! 3. The transaction row, carrying the computed fee.
//!
//! The transaction row is written last and each output row is written after
//! its address rows, so the presence of either means everything beneath it
//! has been written in the same storage session.

use crate::config::IndexerConfig;
use crate::core::context::ConsumerCtx;
use crate::core::crypto::{address_of, format_bech32, recover_public_key};
use crate::types::{
    AddressBech32Row, AddressChainRow, AddressRow, BaseTx, Credential, DecodedTx, ExtraInputs,
    ExtraOutputs, Id, OutputAddressAccumulateRow, OutputAddressRow, OutputOwners, OutputRow,
    OutputState, OutputTxsAccumulateRow, OutputType, OutputsRedeemingRow, ShortId,
    TransactionRow, TransactionType, TransferableInput, TransferableOutput,
};
use crate::utils::error::{IndexerError, Result};
use chrono::Utc;
use secp256k1::PublicKey;

/// Raw transaction bytes longer than this are stored empty.
pub const MAX_SERIALIZATION_LEN: usize = 16 * 1024 * 1024 - 1;

/// Memos longer than this are not stored.
pub const MAX_MEMO_LEN: usize = 1024;

/// Fee paid by a transaction: inputs minus outputs minus the fee already
/// accounted for elsewhere, floored at zero.
#[must_use]
pub fn compute_fee(total_in: u128, total_out: u128, extra_fee: u64) -> u128 {
    total_in.saturating_sub(total_out.saturating_add(u128::from(extra_fee)))
}

/// Column values that differ between output variants.
struct OutputColumns<'o> {
    output_type: OutputType,
    amount: u64,
    owners: &'o OutputOwners,
    group_id: u32,
    payload: &'o [u8],
    stake_locktime: u64,
    stakeable_out: bool,
}

/// Writes decoded transactions and outputs of one chain.
#[derive(Debug, Clone)]
pub struct Writer {
    chain_id: String,
    native_asset_id: Id,
    bech32_hrp: String,
    strict_redemptions: bool,
}

impl Writer {
    pub fn new(chain_id: impl Into<String>, native_asset_id: Id) -> Self {
        Self {
            chain_id: chain_id.into(),
            native_asset_id,
            bech32_hrp: "local".to_string(),
            strict_redemptions: false,
        }
    }

    /// Writer for the configured chain.
    #[must_use]
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self::new(config.chain_id.clone(), config.native_asset_id)
            .with_bech32_hrp(config.bech32_hrp.clone())
            .with_strict_redemptions(config.strict_redemptions)
    }

    #[must_use]
    pub fn with_bech32_hrp(mut self, hrp: impl Into<String>) -> Self {
        self.bech32_hrp = hrp.into();
        self
    }

    /// Fail with `InvariantViolation` when an input of this chain spends an
    /// output that was never indexed, instead of only logging it.
    #[must_use]
    pub fn with_strict_redemptions(mut self, strict: bool) -> Self {
        self.strict_redemptions = strict;
        self
    }

    #[must_use]
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Indexes a decoded transaction.
    pub async fn index_tx(&self, ctx: &mut ConsumerCtx<'_>, tx: &DecodedTx) -> Result<()> {
        self.insert_transaction(
            ctx,
            &tx.raw_bytes,
            &tx.unsigned_bytes,
            &tx.base,
            &tx.credentials,
            tx.tx_type,
            tx.extra_ins.as_ref(),
            tx.extra_outs.as_ref(),
            tx.extra_fee,
            tx.genesis,
        )
        .await
    }

    /// Writes every row of one transaction.
    ///
    /// Input positions are numbered across the base inputs and then the extra
    /// inputs. Credentials are aligned with the base inputs only: signers are
    /// never attributed to an extra input, whatever the credential count.
    ///
    /// # Errors
    ///
    /// Propagates the first failing write; the caller discards the session.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_transaction(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        raw_bytes: &[u8],
        unsigned_bytes: &[u8],
        base: &BaseTx,
        credentials: &[Credential],
        tx_type: TransactionType,
        extra_ins: Option<&ExtraInputs>,
        extra_outs: Option<&ExtraOutputs>,
        extra_fee: u64,
        genesis: bool,
    ) -> Result<()> {
        let mut total_in = self
            .insert_transaction_ins(
                ctx,
                0,
                0,
                &base.ins,
                base.id,
                credentials,
                unsigned_bytes,
                &self.chain_id,
            )
            .await?;

        if let Some(extra) = extra_ins {
            let attributable = &credentials[..credentials.len().min(base.ins.len())];
            total_in = self
                .insert_transaction_ins(
                    ctx,
                    base.ins.len(),
                    total_in,
                    &extra.ins,
                    base.id,
                    attributable,
                    unsigned_bytes,
                    &extra.chain_id.to_string(),
                )
                .await?;
        }

        let mut total_out = 0u128;
        for (idx, out) in base.outs.iter().enumerate() {
            total_out = self
                .insert_transaction_outs(
                    ctx,
                    output_index(idx)?,
                    total_out,
                    out,
                    base.id,
                    &self.chain_id,
                    false,
                )
                .await?;
        }

        if let Some(extra) = extra_outs {
            let chain_id = extra.chain_id.to_string();
            for (offset, out) in extra.outs.iter().enumerate() {
                total_out = self
                    .insert_transaction_outs(
                        ctx,
                        output_index(base.outs.len() + offset)?,
                        total_out,
                        out,
                        base.id,
                        &chain_id,
                        extra.stake,
                    )
                    .await?;
            }
        }

        let fee = if genesis {
            0
        } else {
            compute_fee(total_in, total_out, extra_fee)
        };
        let txfee = u64::try_from(fee)
            .map_err(|_| IndexerError::DataError(format!("fee {fee} of tx {} overflows", base.id)))?;

        let row = TransactionRow {
            id: base.id,
            chain_id: self.chain_id.clone(),
            tx_type: tx_type.as_str().to_string(),
            memo: (base.memo.len() <= MAX_MEMO_LEN).then(|| base.memo.clone()),
            canonical_serialization: if raw_bytes.len() > MAX_SERIALIZATION_LEN {
                Vec::new()
            } else {
                raw_bytes.to_vec()
            },
            txfee,
            genesis,
            network_id: base.network_id,
            created_at: ctx.time(),
        };
        let upd = ctx.perform_updates();
        ctx.persist().insert_transaction(&row, upd).await
    }

    /// Records the spends of `ins` and returns `total_in` plus their native amount.
    ///
    /// `start_idx` is the position of `ins[0]` among all inputs of the
    /// transaction; the credential at that position, if any, names the signers.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_transaction_ins(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        start_idx: usize,
        mut total_in: u128,
        ins: &[TransferableInput],
        tx_id: Id,
        credentials: &[Credential],
        unsigned_bytes: &[u8],
        chain_id: &str,
    ) -> Result<u128> {
        for (offset, input) in ins.iter().enumerate() {
            if input.asset_id == self.native_asset_id {
                total_in += u128::from(input.amount);
            }

            let input_id = input.input_id();
            self.check_spent_output(ctx, input, &input_id, chain_id).await?;

            if let Some(Credential::Secp256k1 { signatures }) = credentials.get(start_idx + offset) {
                for signature in signatures {
                    let public_key = recover_public_key(unsigned_bytes, signature)?;
                    self.insert_address_from_public_key(ctx, &public_key).await?;
                    self.insert_output_address(
                        ctx,
                        input_id,
                        address_of(&public_key),
                        Some(signature.as_slice()),
                        input.tx_id,
                        input.output_index,
                        chain_id,
                    )
                    .await?;
                }
            }

            ctx.persist()
                .mark_output_address_accumulate_in_processed(&input_id)
                .await?;

            let row = OutputsRedeemingRow {
                id: input_id,
                redeemed_at: ctx.time(),
                redeeming_transaction_id: tx_id,
                amount: input.amount,
                output_index: input.output_index,
                intx: input.tx_id,
                asset_id: input.asset_id,
                chain_id: chain_id.to_string(),
                created_at: ctx.time(),
            };
            ctx.persist().insert_outputs_redeeming(&row).await?;
        }
        Ok(total_in)
    }

    async fn check_spent_output(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        input: &TransferableInput,
        input_id: &Id,
        chain_id: &str,
    ) -> Result<()> {
        // Only outputs of this chain are expected to be indexed here.
        if chain_id != self.chain_id || ctx.persist().output_exists(input_id).await? {
            return Ok(());
        }
        if self.strict_redemptions {
            return Err(IndexerError::InvariantViolation(format!(
                "output {input_id} ({}:{}) spent before it was indexed",
                input.tx_id, input.output_index
            )));
        }
        tracing::error!(
            output_id = %input_id,
            tx_id = %input.tx_id,
            output_index = input.output_index,
            chain_id,
            "Spending an output that was never indexed"
        );
        Ok(())
    }

    /// Writes one output and returns `total_out` plus its native amount.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_transaction_outs(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        idx: u32,
        total_out: u128,
        out: &TransferableOutput,
        tx_id: Id,
        chain_id: &str,
        stake: bool,
    ) -> Result<u128> {
        let (_, total_out) = self
            .process_state_out(
                ctx,
                &out.out,
                tx_id,
                idx,
                out.asset_id,
                0,
                total_out,
                chain_id,
                stake,
                false,
            )
            .await?;
        Ok(total_out)
    }

    /// Writes an output of any variant.
    ///
    /// Returns `(amount, total_out)`:
    /// - plain transfers add their amount to `amount`, and to `total_out` when
    ///   the asset is native;
    /// - locked transfers add to `total_out` only;
    /// - NFT and mint outputs add nothing.
    ///
    /// # Errors
    ///
    /// `IndexerError::DecodingError` if a locked transfer wraps anything other
    /// than a plain transfer.
    #[allow(clippy::too_many_arguments)]
    pub async fn process_state_out(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        out: &OutputState,
        tx_id: Id,
        idx: u32,
        asset_id: Id,
        mut amount: u128,
        mut total_out: u128,
        chain_id: &str,
        stake: bool,
        genesis_utxo: bool,
    ) -> Result<(u128, u128)> {
        let is_native = asset_id == self.native_asset_id;

        let columns = match out {
            OutputState::Transfer {
                amount: value,
                owners,
            } => {
                if is_native {
                    total_out += u128::from(*value);
                }
                amount += u128::from(*value);
                OutputColumns {
                    output_type: OutputType::Secp256k1Transfer,
                    amount: *value,
                    owners,
                    group_id: 0,
                    payload: &[],
                    stake_locktime: 0,
                    stakeable_out: false,
                }
            }
            OutputState::LockedTransfer { locktime, inner } => {
                let OutputState::Transfer {
                    amount: value,
                    owners,
                } = inner.as_ref()
                else {
                    return Err(IndexerError::DecodingError(format!(
                        "locked output {tx_id}:{idx} must wrap a transfer output"
                    )));
                };
                if is_native {
                    total_out += u128::from(*value);
                }
                OutputColumns {
                    output_type: OutputType::Secp256k1Transfer,
                    amount: *value,
                    owners,
                    group_id: 0,
                    payload: &[],
                    stake_locktime: *locktime,
                    stakeable_out: true,
                }
            }
            OutputState::NftTransfer {
                group_id,
                payload,
                owners,
            } => OutputColumns {
                output_type: OutputType::NftTransfer,
                amount: 0,
                owners,
                group_id: *group_id,
                payload,
                stake_locktime: 0,
                stakeable_out: false,
            },
            OutputState::NftMint { group_id, owners } => OutputColumns {
                output_type: OutputType::NftMint,
                amount: 0,
                owners,
                group_id: *group_id,
                payload: &[],
                stake_locktime: 0,
                stakeable_out: false,
            },
            OutputState::FungibleMint { owners } => OutputColumns {
                output_type: OutputType::Secp256k1Mint,
                amount: 0,
                owners,
                group_id: 0,
                payload: &[],
                stake_locktime: 0,
                stakeable_out: false,
            },
        };

        self.insert_output(
            ctx,
            tx_id,
            idx,
            asset_id,
            &columns,
            chain_id,
            stake,
            false,
            genesis_utxo,
        )
        .await?;
        Ok((amount, total_out))
    }

    /// Writes the address associations of an output, then the output itself.
    #[allow(clippy::too_many_arguments)]
    async fn insert_output(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        tx_id: Id,
        idx: u32,
        asset_id: Id,
        columns: &OutputColumns<'_>,
        chain_id: &str,
        stake: bool,
        frozen: bool,
        genesis_utxo: bool,
    ) -> Result<()> {
        let output_id = tx_id.prefix(u64::from(idx));

        for address in &columns.owners.addresses {
            self.insert_output_address(ctx, output_id, *address, None, tx_id, idx, chain_id)
                .await?;

            let row = OutputTxsAccumulateRow {
                id: OutputTxsAccumulateRow::compute_id(chain_id, &asset_id, address, &tx_id),
                chain_id: chain_id.to_string(),
                asset_id,
                address: *address,
                transaction_id: tx_id,
                created_at: Utc::now(),
            };
            ctx.persist().insert_output_txs_accumulate(&row).await?;
        }

        let row = OutputRow {
            id: output_id,
            chain_id: chain_id.to_string(),
            transaction_id: tx_id,
            output_index: idx,
            asset_id,
            output_type: columns.output_type,
            amount: columns.amount,
            locktime: columns.owners.locktime,
            threshold: columns.owners.threshold,
            group_id: columns.group_id,
            payload: columns.payload.to_vec(),
            stake_locktime: columns.stake_locktime,
            stake,
            frozen,
            stakeable_out: columns.stakeable_out,
            genesis_utxo,
            created_at: ctx.time(),
        };
        let upd = ctx.perform_updates();
        ctx.persist().insert_output(&row, upd).await
    }

    /// Records the public key behind an address. Returns the address.
    pub async fn insert_address_from_public_key(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        public_key: &PublicKey,
    ) -> Result<ShortId> {
        let address = address_of(public_key);
        let row = AddressRow {
            address,
            public_key: public_key.serialize().to_vec(),
            created_at: ctx.time(),
            updated_at: Utc::now(),
        };
        let upd = ctx.perform_updates();
        ctx.persist().insert_address(&row, upd).await?;
        Ok(address)
    }

    /// Associates `address` with `output_id`.
    ///
    /// Writes, in order: the address-chain row, the display row, both
    /// accumulate rows, the output-address row and, when `signature` is
    /// present, the redeeming signature on that row.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_output_address(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        output_id: Id,
        address: ShortId,
        signature: Option<&[u8]>,
        tx_id: Id,
        idx: u32,
        chain_id: &str,
    ) -> Result<()> {
        let upd = ctx.perform_updates();

        let chain_row = AddressChainRow {
            address,
            chain_id: chain_id.to_string(),
            created_at: ctx.time(),
            updated_at: Utc::now(),
        };
        ctx.persist().insert_address_chain(&chain_row, upd).await?;

        let bech32_row = AddressBech32Row {
            address,
            bech32_address: format_bech32(&self.bech32_hrp, &address)?,
            updated_at: Utc::now(),
        };
        ctx.persist().insert_address_bech32(&bech32_row, upd).await?;

        let accumulate = OutputAddressAccumulateRow {
            id: OutputAddressAccumulateRow::compute_id(&output_id, &address),
            output_id,
            address,
            transaction_id: tx_id,
            output_index: idx,
            created_at: Utc::now(),
        };
        ctx.persist()
            .insert_output_address_accumulate_out(&accumulate)
            .await?;
        ctx.persist()
            .insert_output_address_accumulate_in(&accumulate)
            .await?;

        let row = OutputAddressRow {
            output_id,
            address,
            redeeming_signature: signature.map(<[u8]>::to_vec),
            created_at: ctx.time(),
            updated_at: Utc::now(),
        };
        ctx.persist().insert_output_address(&row, upd).await?;

        if signature.is_some() {
            ctx.persist().update_output_address_signature(&row).await?;
        }
        Ok(())
    }
}

fn output_index(idx: usize) -> Result<u32> {
    u32::try_from(idx)
        .map_err(|_| IndexerError::DecodingError(format!("output index {idx} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_is_floored_at_zero() {
        assert_eq!(compute_fee(100, 90, 0), 10);
        assert_eq!(compute_fee(100, 90, 10), 0);
        assert_eq!(compute_fee(100, 90, 20), 0);
        assert_eq!(compute_fee(0, 0, 0), 0);
    }

    #[test]
    fn test_fee_handles_extreme_totals() {
        let big = u128::from(u64::MAX) * 4;
        assert_eq!(compute_fee(big, 0, u64::MAX), big - u128::from(u64::MAX));
        assert_eq!(compute_fee(0, u128::MAX, u64::MAX), 0);
    }
}
