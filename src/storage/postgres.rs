//! PostgreSQL storage backend.

use crate::storage::{Persist, StorageBackend};
use crate::types::{
    AddressBech32Row, AddressChainRow, AddressRow, BlockType, Id, OutputAddressAccumulateRow,
    OutputAddressRow, OutputRow, OutputTxsAccumulateRow, OutputsRedeemingRow, PendingReward,
    TransactionRow, TxLogRow, TxTraceRow,
};
use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        chain_id TEXT NOT NULL,
        type TEXT NOT NULL,
        memo BYTEA,
        canonical_serialization BYTEA NOT NULL,
        txfee NUMERIC(20, 0) NOT NULL,
        genesis BOOLEAN NOT NULL,
        network_id BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS outputs (
        id TEXT PRIMARY KEY,
        chain_id TEXT NOT NULL,
        transaction_id TEXT NOT NULL,
        output_index BIGINT NOT NULL,
        asset_id TEXT NOT NULL,
        output_type INTEGER NOT NULL,
        amount NUMERIC(20, 0) NOT NULL,
        locktime NUMERIC(20, 0) NOT NULL,
        threshold BIGINT NOT NULL,
        group_id BIGINT NOT NULL,
        payload BYTEA,
        stake_locktime NUMERIC(20, 0) NOT NULL,
        stake BOOLEAN NOT NULL,
        frozen BOOLEAN NOT NULL,
        stakeableout BOOLEAN NOT NULL,
        genesisutxo BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS outputs_redeeming (
        id TEXT PRIMARY KEY,
        redeemed_at TIMESTAMPTZ NOT NULL,
        redeeming_transaction_id TEXT NOT NULL,
        amount NUMERIC(20, 0) NOT NULL,
        output_index BIGINT NOT NULL,
        intx TEXT NOT NULL,
        asset_id TEXT NOT NULL,
        chain_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS addresses (
        address TEXT PRIMARY KEY,
        public_key BYTEA NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS address_chain (
        address TEXT NOT NULL,
        chain_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (address, chain_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS addresses_bech32 (
        address TEXT PRIMARY KEY,
        bech32_address TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS output_addresses (
        output_id TEXT NOT NULL,
        address TEXT NOT NULL,
        redeeming_signature BYTEA,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (output_id, address)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS output_addresses_accumulate_out (
        id TEXT PRIMARY KEY,
        output_id TEXT NOT NULL,
        address TEXT NOT NULL,
        transaction_id TEXT NOT NULL,
        output_index BIGINT NOT NULL,
        processed SMALLINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS output_addresses_accumulate_in (
        id TEXT PRIMARY KEY,
        output_id TEXT NOT NULL,
        address TEXT NOT NULL,
        transaction_id TEXT NOT NULL,
        output_index BIGINT NOT NULL,
        processed SMALLINT NOT NULL DEFAULT 0,
        output_processed SMALLINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_accumulate_in_output
    ON output_addresses_accumulate_in(output_id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS output_txs_accumulate (
        id TEXT PRIMARY KEY,
        chain_id TEXT NOT NULL,
        asset_id TEXT NOT NULL,
        address TEXT NOT NULL,
        transaction_id TEXT NOT NULL,
        processed SMALLINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS tx_traces (
        id TEXT PRIMARY KEY,
        hash TEXT NOT NULL,
        idx BIGINT NOT NULL,
        trace BYTEA NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS tx_logs (
        id TEXT PRIMARY KEY,
        block_hash TEXT NOT NULL,
        tx_hash TEXT NOT NULL,
        log_index BIGINT NOT NULL,
        address TEXT NOT NULL,
        topics TEXT[] NOT NULL,
        data BYTEA NOT NULL,
        removed BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS pvm_blocks (
        id TEXT PRIMARY KEY,
        chain_id TEXT NOT NULL,
        type SMALLINT NOT NULL,
        parent_id TEXT NOT NULL,
        serialization BYTEA,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_pvm_blocks_parent ON pvm_blocks(parent_id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS rewards (
        id TEXT PRIMARY KEY,
        block_id TEXT NOT NULL,
        txid TEXT NOT NULL,
        processed SMALLINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS tx_pool (
        id TEXT PRIMARY KEY,
        network_id BIGINT NOT NULL,
        chain_id TEXT NOT NULL,
        msg_key TEXT NOT NULL,
        serialization BYTEA NOT NULL,
        processed SMALLINT NOT NULL DEFAULT 0,
        topic TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_tx_pool_pending ON tx_pool(processed, created_at)
    ",
];

/// Amounts and locktimes span the full `u64` range, wider than `BIGINT`.
fn to_numeric(value: u64) -> Decimal {
    Decimal::from(value)
}

fn conflict_clause(upd: bool, target: &str, updates: &str) -> String {
    if upd {
        format!("ON CONFLICT ({target}) DO UPDATE SET {updates}")
    } else {
        format!("ON CONFLICT ({target}) DO NOTHING")
    }
}

/// PostgreSQL-backed [`StorageBackend`].
///
/// # Example
///
/// ```no_run
/// use utxo_indexer::PgStorage;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = PgStorage::new("postgresql://localhost/explorer", Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
pub struct PgStorage {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStorage {
    /// Connects a pool to `database_url`.
    ///
    /// `lock_timeout` bounds how long a session waits on a row lock before
    /// Postgres reports it as contention.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if connection fails.
    pub async fn new(database_url: &str, lock_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self::from_pool(pool, lock_timeout))
    }

    #[must_use]
    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for PgStorage {
    async fn initialize(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Persist>> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters; the value is a formatted integer.
        let set_lock_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_lock_timeout).execute(&mut *tx).await?;
        Ok(Box::new(PgSession { tx }))
    }

    async fn pending_rewards(&self, created_before: DateTime<Utc>) -> Result<Vec<PendingReward>> {
        let rows: Vec<(String, String, i16, DateTime<Utc>)> = sqlx::query_as(
            r"
            SELECT rewards.id, rewards.txid, pvm_blocks.type, rewards.created_at
            FROM rewards
            JOIN pvm_blocks ON rewards.block_id = pvm_blocks.parent_id
            WHERE rewards.processed = 0 AND rewards.created_at < $1
            ORDER BY rewards.created_at
            ",
        )
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, txid, block_type, created_at)| {
                let block_type = BlockType::from_code(block_type).ok_or_else(|| {
                    IndexerError::DataError(format!("reward {id}: unknown block type {block_type}"))
                })?;
                Ok(PendingReward {
                    tx_id: Id::from_str(&txid)?,
                    id,
                    block_type,
                    created_at,
                })
            })
            .collect()
    }

    async fn mark_reward_processed(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE rewards SET processed = 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// One open Postgres transaction. Dropping it without commit rolls back.
struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Persist for PgSession {
    async fn insert_transaction(&mut self, row: &TransactionRow, upd: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO transactions \
             (id, chain_id, type, memo, canonical_serialization, txfee, genesis, network_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) {}",
            conflict_clause(
                upd,
                "id",
                "chain_id = EXCLUDED.chain_id, type = EXCLUDED.type, memo = EXCLUDED.memo, \
                 canonical_serialization = EXCLUDED.canonical_serialization, \
                 txfee = EXCLUDED.txfee, genesis = EXCLUDED.genesis, network_id = EXCLUDED.network_id",
            )
        );
        sqlx::query(&sql)
            .bind(row.id.to_string())
            .bind(&row.chain_id)
            .bind(&row.tx_type)
            .bind(row.memo.as_deref())
            .bind(&row.canonical_serialization)
            .bind(to_numeric(row.txfee))
            .bind(row.genesis)
            .bind(i64::from(row.network_id))
            .bind(row.created_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_output(&mut self, row: &OutputRow, upd: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO outputs \
             (id, chain_id, transaction_id, output_index, asset_id, output_type, amount, locktime, \
              threshold, group_id, payload, stake_locktime, stake, frozen, stakeableout, genesisutxo, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) {}",
            conflict_clause(
                upd,
                "id",
                "chain_id = EXCLUDED.chain_id, transaction_id = EXCLUDED.transaction_id, \
                 output_index = EXCLUDED.output_index, asset_id = EXCLUDED.asset_id, \
                 output_type = EXCLUDED.output_type, amount = EXCLUDED.amount, \
                 locktime = EXCLUDED.locktime, threshold = EXCLUDED.threshold, \
                 group_id = EXCLUDED.group_id, payload = EXCLUDED.payload, \
                 stake_locktime = EXCLUDED.stake_locktime, stake = EXCLUDED.stake, \
                 frozen = EXCLUDED.frozen, stakeableout = EXCLUDED.stakeableout, \
                 genesisutxo = EXCLUDED.genesisutxo",
            )
        );
        sqlx::query(&sql)
            .bind(row.id.to_string())
            .bind(&row.chain_id)
            .bind(row.transaction_id.to_string())
            .bind(i64::from(row.output_index))
            .bind(row.asset_id.to_string())
            .bind(row.output_type.code())
            .bind(to_numeric(row.amount))
            .bind(to_numeric(row.locktime))
            .bind(i64::from(row.threshold))
            .bind(i64::from(row.group_id))
            .bind(&row.payload)
            .bind(to_numeric(row.stake_locktime))
            .bind(row.stake)
            .bind(row.frozen)
            .bind(row.stakeable_out)
            .bind(row.genesis_utxo)
            .bind(row.created_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_outputs_redeeming(&mut self, row: &OutputsRedeemingRow) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO outputs_redeeming
            (id, redeemed_at, redeeming_transaction_id, amount, output_index, intx, asset_id, chain_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(row.id.to_string())
        .bind(row.redeemed_at)
        .bind(row.redeeming_transaction_id.to_string())
        .bind(to_numeric(row.amount))
        .bind(i64::from(row.output_index))
        .bind(row.intx.to_string())
        .bind(row.asset_id.to_string())
        .bind(&row.chain_id)
        .bind(row.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_address(&mut self, row: &AddressRow, upd: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO addresses (address, public_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4) {}",
            conflict_clause(
                upd,
                "address",
                "public_key = EXCLUDED.public_key, updated_at = EXCLUDED.updated_at",
            )
        );
        sqlx::query(&sql)
            .bind(row.address.to_string())
            .bind(&row.public_key)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_address_chain(&mut self, row: &AddressChainRow, upd: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO address_chain (address, chain_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4) {}",
            conflict_clause(upd, "address, chain_id", "updated_at = EXCLUDED.updated_at")
        );
        sqlx::query(&sql)
            .bind(row.address.to_string())
            .bind(&row.chain_id)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_address_bech32(&mut self, row: &AddressBech32Row, upd: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO addresses_bech32 (address, bech32_address, updated_at) \
             VALUES ($1, $2, $3) {}",
            conflict_clause(
                upd,
                "address",
                "bech32_address = EXCLUDED.bech32_address, updated_at = EXCLUDED.updated_at",
            )
        );
        sqlx::query(&sql)
            .bind(row.address.to_string())
            .bind(&row.bech32_address)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_output_address(&mut self, row: &OutputAddressRow, upd: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO output_addresses (output_id, address, redeeming_signature, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) {}",
            conflict_clause(
                upd,
                "output_id, address",
                "redeeming_signature = COALESCE(EXCLUDED.redeeming_signature, output_addresses.redeeming_signature), \
                 updated_at = EXCLUDED.updated_at",
            )
        );
        sqlx::query(&sql)
            .bind(row.output_id.to_string())
            .bind(row.address.to_string())
            .bind(row.redeeming_signature.as_deref())
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_output_address_signature(&mut self, row: &OutputAddressRow) -> Result<()> {
        sqlx::query(
            r"
            UPDATE output_addresses
            SET redeeming_signature = $1, updated_at = $2
            WHERE output_id = $3 AND address = $4
            ",
        )
        .bind(row.redeeming_signature.as_deref())
        .bind(row.updated_at)
        .bind(row.output_id.to_string())
        .bind(row.address.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_output_address_accumulate_out(
        &mut self,
        row: &OutputAddressAccumulateRow,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO output_addresses_accumulate_out
            (id, output_id, address, transaction_id, output_index, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(row.id.to_string())
        .bind(row.output_id.to_string())
        .bind(row.address.to_string())
        .bind(row.transaction_id.to_string())
        .bind(i64::from(row.output_index))
        .bind(row.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_output_address_accumulate_in(
        &mut self,
        row: &OutputAddressAccumulateRow,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO output_addresses_accumulate_in
            (id, output_id, address, transaction_id, output_index, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(row.id.to_string())
        .bind(row.output_id.to_string())
        .bind(row.address.to_string())
        .bind(row.transaction_id.to_string())
        .bind(i64::from(row.output_index))
        .bind(row.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_output_address_accumulate_in_processed(&mut self, output_id: &Id) -> Result<()> {
        sqlx::query(
            r"
            UPDATE output_addresses_accumulate_in
            SET output_processed = 1
            WHERE output_id = $1 AND output_processed = 0
            ",
        )
        .bind(output_id.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_output_txs_accumulate(&mut self, row: &OutputTxsAccumulateRow) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO output_txs_accumulate (id, chain_id, asset_id, address, transaction_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(row.id.to_string())
        .bind(&row.chain_id)
        .bind(row.asset_id.to_string())
        .bind(row.address.to_string())
        .bind(row.transaction_id.to_string())
        .bind(row.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_tx_trace(&mut self, row: &TxTraceRow, upd: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO tx_traces (id, hash, idx, trace, created_at) VALUES ($1, $2, $3, $4, $5) {}",
            conflict_clause(
                upd,
                "id",
                "hash = EXCLUDED.hash, idx = EXCLUDED.idx, trace = EXCLUDED.trace",
            )
        );
        sqlx::query(&sql)
            .bind(row.id.to_string())
            .bind(&row.hash)
            .bind(i64::from(row.idx))
            .bind(&row.trace)
            .bind(row.created_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_tx_log(&mut self, row: &TxLogRow, upd: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO tx_logs \
             (id, block_hash, tx_hash, log_index, address, topics, data, removed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) {}",
            conflict_clause(upd, "id", "removed = EXCLUDED.removed")
        );
        sqlx::query(&sql)
            .bind(row.id.to_string())
            .bind(&row.block_hash)
            .bind(&row.tx_hash)
            .bind(i64::from(row.log_index))
            .bind(&row.address)
            .bind(&row.topics)
            .bind(&row.data)
            .bind(row.removed)
            .bind(row.created_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn output_exists(&mut self, id: &Id) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM outputs WHERE id = $1)")
            .bind(id.to_string())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
