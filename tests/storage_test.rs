use chrono::Utc;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::time::Duration;
use utxo_indexer::{
    BaseTx, ConsumerCtx, DecodedTx, Id, OutputOwners, OutputState, PgStorage, ShortId,
    StorageBackend, TransactionType, TransferableInput, TransferableOutput, Writer,
};

async fn connect() -> Option<PgStorage> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping storage test");
            return None;
        }
    };
    let storage = PgStorage::new(&database_url, Duration::from_secs(5))
        .await
        .expect("connect");
    storage.initialize().await.expect("schema");
    Some(storage)
}

/// Ids unique to this run, so reruns against one database do not collide.
fn unique_id(tag: &str) -> Id {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    Id::new(Sha256::digest(format!("{tag}-{nanos}").as_bytes()).into())
}

fn transfer_tx(id: Id, ins: Vec<TransferableInput>, amount: u64) -> DecodedTx {
    DecodedTx {
        tx_type: TransactionType::Base,
        base: BaseTx {
            id,
            network_id: 12345,
            memo: b"pg".to_vec(),
            ins,
            outs: vec![TransferableOutput {
                asset_id: Id::new([1; 32]),
                out: OutputState::Transfer {
                    amount,
                    owners: OutputOwners {
                        locktime: 0,
                        threshold: 1,
                        addresses: vec![ShortId::new([5; 20])],
                    },
                },
            }],
        },
        unsigned_bytes: Vec::new(),
        raw_bytes: vec![1, 2, 3],
        credentials: Vec::new(),
        extra_ins: None,
        extra_outs: None,
        extra_fee: 0,
        genesis: false,
    }
}

async fn index(storage: &PgStorage, writer: &Writer, tx: &DecodedTx) {
    let mut session = storage.begin().await.unwrap();
    {
        let mut ctx = ConsumerCtx::new(Utc::now(), session.as_mut(), false);
        writer.index_tx(&mut ctx, tx).await.unwrap();
    }
    session.commit().await.unwrap();
}

async fn count(storage: &PgStorage, table: &str, column: &str, id: &Id) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE {column} = $1"))
        .bind(id.to_string())
        .fetch_one(storage.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_pg_spend_is_written_once() {
    let Some(storage) = connect().await else {
        return;
    };
    let writer = Writer::new("pg-test-chain", Id::new([1; 32]));

    let funding = transfer_tx(unique_id("funding"), Vec::new(), 100);
    let spend = transfer_tx(
        unique_id("spend"),
        vec![TransferableInput {
            tx_id: funding.base.id,
            output_index: 0,
            asset_id: Id::new([1; 32]),
            amount: 100,
        }],
        90,
    );

    index(&storage, &writer, &funding).await;
    index(&storage, &writer, &spend).await;
    index(&storage, &writer, &spend).await;

    let spent = funding.base.id.prefix(0);
    assert_eq!(count(&storage, "outputs", "id", &spent).await, 1);
    assert_eq!(count(&storage, "outputs_redeeming", "id", &spent).await, 1);
    assert_eq!(count(&storage, "transactions", "id", &spend.base.id).await, 1);

    let txfee: Decimal = sqlx::query_scalar("SELECT txfee FROM transactions WHERE id = $1")
        .bind(spend.base.id.to_string())
        .fetch_one(storage.pool())
        .await
        .unwrap();
    assert_eq!(txfee, Decimal::from(10u64));

    let processed: i16 = sqlx::query_scalar(
        "SELECT output_processed FROM output_addresses_accumulate_in WHERE output_id = $1",
    )
    .bind(spent.to_string())
    .fetch_one(storage.pool())
    .await
    .unwrap();
    assert_eq!(processed, 1);
}

#[tokio::test]
async fn test_pg_uncommitted_session_rolls_back() {
    let Some(storage) = connect().await else {
        return;
    };
    let writer = Writer::new("pg-test-chain", Id::new([1; 32]));
    let tx = transfer_tx(unique_id("rollback"), Vec::new(), 5);

    let mut session = storage.begin().await.unwrap();
    {
        let mut ctx = ConsumerCtx::new(Utc::now(), session.as_mut(), false);
        writer.index_tx(&mut ctx, &tx).await.unwrap();
    }
    drop(session);

    assert_eq!(count(&storage, "transactions", "id", &tx.base.id).await, 0);
    assert_eq!(count(&storage, "outputs", "id", &tx.base.id.prefix(0)).await, 0);
}

#[tokio::test]
async fn test_pg_amount_above_bigint_range() {
    let Some(storage) = connect().await else {
        return;
    };
    // Non-native asset, so the fee rule does not look at the amount.
    let writer = Writer::new("pg-test-chain", Id::new([9; 32]));
    let tx = transfer_tx(unique_id("large-supply"), Vec::new(), u64::MAX);

    index(&storage, &writer, &tx).await;

    let amount: Decimal = sqlx::query_scalar("SELECT amount FROM outputs WHERE id = $1")
        .bind(tx.base.id.prefix(0).to_string())
        .fetch_one(storage.pool())
        .await
        .unwrap();
    assert_eq!(amount, Decimal::from(u64::MAX));
}
