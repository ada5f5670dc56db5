use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utxo_indexer::{
    AtomicTxConsumer, BalanceManager, BaseTx, BlockPayload, ChainConsumer, ChannelSource,
    ConsumerCtx, DecodedTx, Dispatcher, Id, InMemoryMetrics, IndexerError, JsonPayloadDecoder,
    LogPayload, MemoryStorage, Message, OutputOwners, OutputState, Outcome, Result, RetryConfig,
    ShortId, SourceMessage, Topics, TracePayload, TransactionType, TransferableOutput, Writer,
};

const CHAIN: &str = "chain-x";

fn topics() -> Topics {
    Topics::new(12345, CHAIN, "atomic")
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn message(topic: &str, partition: &str, seq: i64, body: Vec<u8>) -> SourceMessage {
    SourceMessage {
        source_id: format!("{partition}-{seq}"),
        topic: topic.to_string(),
        partition: partition.to_string(),
        message: Message {
            id: format!("msg-{seq}"),
            chain_id: CHAIN.to_string(),
            body,
            timestamp: 1_700_000_000 + seq,
            nanosecond: 0,
        },
    }
}

fn empty_block() -> Vec<u8> {
    serde_json::to_vec(&BlockPayload::default()).unwrap()
}

fn block_with_tx(id: u8) -> Vec<u8> {
    let tx = DecodedTx {
        tx_type: TransactionType::Base,
        base: BaseTx {
            id: Id::new([id; 32]),
            network_id: 12345,
            memo: Vec::new(),
            ins: Vec::new(),
            outs: vec![TransferableOutput {
                asset_id: Id::new([1; 32]),
                out: OutputState::Transfer {
                    amount: 10,
                    owners: OutputOwners {
                        locktime: 0,
                        threshold: 1,
                        addresses: vec![ShortId::new([5; 20])],
                    },
                },
            }],
        },
        unsigned_bytes: Vec::new(),
        raw_bytes: vec![id; 8],
        credentials: Vec::new(),
        extra_ins: None,
        extra_outs: None,
        extra_fee: 0,
        genesis: true,
    };
    serde_json::to_vec(&BlockPayload { txs: vec![tx] }).unwrap()
}

enum Failure {
    Contention,
    Data,
    Slow(Duration),
    /// Contends forever on the message with this timestamp only.
    LockedAt(i64),
}

/// Fails the first `failures` calls, then succeeds. Records the time of each
/// successful call.
struct ScriptedConsumer {
    failure: Failure,
    failures: AtomicU32,
    calls: AtomicU32,
    seen: Mutex<Vec<i64>>,
}

impl ScriptedConsumer {
    fn new(failure: Failure, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failure,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn ok() -> Arc<Self> {
        Self::new(Failure::Data, 0)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn step(&self, ctx: &mut ConsumerCtx<'_>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Failure::LockedAt(locked) = self.failure {
            if ctx.time().timestamp() == locked {
                return Err(IndexerError::LockContention("row locked".into()));
            }
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            match &self.failure {
                Failure::Contention => {
                    return Err(IndexerError::LockContention("row locked".into()));
                }
                Failure::Data => return Err(IndexerError::DataError("bad row".into())),
                Failure::Slow(delay) => tokio::time::sleep(*delay).await,
                Failure::LockedAt(_) => {}
            }
        }
        self.seen.lock().unwrap().push(ctx.time().timestamp());
        Ok(())
    }
}

#[async_trait]
impl ChainConsumer for ScriptedConsumer {
    async fn consume_block(&self, ctx: &mut ConsumerCtx<'_>, _block: &BlockPayload) -> Result<()> {
        self.step(ctx).await
    }

    async fn consume_trace(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        _content_id: Id,
        _trace: &TracePayload,
    ) -> Result<()> {
        self.step(ctx).await
    }

    async fn consume_logs(
        &self,
        ctx: &mut ConsumerCtx<'_>,
        _content_id: Id,
        _log: &LogPayload,
    ) -> Result<()> {
        self.step(ctx).await
    }
}

#[derive(Default)]
struct CountingBalance {
    signals: AtomicUsize,
}

impl BalanceManager for CountingBalance {
    fn exec(&self) {
        self.signals.fetch_add(1, Ordering::SeqCst);
    }
}

fn dispatcher(consumer: Arc<dyn ChainConsumer>, metrics: Arc<InMemoryMetrics>) -> Dispatcher {
    Dispatcher::new(
        topics(),
        Arc::new(MemoryStorage::new()),
        Arc::new(JsonPayloadDecoder),
        consumer,
    )
    .with_retry(fast_retry())
    .with_metrics(metrics)
}

#[tokio::test(start_paused = true)]
async fn test_contention_is_retried_until_success() {
    let consumer = ScriptedConsumer::new(Failure::Contention, 2);
    let metrics = Arc::new(InMemoryMetrics::new());
    let dispatcher = dispatcher(consumer.clone(), metrics.clone());

    dispatcher
        .process(&message(&topics().main, "p0", 1, empty_block()))
        .await
        .unwrap();

    assert_eq!(consumer.calls(), 3);
    let counts = metrics.counts("block");
    assert_eq!(counts.retry, 2);
    assert_eq!(counts.success, 1);
    assert_eq!(counts.failure, 0);
    assert_eq!(counts.processed, 1);
}

#[tokio::test]
async fn test_other_failures_are_reported_once() {
    let consumer = ScriptedConsumer::new(Failure::Data, 1);
    let metrics = Arc::new(InMemoryMetrics::new());
    let dispatcher = dispatcher(consumer.clone(), metrics.clone());

    let err = dispatcher
        .process(&message(&topics().main, "p0", 1, empty_block()))
        .await
        .unwrap_err();

    assert!(matches!(err, IndexerError::DataError(_)));
    assert_eq!(consumer.calls(), 1);
    let counts = metrics.counts("block");
    assert_eq!(counts.failure, 1);
    assert_eq!(counts.retry, 0);
    assert_eq!(counts.processed, 1);
}

#[tokio::test]
async fn test_decode_failure_skips_persistence() {
    let consumer = ScriptedConsumer::ok();
    let metrics = Arc::new(InMemoryMetrics::new());
    let dispatcher = dispatcher(consumer.clone(), metrics.clone());

    let err = dispatcher
        .process(&message(&topics().main, "p0", 1, b"not a block".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(err, IndexerError::DecodingError(_)));
    assert_eq!(consumer.calls(), 0);
    assert_eq!(metrics.counts("block").failure, 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_timeout_is_fatal() {
    let consumer = ScriptedConsumer::new(Failure::Slow(Duration::from_secs(10)), 1);
    let metrics = Arc::new(InMemoryMetrics::new());
    let dispatcher =
        dispatcher(consumer.clone(), metrics.clone()).with_write_timeout(Duration::from_secs(1));

    let err = dispatcher
        .process(&message(&topics().main, "p0", 1, empty_block()))
        .await
        .unwrap_err();

    assert!(matches!(err, IndexerError::WriteTimeout { .. }));
    assert!(!err.is_contention());
    assert_eq!(consumer.calls(), 1);
    assert_eq!(metrics.counts("block").retry, 0);
}

#[tokio::test]
async fn test_unknown_topic_is_ignored() {
    let consumer = ScriptedConsumer::ok();
    let metrics = Arc::new(InMemoryMetrics::new());
    let dispatcher = dispatcher(consumer.clone(), metrics.clone());

    dispatcher
        .process(&message("12345-other-atomic", "p0", 1, empty_block()))
        .await
        .unwrap();

    assert_eq!(consumer.calls(), 0);
    assert_eq!(metrics.counts("block").processed, 0);
}

#[tokio::test]
async fn test_balance_hook_fires_for_blocks_only() {
    let consumer = ScriptedConsumer::ok();
    let balance = Arc::new(CountingBalance::default());
    let dispatcher = dispatcher(consumer, Arc::new(InMemoryMetrics::new()))
        .with_balance_manager(balance.clone());

    let trace = serde_json::to_vec(&TracePayload {
        hash: "0xabc".into(),
        idx: 0,
        trace: b"{}".to_vec(),
    })
    .unwrap();

    dispatcher
        .process(&message(&topics().main, "p0", 1, empty_block()))
        .await
        .unwrap();
    dispatcher
        .process(&message(&topics().trace, "p0", 2, trace))
        .await
        .unwrap();

    assert_eq!(balance.signals.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let storage = MemoryStorage::new();
    let consumer = AtomicTxConsumer::new(Writer::new(CHAIN, Id::new([1; 32])));
    let dispatcher = Dispatcher::new(
        topics(),
        Arc::new(storage.clone()),
        Arc::new(JsonPayloadDecoder),
        Arc::new(consumer),
    );
    let msg = message(&topics().main, "p0", 1, block_with_tx(9));

    dispatcher.process(&msg).await.unwrap();
    let first = storage.snapshot().unwrap();
    dispatcher.process(&msg).await.unwrap();
    let second = storage.snapshot().unwrap();

    assert_eq!(first.transactions, second.transactions);
    assert_eq!(first.outputs, second.outputs);
    assert_eq!(first.accumulate_out, second.accumulate_out);
    assert_eq!(first.output_txs_accumulate, second.output_txs_accumulate);
    assert_eq!(second.transactions.len(), 1);
}

#[tokio::test]
async fn test_trace_and_log_rows_use_content_ids() {
    let storage = MemoryStorage::new();
    let consumer = AtomicTxConsumer::new(Writer::new(CHAIN, Id::new([1; 32])));
    let dispatcher = Dispatcher::new(
        topics(),
        Arc::new(storage.clone()),
        Arc::new(JsonPayloadDecoder),
        Arc::new(consumer),
    );

    let trace_bytes = b"{\"calls\":[]}".to_vec();
    let trace = serde_json::to_vec(&TracePayload {
        hash: "0xabc".into(),
        idx: 2,
        trace: trace_bytes.clone(),
    })
    .unwrap();
    let log = serde_json::to_vec(&LogPayload {
        block_hash: "0xb".into(),
        tx_hash: "0xt".into(),
        log_index: 4,
        address: "0xa".into(),
        topics: vec!["0x01".into()],
        data: vec![1, 2, 3],
        removed: false,
    })
    .unwrap();

    dispatcher
        .process(&message(&topics().trace, "p0", 1, trace))
        .await
        .unwrap();
    dispatcher
        .process(&message(&topics().logs, "p0", 2, log.clone()))
        .await
        .unwrap();

    let tables = storage.snapshot().unwrap();
    let trace_row = &tables.tx_traces[&Id::hash_of(&trace_bytes)];
    assert_eq!(trace_row.idx, 2);
    let log_row = &tables.tx_logs[&Id::hash_of(&log)];
    assert_eq!(log_row.log_index, 4);
    assert_eq!(log_row.topics, vec!["0x01".to_string()]);
}

#[tokio::test]
async fn test_partition_order_is_preserved() {
    let consumer = ScriptedConsumer::ok();
    let dispatcher =
        dispatcher(consumer.clone(), Arc::new(InMemoryMetrics::new())).with_workers(4);
    let main = topics().main;

    let batch = vec![
        message(&main, "a", 1, empty_block()),
        message(&main, "b", 10, empty_block()),
        message(&main, "a", 2, empty_block()),
        message(&main, "b", 11, empty_block()),
        message(&main, "a", 3, empty_block()),
    ];
    let outcomes = dispatcher.process_batch(batch).await;

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|(_, o)| *o == Some(Outcome::Processed)));

    let seen = consumer.seen.lock().unwrap().clone();
    let base = 1_700_000_000;
    let lane_a: Vec<_> = seen.iter().filter(|t| **t < base + 10).copied().collect();
    let lane_b: Vec<_> = seen.iter().filter(|t| **t >= base + 10).copied().collect();
    assert_eq!(lane_a, vec![base + 1, base + 2, base + 3]);
    assert_eq!(lane_b, vec![base + 10, base + 11]);
}

#[tokio::test(start_paused = true)]
async fn test_contention_interrupted_by_shutdown_is_not_acknowledged() {
    let consumer = ScriptedConsumer::new(Failure::LockedAt(1_700_000_001), 0);
    let metrics = Arc::new(InMemoryMetrics::new());
    let token = CancellationToken::new();
    let dispatcher =
        dispatcher(consumer.clone(), metrics.clone()).with_shutdown_token(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let main = topics().main;
    let outcomes = dispatcher
        .process_batch(vec![
            message(&main, "p0", 1, empty_block()),
            message(&main, "p0", 2, empty_block()),
        ])
        .await;
    canceller.await.unwrap();

    let outcomes: Vec<_> = outcomes
        .iter()
        .map(|(m, o)| (m.source_id.as_str(), *o))
        .collect();
    assert_eq!(outcomes, vec![("p0-1", None), ("p0-2", None)]);
    // Nothing behind the interrupted message was committed.
    assert!(consumer.seen.lock().unwrap().is_empty());

    let counts = metrics.counts("block");
    assert_eq!(counts.failure, 0);
    assert_eq!(counts.success, 0);
    assert!(counts.retry > 0);
}

#[tokio::test]
async fn test_lanes_not_started_before_shutdown_are_skipped() {
    let consumer = ScriptedConsumer::ok();
    let token = CancellationToken::new();
    let dispatcher = dispatcher(consumer.clone(), Arc::new(InMemoryMetrics::new()))
        .with_shutdown_token(token.clone());
    token.cancel();

    let main = topics().main;
    let outcomes = dispatcher
        .process_batch(vec![
            message(&main, "a", 1, empty_block()),
            message(&main, "a", 2, empty_block()),
            message(&main, "b", 3, empty_block()),
        ])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|(_, o)| o.is_none()));
    assert_eq!(consumer.calls(), 0);
}

#[tokio::test]
async fn test_run_acknowledges_every_message() {
    let consumer = ScriptedConsumer::ok();
    let dispatcher = dispatcher(consumer.clone(), Arc::new(InMemoryMetrics::new()));
    let main = topics().main;

    let (tx, rx) = mpsc::channel(16);
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    let source = ChannelSource::new(rx, 10).with_acks(ack_tx);

    tx.send(message(&main, "p0", 1, empty_block())).await.unwrap();
    tx.send(message(&main, "p0", 2, b"garbage".to_vec())).await.unwrap();
    tx.send(message(&main, "p1", 3, empty_block())).await.unwrap();
    drop(tx);

    dispatcher.run(Box::new(source)).await.unwrap();

    let mut acks = Vec::new();
    while let Ok(ack) = ack_rx.try_recv() {
        acks.push(ack);
    }
    acks.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        acks,
        vec![
            ("p0-1".to_string(), Outcome::Processed),
            ("p0-2".to_string(), Outcome::Dropped),
            ("p1-3".to_string(), Outcome::Processed),
        ]
    );
    assert_eq!(consumer.calls(), 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let token = CancellationToken::new();
    let dispatcher = dispatcher(ScriptedConsumer::ok(), Arc::new(InMemoryMetrics::new()))
        .with_shutdown_token(token.clone());
    let (_tx, rx) = mpsc::channel::<SourceMessage>(1);

    token.cancel();
    tokio::time::timeout(
        Duration::from_secs(1),
        dispatcher.run(Box::new(ChannelSource::new(rx, 1))),
    )
    .await
    .expect("run returns after shutdown")
    .unwrap();
}
