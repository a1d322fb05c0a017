mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use tokio::sync::watch;

use chainqueue_core::chain::{ChainClient, ChainHandle, HeadStream};
use chainqueue_core::error::IngestError;
use chainqueue_core::store::{QueueStore, RecordReader};
use chainqueue_core::types::{
    BlockCommit, BlockRecord, ChainBlock, ChainTransaction, NewHead, QueueStatus,
};
use chainqueue_pipeline::{
    BlockParser, DrainLoop, HeadAction, HeadSupervisor, HeightDiscovery, IngestBuilder,
    ReconnectPolicy, SupervisorState,
};
use chainqueue_storage::InMemoryStorage;

use common::{block, eventually, tx, MockChain, MockConnector, RecordingStore, ETHER};

/// Block 100 with tx A (0x1 → 0x2, 2 ether) and tx B (0x2 deploying a contract).
fn scenario_chain() -> Arc<MockChain> {
    let chain = MockChain::new(100);
    chain.add_block(block(100, 1_700_000_000, &["0xa", "0xb"]));
    chain.add_tx(tx("0xa", "0x1", Some("0x2"), U256::from(2 * ETHER), 100));
    chain.add_tx(tx("0xb", "0x2", None, U256::ZERO, 100));
    chain
}

fn parser_for(chain: Arc<MockChain>, store: Arc<dyn QueueStore>) -> BlockParser {
    BlockParser::new(ChainHandle::new(chain), store, 18)
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(5),
        multiplier: 2.0,
    }
}

// ─── Block parser ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_single_block() {
    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    store.enqueue(100).await.unwrap();

    let drain = DrainLoop::new(
        parser_for(scenario_chain(), store.clone()),
        store.clone(),
        10,
        4,
        Duration::from_millis(1),
    );
    let report = drain.drain_once().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.committed, 1);

    let record = mem.block(100).await.unwrap().unwrap();
    assert_eq!(record.validator, "0xminer");
    assert_eq!(mem.block_transactions(100).await.unwrap(), vec!["0xa", "0xb"]);
    assert_eq!(mem.transaction(100, "0xa").await.unwrap().unwrap().value, "2");
    assert_eq!(mem.account_transactions("0x1").await.unwrap(), vec!["0xa"]);

    let mut for_0x2 = mem.account_transactions("0x2").await.unwrap();
    for_0x2.sort();
    assert_eq!(for_0x2, vec!["0xa", "0xb"]);

    let mut accounts = mem.accounts().await.unwrap();
    accounts.sort();
    assert_eq!(accounts, vec!["0x1", "0x2"]);
    assert_eq!(store.status(100).await.unwrap(), Some(QueueStatus::Done));
}

#[tokio::test]
async fn commit_is_idempotent() {
    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    store.enqueue(100).await.unwrap();
    let parser = parser_for(scenario_chain(), store.clone());

    assert_eq!(parser.parse(100).await.unwrap(), 2);
    assert_eq!(parser.parse(100).await.unwrap(), 2);

    assert_eq!(mem.block_transactions(100).await.unwrap().len(), 2);
    assert_eq!(mem.account_transactions("0x2").await.unwrap().len(), 2);
    assert_eq!(mem.accounts().await.unwrap().len(), 2);
    assert_eq!(mem.global_transactions(10).await.unwrap().len(), 2);
    assert_eq!(store.queue_stats().await.unwrap().done, 1);
}

#[tokio::test]
async fn failed_commit_leaves_nothing_behind() {
    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    store.enqueue(100).await.unwrap();
    let parser = parser_for(scenario_chain(), store.clone());

    mem.inject_commit_fault(4);
    let err = parser.parse(100).await.unwrap_err();
    assert!(matches!(err, IngestError::CommitFailed { height: 100, .. }));

    assert_eq!(store.status(100).await.unwrap(), Some(QueueStatus::Pending));
    assert!(mem.block(100).await.unwrap().is_none());
    assert!(mem.transaction(100, "0xa").await.unwrap().is_none());
    assert!(mem.block_transactions(100).await.unwrap().is_empty());
    assert!(mem.accounts().await.unwrap().is_empty());

    // the fault is one-shot; the next cycle succeeds
    parser.parse(100).await.unwrap();
    assert_eq!(store.status(100).await.unwrap(), Some(QueueStatus::Done));
}

#[tokio::test]
async fn values_are_rounded_to_nine_digits() {
    let chain = MockChain::new(7);
    chain.add_block(block(7, 1, &["0xr1", "0xr2", "0xr3"]));
    chain.add_tx(tx("0xr1", "0x1", Some("0x2"), U256::from(1_123_456_789_512_000_000u128), 7));
    chain.add_tx(tx("0xr2", "0x1", Some("0x2"), U256::from(3_123_456_789_500_000_000u128), 7));
    chain.add_tx(tx("0xr3", "0x1", Some("0x2"), U256::from(1_500_000_000_000_000_000u128), 7));

    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    store.enqueue(7).await.unwrap();
    parser_for(chain, store).parse(7).await.unwrap();

    let value = |hash: &'static str| {
        let mem = mem.clone();
        async move { mem.transaction(7, hash).await.unwrap().unwrap().value }
    };
    assert_eq!(value("0xr1").await, "1.123456790");
    assert_eq!(value("0xr2").await, "3.123456790");
    assert_eq!(value("0xr3").await, "1.5");
}

#[tokio::test]
async fn contract_creation_indexes_sender_only() {
    let chain = MockChain::new(9);
    chain.add_block(block(9, 1, &["0xdeploy"]));
    chain.add_tx(tx("0xdeploy", "0x5", None, U256::ZERO, 9));

    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    store.enqueue(9).await.unwrap();
    parser_for(chain, store).parse(9).await.unwrap();

    let record = mem.transaction(9, "0xdeploy").await.unwrap().unwrap();
    assert!(record.is_contract_creation());
    assert_eq!(mem.accounts().await.unwrap(), vec!["0x5"]);
    assert_eq!(mem.account_transactions("0x5").await.unwrap(), vec!["0xdeploy"]);
}

#[tokio::test]
async fn missing_block_and_missing_tx_stay_pending() {
    let chain = MockChain::new(200);
    chain.add_block(block(200, 1, &["0xghost"]));

    let store: Arc<dyn QueueStore> = Arc::new(InMemoryStorage::new());
    store.enqueue_range(200, 201).await.unwrap();

    let drain = DrainLoop::new(
        parser_for(chain, store.clone()),
        store.clone(),
        10,
        2,
        Duration::from_millis(1),
    );
    let report = drain.drain_once().await.unwrap();
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.committed, 0);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(store.fetch_pending(10).await.unwrap(), vec![200, 201]);
}

// ─── Drain loop ───────────────────────────────────────────────────────────────

/// Chain that serves empty blocks slowly and tracks peak concurrency.
#[derive(Default)]
struct SlowChain {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ChainClient for SlowChain {
    async fn current_head(&self) -> Result<u64, IngestError> {
        Ok(0)
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<ChainBlock>, IngestError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(block(height, 1, &[])))
    }

    async fn transaction(&self, _hash: &str) -> Result<Option<ChainTransaction>, IngestError> {
        Ok(None)
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, IngestError> {
        Ok(Box::pin(futures::stream::pending()))
    }
}

#[tokio::test]
async fn drain_respects_worker_bound() {
    let chain = Arc::new(SlowChain::default());
    let store: Arc<dyn QueueStore> = Arc::new(InMemoryStorage::new());
    store.enqueue_range(1, 12).await.unwrap();

    let parser = BlockParser::new(ChainHandle::new(chain.clone()), store.clone(), 18);
    let drain = DrainLoop::new(parser, store.clone(), 100, 3, Duration::from_millis(1));

    let report = drain.drain_once().await.unwrap();
    assert_eq!(report.committed, 12);
    assert!(chain.peak.load(Ordering::SeqCst) <= 3);
    assert!(store.fetch_pending(100).await.unwrap().is_empty());
}

#[tokio::test]
async fn drain_batch_is_limited() {
    let chain = Arc::new(SlowChain::default());
    let store: Arc<dyn QueueStore> = Arc::new(InMemoryStorage::new());
    store.enqueue_range(1, 5).await.unwrap();

    let parser = BlockParser::new(ChainHandle::new(chain), store.clone(), 18);
    let drain = DrainLoop::new(parser, store.clone(), 2, 4, Duration::from_millis(1));

    assert_eq!(drain.drain_once().await.unwrap().committed, 2);
    assert_eq!(store.fetch_pending(10).await.unwrap(), vec![3, 4, 5]);
}

#[tokio::test]
async fn lost_store_stops_drain_loop() {
    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    let drain = DrainLoop::new(
        parser_for(MockChain::new(0), store.clone()),
        store,
        10,
        2,
        Duration::from_millis(1),
    );

    mem.set_unavailable(true);
    let (_tx, rx) = watch::channel(false);
    let err = drain.run(rx).await.unwrap_err();
    assert!(err.is_fatal());
}

/// One block of `txs` transactions; fetches finish faster the later the tx.
#[derive(Default)]
struct BusyBlockChain {
    txs: usize,
    reported_number: Option<u64>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl BusyBlockChain {
    fn hashes(&self) -> Vec<String> {
        (0..self.txs).map(|i| format!("0x{i:04}")).collect()
    }
}

#[async_trait]
impl ChainClient for BusyBlockChain {
    async fn current_head(&self) -> Result<u64, IngestError> {
        Ok(0)
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<ChainBlock>, IngestError> {
        let hashes = self.hashes();
        let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
        Ok(Some(block(self.reported_number.unwrap_or(height), 1, &refs)))
    }

    async fn transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, IngestError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let index: u64 = hash[2..].parse().unwrap_or(0);
        let delay = (self.txs as u64).saturating_sub(index) % 4;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(tx(hash, "0x1", Some("0x2"), U256::ZERO, 9)))
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, IngestError> {
        Ok(Box::pin(futures::stream::pending()))
    }
}

#[tokio::test]
async fn tx_fetches_within_a_block_are_bounded() {
    let chain = Arc::new(BusyBlockChain {
        txs: 200,
        ..Default::default()
    });
    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    store.enqueue(9).await.unwrap();

    let parser = BlockParser::new(ChainHandle::new(chain.clone()), store.clone(), 18)
        .with_tx_concurrency(4);
    assert_eq!(parser.parse(9).await.unwrap(), 200);

    let peak = chain.peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak in-flight fetches {peak}");
    assert_eq!(mem.block_transactions(9).await.unwrap(), chain.hashes());
}

#[tokio::test]
async fn mismatched_block_number_stays_pending() {
    let chain = Arc::new(BusyBlockChain {
        txs: 1,
        reported_number: Some(8),
        ..Default::default()
    });
    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    store.enqueue(9).await.unwrap();

    let parser = BlockParser::new(ChainHandle::new(chain), store.clone(), 18);
    let err = parser.parse(9).await.unwrap_err();
    assert!(matches!(err, IngestError::FetchFailed { .. }));
    assert_eq!(store.status(9).await.unwrap(), Some(QueueStatus::Pending));
    assert!(mem.block(8).await.unwrap().is_none());
    assert!(mem.block(9).await.unwrap().is_none());
}

// ─── Height discovery ─────────────────────────────────────────────────────────

#[tokio::test]
async fn gap_backfill_uses_three_batches() {
    let store = RecordingStore::new(Arc::new(InMemoryStorage::new()));
    let discovery = HeightDiscovery::new(store.clone(), 100_000);

    let report = discovery.sync_to(250_000).await.unwrap();
    assert_eq!(report.batches, 3);
    assert_eq!(
        store.ranges(),
        vec![(0, 100_000), (100_001, 200_000), (200_001, 250_000)]
    );
    assert_eq!(store.latest_marker().await.unwrap(), Some(250_000));
    assert_eq!(store.queue_len().await.unwrap(), 250_001);

    // caught up: nothing more to enqueue
    let again = discovery.sync_to(250_000).await.unwrap();
    assert_eq!(again.batches, 0);
    assert_eq!(store.ranges().len(), 3);
}

#[tokio::test]
async fn first_head_on_empty_queue_resyncs_everything() {
    let store: Arc<dyn QueueStore> = Arc::new(InMemoryStorage::new());
    let discovery = HeightDiscovery::new(store.clone(), 4);

    let action = discovery.on_new_head(NewHead { height: 10 }).await.unwrap();
    assert!(matches!(action, HeadAction::FullResync(r) if r.range == Some((0, 10))));
    assert_eq!(store.queue_len().await.unwrap(), 11);

    let action = discovery.on_new_head(NewHead { height: 11 }).await.unwrap();
    assert_eq!(action, HeadAction::Enqueued(11));
    assert_eq!(store.latest_marker().await.unwrap(), Some(11));
}

#[tokio::test]
async fn skipping_head_enqueues_the_gap() {
    let store: Arc<dyn QueueStore> = Arc::new(InMemoryStorage::new());
    let discovery = HeightDiscovery::new(store.clone(), 100_000);
    discovery.sync_to(500).await.unwrap();

    let action = discovery.on_new_head(NewHead { height: 510 }).await.unwrap();
    assert!(matches!(action, HeadAction::GapFilled(r) if r.range == Some((501, 510))));
    assert_eq!(store.latest_marker().await.unwrap(), Some(510));

    discovery.sync_to(530).await.unwrap();
    let queued = store.fetch_pending(10_000).await.unwrap();
    assert_eq!(queued, (0..=530).collect::<Vec<u64>>());
}

#[tokio::test]
async fn enqueue_never_resurrects_done_heights() {
    let store: Arc<dyn QueueStore> = Arc::new(InMemoryStorage::new());
    let discovery = HeightDiscovery::new(store.clone(), 100);
    discovery.sync_to(3).await.unwrap();
    store.commit_block(&done_commit(2)).await.unwrap();

    discovery.full_resync(3).await.unwrap();
    discovery.on_new_head(NewHead { height: 2 }).await.unwrap();
    assert_eq!(store.status(2).await.unwrap(), Some(QueueStatus::Done));
}

fn done_commit(height: u64) -> BlockCommit {
    BlockCommit::new(
        height,
        BlockRecord {
            number: height,
            validator: "0xminer".into(),
            gas_used: 0,
            size: 0,
            timestamp: 0,
            hash: format!("0xb{height}"),
        },
    )
}

// ─── Supervisor ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_resyncs_the_outage_before_resubscribing() {
    let mem = Arc::new(InMemoryStorage::new());
    let store = RecordingStore::new(mem.clone());
    store.inner.enqueue_range(0, 500).await.unwrap();
    store.advance_marker(500).await.unwrap();
    store.commit_block(&done_commit(500)).await.unwrap();

    let before = MockChain::new(500);
    let after = MockChain::with_probe(530, store.clone());
    let connector = MockConnector::new();
    connector.then_fail("connection refused").then_connect(after.clone());

    let supervisor = Arc::new(HeadSupervisor::new(
        connector.clone(),
        ChainHandle::new(before.clone()),
        HeightDiscovery::new(store.clone(), 100_000),
        fast_policy(),
    ));
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(shutdown).await }
    });

    assert!(eventually(|| before.subscriptions() == 1).await);
    assert!(store.ranges().is_empty());

    before.drop_subscriptions();
    assert!(eventually(|| after.subscriptions() == 1).await);

    assert_eq!(connector.attempts(), 2);
    assert_eq!(store.ranges(), vec![(501, 530)]);
    assert_eq!(after.markers_at_subscribe(), vec![Some(530)]);
    assert_eq!(store.status(500).await.unwrap(), Some(QueueStatus::Done));
    let stats = store.queue_stats().await.unwrap();
    assert_eq!((stats.pending, stats.done), (530, 1));
    assert!(eventually(|| supervisor.state() == SupervisorState::Subscribed).await);

    // heads on the new connection are pushed again
    after.push_head(531);
    let mut pending = Vec::new();
    for _ in 0..400 {
        pending = store.fetch_pending(1_000).await.unwrap();
        if pending.last() == Some(&531) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pending.last(), Some(&531));

    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn lost_store_stops_supervisor() {
    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    mem.set_unavailable(true);

    let supervisor = HeadSupervisor::new(
        MockConnector::new(),
        ChainHandle::new(MockChain::new(10)),
        HeightDiscovery::new(store, 100),
        fast_policy(),
    );
    let (_stop, shutdown) = watch::channel(false);
    let err = supervisor.run(shutdown).await.unwrap_err();
    assert!(matches!(err, IngestError::StoreUnavailable(_)));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

// ─── Whole pipeline ───────────────────────────────────────────────────────────

#[tokio::test]
async fn pipeline_backfills_and_follows_heads() {
    let chain = MockChain::new(2);
    for n in 0..=3 {
        chain.add_block(block(n, 1_700_000_000 + n as i64, &[]));
    }

    let mem = Arc::new(InMemoryStorage::new());
    let store: Arc<dyn QueueStore> = mem.clone();
    let pipeline = Arc::new(
        IngestBuilder::new()
            .chunk_size(1)
            .drain_workers(2)
            .drain_interval_ms(5)
            .reconnect_backoff(1, 5, 2.0)
            .build(store.clone(), ChainHandle::new(chain.clone()), MockConnector::new())
            .unwrap(),
    );

    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run(shutdown).await }
    });

    assert!(eventually(|| chain.subscriptions() == 1).await);
    chain.push_head(3);

    let mut done = 0;
    for _ in 0..400 {
        done = store.queue_stats().await.unwrap().done;
        if done == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(done, 4);
    assert_eq!(mem.latest_block().await.unwrap().unwrap().number, 3);

    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
}
