//! Scripted in-process chain for pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use futures::channel::mpsc;

use chainqueue_core::chain::{ChainClient, ChainConnector, HeadStream};
use chainqueue_core::error::IngestError;
use chainqueue_core::store::QueueStore;
use chainqueue_core::types::{ChainBlock, ChainTransaction, NewHead, QueueStats, QueueStatus};
use chainqueue_core::BlockCommit;

type HeadSender = mpsc::UnboundedSender<Result<NewHead, IngestError>>;

#[derive(Default)]
struct ChainState {
    head: u64,
    blocks: HashMap<u64, ChainBlock>,
    txs: HashMap<String, ChainTransaction>,
    senders: Vec<HeadSender>,
    /// Marker observed by the store probe at each subscribe.
    markers_at_subscribe: Vec<Option<u64>>,
}

/// A chain node whose head, blocks, and subscription are driven by the test.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
    probe: Option<Arc<dyn QueueStore>>,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                head,
                ..Default::default()
            }),
            probe: None,
        })
    }

    /// Record the store's marker whenever a subscription is opened.
    pub fn with_probe(head: u64, store: Arc<dyn QueueStore>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                head,
                ..Default::default()
            }),
            probe: Some(store),
        })
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn add_block(&self, block: ChainBlock) {
        self.state.lock().unwrap().blocks.insert(block.number, block);
    }

    pub fn add_tx(&self, tx: ChainTransaction) {
        self.state.lock().unwrap().txs.insert(tx.hash.clone(), tx);
    }

    /// Deliver a head to every live subscription.
    pub fn push_head(&self, height: u64) {
        let mut state = self.state.lock().unwrap();
        state.head = state.head.max(height);
        state
            .senders
            .retain(|tx| tx.unbounded_send(Ok(NewHead { height })).is_ok());
    }

    /// Break every live subscription with an error.
    pub fn drop_subscriptions(&self) {
        let mut state = self.state.lock().unwrap();
        for tx in state.senders.drain(..) {
            let _ = tx.unbounded_send(Err(IngestError::ChainUnavailable("socket closed".into())));
        }
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().markers_at_subscribe.len()
    }

    pub fn markers_at_subscribe(&self) -> Vec<Option<u64>> {
        self.state.lock().unwrap().markers_at_subscribe.clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_head(&self) -> Result<u64, IngestError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<ChainBlock>, IngestError> {
        Ok(self.state.lock().unwrap().blocks.get(&height).cloned())
    }

    async fn transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, IngestError> {
        Ok(self.state.lock().unwrap().txs.get(hash).cloned())
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, IngestError> {
        let marker = match &self.probe {
            Some(store) => store.latest_marker().await?,
            None => None,
        };
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.state.lock().unwrap();
        state.senders.push(tx);
        state.markers_at_subscribe.push(marker);
        Ok(Box::pin(rx))
    }
}

/// Hands out scripted connect results in order; fails once the script runs out.
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<Result<Arc<MockChain>, String>>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn then_fail(&self, reason: &str) -> &Self {
        self.script.lock().unwrap().push_back(Err(reason.to_string()));
        self
    }

    pub fn then_connect(&self, chain: Arc<MockChain>) -> &Self {
        self.script.lock().unwrap().push_back(Ok(chain));
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, IngestError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(chain)) => Ok(chain as Arc<dyn ChainClient>),
            Some(Err(reason)) => Err(IngestError::ChainUnavailable(reason)),
            None => Err(IngestError::ChainUnavailable("no more scripted connections".into())),
        }
    }
}

/// Store wrapper that records every `enqueue_range` call.
pub struct RecordingStore<S> {
    pub inner: Arc<S>,
    ranges: Mutex<Vec<(u64, u64)>>,
}

impl<S> RecordingStore<S> {
    pub fn new(inner: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ranges: Mutex::new(vec![]),
        })
    }

    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl<S: QueueStore> QueueStore for RecordingStore<S> {
    async fn enqueue(&self, height: u64) -> Result<(), IngestError> {
        self.inner.enqueue(height).await
    }
    async fn enqueue_range(&self, from: u64, to: u64) -> Result<(), IngestError> {
        self.ranges.lock().unwrap().push((from, to));
        self.inner.enqueue_range(from, to).await
    }
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<u64>, IngestError> {
        self.inner.fetch_pending(limit).await
    }
    async fn commit_block(&self, commit: &BlockCommit) -> Result<(), IngestError> {
        self.inner.commit_block(commit).await
    }
    async fn status(&self, height: u64) -> Result<Option<QueueStatus>, IngestError> {
        self.inner.status(height).await
    }
    async fn queue_len(&self) -> Result<u64, IngestError> {
        self.inner.queue_len().await
    }
    async fn queue_stats(&self) -> Result<QueueStats, IngestError> {
        self.inner.queue_stats().await
    }
    async fn latest_marker(&self) -> Result<Option<u64>, IngestError> {
        self.inner.latest_marker().await
    }
    async fn advance_marker(&self, height: u64) -> Result<(), IngestError> {
        self.inner.advance_marker(height).await
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

pub const ETHER: u128 = 1_000_000_000_000_000_000;

pub fn block(number: u64, timestamp: i64, txs: &[&str]) -> ChainBlock {
    ChainBlock {
        number,
        hash: format!("0xb{number}"),
        author: None,
        miner: Some("0xminer".into()),
        gas_used: 21_000 * txs.len() as u64,
        size: 512,
        timestamp,
        transactions: txs.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn tx(hash: &str, from: &str, to: Option<&str>, wei: U256, block: u64) -> ChainTransaction {
    ChainTransaction {
        hash: hash.into(),
        from: from.into(),
        to: to.map(Into::into),
        value: wei,
        gas: 21_000,
        gas_price: U256::from(1_000_000_000u64),
        input: "0x".into(),
        nonce: 0,
        block_number: Some(block),
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
