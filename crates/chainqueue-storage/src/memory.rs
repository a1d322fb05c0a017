//! In-memory queue store.
//!
//! Keeps the queue and every derived record in RAM behind one mutex, which
//! plays the role of the store transaction. Useful for tests and short-lived
//! runs that don't need persistence.
//!
//! Commits go through an undo log so a fault injected halfway through a
//! commit (see [`InMemoryStorage::inject_commit_fault`]) rolls back cleanly.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chainqueue_core::error::IngestError;
use chainqueue_core::store::{QueueStore, RecordReader};
use chainqueue_core::types::{
    AccountOrderEntry, AccountTxEntry, BlockCommit, BlockRecord, BlockTxEntry, GlobalTxEntry,
    QueueStats, QueueStatus, TransactionRecord,
};

#[derive(Default)]
struct State {
    queue: BTreeMap<u64, QueueStatus>,
    marker: Option<u64>,
    blocks: BTreeMap<u64, BlockRecord>,
    transactions: HashMap<(u64, String), TransactionRecord>,
    /// block → tx hash → position
    block_txs: HashMap<u64, HashMap<String, u32>>,
    /// account → tx hash → block number
    account_txs: HashMap<String, HashMap<String, u64>>,
    /// account → first block seen
    account_order: HashMap<String, u64>,
    /// tx hash → block timestamp
    global_txs: HashMap<String, i64>,
    /// Fail the next commit after this many applied writes.
    commit_fault: Option<usize>,
    unavailable: bool,
}

/// A single staged write of a [`BlockCommit`].
enum Write<'a> {
    Block(&'a BlockRecord),
    Transaction(&'a TransactionRecord),
    BlockTx(u64, &'a BlockTxEntry),
    AccountTx(&'a AccountTxEntry),
    AccountOrder(&'a AccountOrderEntry),
    GlobalTx(&'a GlobalTxEntry),
    Done(u64),
}

/// The previous value overwritten by a [`Write`].
enum Undo {
    Block(u64, Option<BlockRecord>),
    Transaction((u64, String), Option<TransactionRecord>),
    BlockTx(u64, String, Option<u32>),
    AccountTx(String, String, Option<u64>),
    AccountOrder(String, Option<u64>),
    GlobalTx(String, Option<i64>),
    Status(u64, Option<QueueStatus>),
}

impl State {
    fn apply(&mut self, write: Write<'_>) -> Undo {
        match write {
            Write::Block(block) => {
                let prev = self.blocks.insert(block.number, block.clone());
                Undo::Block(block.number, prev)
            }
            Write::Transaction(tx) => {
                let key = (tx.block_number, tx.hash.clone());
                let prev = self.transactions.insert(key.clone(), tx.clone());
                Undo::Transaction(key, prev)
            }
            Write::BlockTx(block, entry) => {
                let prev = self
                    .block_txs
                    .entry(block)
                    .or_default()
                    .insert(entry.tx_hash.clone(), entry.position);
                Undo::BlockTx(block, entry.tx_hash.clone(), prev)
            }
            Write::AccountTx(entry) => {
                let prev = self
                    .account_txs
                    .entry(entry.account.clone())
                    .or_default()
                    .insert(entry.tx_hash.clone(), entry.block_number);
                Undo::AccountTx(entry.account.clone(), entry.tx_hash.clone(), prev)
            }
            Write::AccountOrder(entry) => {
                let prev = self.account_order.get(&entry.account).copied();
                let first = prev.map_or(entry.block_number, |b| b.min(entry.block_number));
                self.account_order.insert(entry.account.clone(), first);
                Undo::AccountOrder(entry.account.clone(), prev)
            }
            Write::GlobalTx(entry) => {
                let prev = self.global_txs.insert(entry.tx_hash.clone(), entry.timestamp);
                Undo::GlobalTx(entry.tx_hash.clone(), prev)
            }
            Write::Done(height) => {
                let prev = self.queue.insert(height, QueueStatus::Done);
                Undo::Status(height, prev)
            }
        }
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Block(number, prev) => restore(&mut self.blocks, number, prev),
            Undo::Transaction(key, prev) => restore(&mut self.transactions, key, prev),
            Undo::BlockTx(block, hash, prev) => {
                if let Some(index) = self.block_txs.get_mut(&block) {
                    restore(index, hash, prev);
                    if index.is_empty() {
                        self.block_txs.remove(&block);
                    }
                }
            }
            Undo::AccountTx(account, hash, prev) => {
                if let Some(index) = self.account_txs.get_mut(&account) {
                    restore(index, hash, prev);
                    if index.is_empty() {
                        self.account_txs.remove(&account);
                    }
                }
            }
            Undo::AccountOrder(account, prev) => restore(&mut self.account_order, account, prev),
            Undo::GlobalTx(hash, prev) => restore(&mut self.global_txs, hash, prev),
            Undo::Status(height, prev) => restore(&mut self.queue, height, prev),
        }
    }
}

/// Put `prev` back under `key`, or remove the key if there was nothing before.
fn restore<K, V, M>(map: &mut M, key: K, prev: Option<V>)
where
    M: MapLike<K, V>,
{
    match prev {
        Some(v) => map.put(key, v),
        None => map.take(&key),
    }
}

trait MapLike<K, V> {
    fn put(&mut self, key: K, value: V);
    fn take(&mut self, key: &K);
}

impl<K: Ord, V> MapLike<K, V> for BTreeMap<K, V> {
    fn put(&mut self, key: K, value: V) {
        self.insert(key, value);
    }
    fn take(&mut self, key: &K) {
        self.remove(key);
    }
}

impl<K: std::hash::Hash + Eq, V> MapLike<K, V> for HashMap<K, V> {
    fn put(&mut self, key: K, value: V) {
        self.insert(key, value);
    }
    fn take(&mut self, key: &K) {
        self.remove(key);
    }
}

/// In-memory queue store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, IngestError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.unavailable {
            return Err(IngestError::StoreUnavailable("in-memory store offline".into()));
        }
        Ok(state)
    }

    /// Make the next commit fail after `after_writes` of its writes were applied.
    /// The partial writes are rolled back before the error is returned.
    pub fn inject_commit_fault(&self, after_writes: usize) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).commit_fault =
            Some(after_writes);
    }

    /// Simulate losing the store connection (every call fails with `StoreUnavailable`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).unavailable = unavailable;
    }
}

#[async_trait]
impl QueueStore for InMemoryStorage {
    async fn enqueue(&self, height: u64) -> Result<(), IngestError> {
        self.state()?.queue.entry(height).or_insert(QueueStatus::Pending);
        Ok(())
    }

    async fn enqueue_range(&self, from: u64, to: u64) -> Result<(), IngestError> {
        let mut state = self.state()?;
        for height in from..=to {
            state.queue.entry(height).or_insert(QueueStatus::Pending);
        }
        Ok(())
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<u64>, IngestError> {
        Ok(self
            .state()?
            .queue
            .iter()
            .filter(|(_, status)| **status == QueueStatus::Pending)
            .map(|(height, _)| *height)
            .take(limit)
            .collect())
    }

    async fn commit_block(&self, commit: &BlockCommit) -> Result<(), IngestError> {
        let mut state = self.state()?;
        let fault = state.commit_fault.take();
        let height = commit.height;

        let writes = std::iter::once(Write::Block(&commit.block))
            .chain(commit.transactions.iter().map(Write::Transaction))
            .chain(commit.block_txs.iter().map(|e| Write::BlockTx(height, e)))
            .chain(commit.account_txs.iter().map(Write::AccountTx))
            .chain(commit.account_order.iter().map(Write::AccountOrder))
            .chain(commit.global_txs.iter().map(Write::GlobalTx))
            .chain(std::iter::once(Write::Done(height)));

        let mut undo_log = Vec::with_capacity(commit.write_count());
        for write in writes {
            if fault == Some(undo_log.len()) {
                while let Some(undo) = undo_log.pop() {
                    state.revert(undo);
                }
                return Err(IngestError::CommitFailed {
                    height,
                    reason: "injected fault".into(),
                });
            }
            undo_log.push(state.apply(write));
        }
        tracing::trace!(height, writes = undo_log.len(), "commit applied");
        Ok(())
    }

    async fn status(&self, height: u64) -> Result<Option<QueueStatus>, IngestError> {
        Ok(self.state()?.queue.get(&height).copied())
    }

    async fn queue_len(&self) -> Result<u64, IngestError> {
        Ok(self.state()?.queue.len() as u64)
    }

    async fn queue_stats(&self) -> Result<QueueStats, IngestError> {
        let state = self.state()?;
        let done = state
            .queue
            .values()
            .filter(|s| **s == QueueStatus::Done)
            .count() as u64;
        Ok(QueueStats {
            pending: state.queue.len() as u64 - done,
            done,
        })
    }

    async fn latest_marker(&self) -> Result<Option<u64>, IngestError> {
        Ok(self.state()?.marker)
    }

    async fn advance_marker(&self, height: u64) -> Result<(), IngestError> {
        let mut state = self.state()?;
        state.marker = Some(state.marker.map_or(height, |m| m.max(height)));
        Ok(())
    }
}

#[async_trait]
impl RecordReader for InMemoryStorage {
    async fn block(&self, height: u64) -> Result<Option<BlockRecord>, IngestError> {
        Ok(self.state()?.blocks.get(&height).cloned())
    }

    async fn latest_block(&self) -> Result<Option<BlockRecord>, IngestError> {
        Ok(self.state()?.blocks.values().next_back().cloned())
    }

    async fn transaction(
        &self,
        block_number: u64,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, IngestError> {
        Ok(self
            .state()?
            .transactions
            .get(&(block_number, hash.to_string()))
            .cloned())
    }

    async fn block_transactions(&self, block_number: u64) -> Result<Vec<String>, IngestError> {
        let state = self.state()?;
        let Some(index) = state.block_txs.get(&block_number) else {
            return Ok(vec![]);
        };
        let mut entries: Vec<_> = index.iter().map(|(h, p)| (*p, h.clone())).collect();
        entries.sort();
        Ok(entries.into_iter().map(|(_, h)| h).collect())
    }

    async fn account_transactions(&self, account: &str) -> Result<Vec<String>, IngestError> {
        let state = self.state()?;
        let Some(index) = state.account_txs.get(account) else {
            return Ok(vec![]);
        };
        let mut entries: Vec<_> = index.iter().map(|(h, b)| (*b, h.clone())).collect();
        entries.sort();
        Ok(entries.into_iter().map(|(_, h)| h).collect())
    }

    async fn accounts(&self) -> Result<Vec<String>, IngestError> {
        let state = self.state()?;
        let mut entries: Vec<_> = state
            .account_order
            .iter()
            .map(|(a, b)| (*b, a.clone()))
            .collect();
        entries.sort();
        Ok(entries.into_iter().map(|(_, a)| a).collect())
    }

    async fn global_transactions(&self, limit: usize) -> Result<Vec<String>, IngestError> {
        let state = self.state()?;
        let mut entries: Vec<_> = state
            .global_txs
            .iter()
            .map(|(h, ts)| (*ts, h.clone()))
            .collect();
        entries.sort_by(|a, b| b.cmp(a));
        Ok(entries.into_iter().take(limit).map(|(_, h)| h).collect())
    }
}
