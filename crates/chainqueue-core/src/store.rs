//! The queue store protocol and the downstream read surface.
//!
//! Backends live in `chainqueue-storage` (memory, SQLite).

use async_trait::async_trait;

use crate::error::IngestError;
use crate::types::{BlockCommit, BlockRecord, QueueStats, QueueStatus, TransactionRecord};

/// Durable work queue keyed by block height, plus the destination for the
/// normalized records of each block.
///
/// Only height discovery creates entries; only the block parser flips them
/// to done, through [`QueueStore::commit_block`].
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Enqueue `height` as pending. No-op if the height is already queued,
    /// so a done height is never resurrected.
    async fn enqueue(&self, height: u64) -> Result<(), IngestError>;

    /// Enqueue every height in `[from, to]` as one batch, with the same
    /// conditional semantics as [`QueueStore::enqueue`].
    async fn enqueue_range(&self, from: u64, to: u64) -> Result<(), IngestError>;

    /// Up to `limit` pending heights in ascending order.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<u64>, IngestError>;

    /// Atomically write every record in `commit` and flip its height to done.
    ///
    /// Fails as a unit with [`IngestError::CommitFailed`]; on failure nothing
    /// is visible and the height stays pending.
    async fn commit_block(&self, commit: &BlockCommit) -> Result<(), IngestError>;

    /// Status of one height, `None` if it was never enqueued.
    async fn status(&self, height: u64) -> Result<Option<QueueStatus>, IngestError>;

    /// Number of queue entries regardless of status.
    async fn queue_len(&self) -> Result<u64, IngestError>;

    /// Pending / done counters.
    async fn queue_stats(&self) -> Result<QueueStats, IngestError>;

    /// Highest height known to be enqueued.
    async fn latest_marker(&self) -> Result<Option<u64>, IngestError>;

    /// Raise the marker to `height`; lower values are ignored.
    async fn advance_marker(&self, height: u64) -> Result<(), IngestError>;
}

/// Read-only access to committed records, consumed by explorers and APIs.
#[async_trait]
pub trait RecordReader: Send + Sync {
    async fn block(&self, height: u64) -> Result<Option<BlockRecord>, IngestError>;

    /// Highest committed block.
    async fn latest_block(&self) -> Result<Option<BlockRecord>, IngestError>;

    async fn transaction(
        &self,
        block_number: u64,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, IngestError>;

    /// Transaction hashes of a block in block order.
    async fn block_transactions(&self, block_number: u64) -> Result<Vec<String>, IngestError>;

    /// Transaction hashes an account took part in, ordered by block number.
    async fn account_transactions(&self, account: &str) -> Result<Vec<String>, IngestError>;

    /// Accounts ordered by the block of their first activity.
    async fn accounts(&self) -> Result<Vec<String>, IngestError>;

    /// The most recent `limit` transaction hashes, newest first by block timestamp.
    async fn global_transactions(&self, limit: usize) -> Result<Vec<String>, IngestError>;
}
