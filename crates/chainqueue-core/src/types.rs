//! Shared types: queue entries, chain payloads, and normalized records.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

// ─── Queue ────────────────────────────────────────────────────────────────────

/// Lifecycle of a queued height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Enqueued, waiting for the block parser.
    Pending,
    /// Parsed and committed.
    Done,
}

impl QueueStatus {
    /// Integer tag used by persistent backends.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Done => 1,
        }
    }

    pub fn from_i64(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(Self::Pending),
            1 => Some(Self::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub done: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.done
    }

    /// Share of queued heights already committed, in percent.
    pub fn percent_done(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.done as f64 / self.total() as f64 * 100.0
    }
}

// ─── Chain payloads ───────────────────────────────────────────────────────────

/// A new-head notification from the chain subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHead {
    pub height: u64,
}

/// A block as returned by the chain client, transactions as hashes only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: String,
    /// Block author on clients that report one (Parity-style nodes).
    pub author: Option<String>,
    pub miner: Option<String>,
    pub gas_used: u64,
    pub size: u64,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    /// Transaction hashes in block order.
    pub transactions: Vec<String>,
}

impl ChainBlock {
    /// The block producer: `author` when the client reports it, else `miner`.
    pub fn validator(&self) -> String {
        self.author
            .as_deref()
            .filter(|a| !a.is_empty())
            .or(self.miner.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

/// Transaction detail as returned by the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    /// Value in the chain's smallest unit (wei).
    pub value: U256,
    pub gas: u64,
    pub gas_price: U256,
    pub input: String,
    pub nonce: u64,
    /// `None` while the transaction is still pending on the node.
    pub block_number: Option<u64>,
}

// ─── Records ──────────────────────────────────────────────────────────────────

/// Normalized block detail, one per height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub validator: String,
    pub gas_used: u64,
    pub size: u64,
    pub timestamp: i64,
    pub hash: String,
}

/// Normalized transaction detail, keyed by `(block_number, hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    /// Decimal string in display units (see [`crate::units`]).
    pub value: String,
    pub gas: u64,
    /// Decimal string in the smallest unit.
    pub gas_price: String,
    pub input: String,
    pub nonce: u64,
    pub block_number: u64,
}

impl TransactionRecord {
    /// Returns `true` if this transaction deployed a contract.
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

/// Position of a transaction inside its block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTxEntry {
    pub position: u32,
    pub tx_hash: String,
}

/// An account's participation in a transaction, ordered by block number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTxEntry {
    pub account: String,
    pub tx_hash: String,
    pub block_number: u64,
}

/// Activity of an account at a block; stores keep the earliest block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOrderEntry {
    pub account: String,
    pub block_number: u64,
}

/// A transaction's slot in the global order, scored by block timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalTxEntry {
    pub tx_hash: String,
    pub timestamp: i64,
}

/// Every write derived from one block, committed as a single unit together
/// with the queue status flip to [`QueueStatus::Done`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCommit {
    pub height: u64,
    pub block: BlockRecord,
    pub transactions: Vec<TransactionRecord>,
    pub block_txs: Vec<BlockTxEntry>,
    pub account_txs: Vec<AccountTxEntry>,
    pub account_order: Vec<AccountOrderEntry>,
    pub global_txs: Vec<GlobalTxEntry>,
}

impl BlockCommit {
    pub fn new(height: u64, block: BlockRecord) -> Self {
        Self {
            height,
            block,
            transactions: vec![],
            block_txs: vec![],
            account_txs: vec![],
            account_order: vec![],
            global_txs: vec![],
        }
    }

    /// Stage the association of `account` with `tx_hash` and its first-seen activity.
    pub fn associate_account(&mut self, account: &str, tx_hash: &str, block_number: u64) {
        self.account_txs.push(AccountTxEntry {
            account: account.to_string(),
            tx_hash: tx_hash.to_string(),
            block_number,
        });
        self.account_order.push(AccountOrderEntry {
            account: account.to_string(),
            block_number,
        });
    }

    /// Total number of staged writes, including the status flip.
    pub fn write_count(&self) -> usize {
        1 + 1
            + self.transactions.len()
            + self.block_txs.len()
            + self.account_txs.len()
            + self.account_order.len()
            + self.global_txs.len()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
