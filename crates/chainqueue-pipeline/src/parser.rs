//! Block parser: one pending height in, one atomic commit out.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};

use chainqueue_core::chain::ChainHandle;
use chainqueue_core::error::IngestError;
use chainqueue_core::store::QueueStore;
use chainqueue_core::types::{
    BlockCommit, BlockRecord, BlockTxEntry, ChainBlock, ChainTransaction, GlobalTxEntry,
    TransactionRecord,
};
use chainqueue_core::units::normalize_value;

/// Fetches a block and its transactions and commits the derived records.
#[derive(Clone)]
pub struct BlockParser {
    chain: ChainHandle,
    store: Arc<dyn QueueStore>,
    value_decimals: u32,
    tx_concurrency: usize,
}

/// Transaction fetches in flight per block unless configured otherwise.
pub const DEFAULT_TX_CONCURRENCY: usize = 8;

impl BlockParser {
    pub fn new(chain: ChainHandle, store: Arc<dyn QueueStore>, value_decimals: u32) -> Self {
        Self {
            chain,
            store,
            value_decimals,
            tx_concurrency: DEFAULT_TX_CONCURRENCY,
        }
    }

    /// Cap concurrent transaction fetches within one block (at least 1).
    pub fn with_tx_concurrency(mut self, limit: usize) -> Self {
        self.tx_concurrency = limit.max(1);
        self
    }

    /// Parse and commit `height`. Returns the number of transactions written.
    ///
    /// Any error leaves the height pending: nothing is written unless every
    /// fetch succeeded and the commit went through as a unit.
    pub async fn parse(&self, height: u64) -> Result<usize, IngestError> {
        let client = self.chain.client();

        let block = client
            .block_by_height(height)
            .await?
            .ok_or(IngestError::HeightNotYetAvailable { height })?;
        if block.number != height {
            return Err(IngestError::fetch(
                format!("block {height}"),
                format!("node returned block {}", block.number),
            ));
        }

        let fetches = block.transactions.iter().map(|hash| {
            let client = Arc::clone(&client);
            async move {
                client
                    .transaction(hash)
                    .await?
                    .ok_or_else(|| IngestError::fetch(format!("tx {hash}"), "unknown to node"))
            }
        }).collect::<Vec<_>>();
        let txs: Vec<ChainTransaction> = stream::iter(fetches)
            .buffered(self.tx_concurrency)
            .try_collect()
            .await?;

        let commit = build_commit(height, &block, &txs, self.value_decimals);
        self.store.commit_block(&commit).await?;

        tracing::debug!(height, txs = txs.len(), "block committed");
        Ok(txs.len())
    }
}

/// Derive every record of one block.
///
/// `txs` must be in block order. The receiver of a contract creation has no
/// address yet and is not indexed.
pub fn build_commit(
    height: u64,
    block: &ChainBlock,
    txs: &[ChainTransaction],
    value_decimals: u32,
) -> BlockCommit {
    let mut commit = BlockCommit::new(
        height,
        BlockRecord {
            number: block.number,
            validator: block.validator(),
            gas_used: block.gas_used,
            size: block.size,
            timestamp: block.timestamp,
            hash: block.hash.clone(),
        },
    );

    for (position, tx) in txs.iter().enumerate() {
        commit.transactions.push(TransactionRecord {
            hash: tx.hash.clone(),
            from: tx.from.clone(),
            to: tx.to.clone(),
            value: normalize_value(tx.value, value_decimals),
            gas: tx.gas,
            gas_price: tx.gas_price.to_string(),
            input: tx.input.clone(),
            nonce: tx.nonce,
            block_number: block.number,
        });
        commit.block_txs.push(BlockTxEntry {
            position: position as u32,
            tx_hash: tx.hash.clone(),
        });

        if let Some(to) = tx.to.as_deref() {
            commit.associate_account(to, &tx.hash, block.number);
        }
        commit.associate_account(&tx.from, &tx.hash, block.number);

        commit.global_txs.push(GlobalTxEntry {
            tx_hash: tx.hash.clone(),
            timestamp: block.timestamp,
        });
    }

    commit
}
