//! chainqueue-core: foundation for the durable block ingestion queue.
//!
//! # Architecture
//!
//! ```text
//! HeadSupervisor ──► HeightDiscovery ──► QueueStore (Pending)
//!                                            │
//!                    DrainLoop ◄─────────────┘
//!                        └── BlockParser ──► QueueStore::commit_block (Done + records)
//! ```
//!
//! This crate holds the chain-agnostic pieces every other crate builds on:
//! record types, the queue store protocol, the chain client traits, and
//! value normalization.

pub mod chain;
pub mod config;
pub mod error;
pub mod store;
pub mod types;
pub mod units;

pub use chain::{ChainClient, ChainConnector, ChainHandle, HeadStream};
pub use config::IngestConfig;
pub use error::IngestError;
pub use store::{QueueStore, RecordReader};
pub use types::{
    BlockCommit, BlockRecord, ChainBlock, ChainTransaction, NewHead, QueueStats, QueueStatus,
    TransactionRecord,
};
