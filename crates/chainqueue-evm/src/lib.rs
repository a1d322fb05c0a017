//! chainqueue-evm: JSON-RPC chain client for EVM nodes.
//!
//! # Features
//! - Block and transaction fetches over HTTP (`eth_getBlockByNumber`,
//!   `eth_getTransactionByHash`, `eth_blockNumber`)
//! - `newHeads` subscription over WebSocket, surfaced as a [`HeadStream`]
//! - [`EvmConnector`] probes the node before handing out a client, so the
//!   reconnection supervisor only swaps in connections that answer
//!
//! [`HeadStream`]: chainqueue_core::chain::HeadStream

pub mod client;
pub mod connector;
pub mod decode;
pub mod jsonrpc;
pub mod ws;

pub use client::{EvmRpcClient, NodeEndpoints};
pub use connector::EvmConnector;
