//! Chain client abstraction and the swappable client handle.

use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::Stream;

use crate::error::IngestError;
use crate::types::{ChainBlock, ChainTransaction, NewHead};

/// A stream of new-head notifications. An `Err` item or the end of the
/// stream both mean the subscription is lost.
pub type HeadStream = Pin<Box<dyn Stream<Item = Result<NewHead, IngestError>> + Send>>;

/// Read access to a blockchain node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Height of the node's current head.
    async fn current_head(&self) -> Result<u64, IngestError>;

    /// Fetch a block by height. `Ok(None)` means the node does not have it yet.
    async fn block_by_height(&self, height: u64) -> Result<Option<ChainBlock>, IngestError>;

    /// Fetch transaction detail by hash. `Ok(None)` means unknown to the node.
    async fn transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, IngestError>;

    /// Subscribe to new-head notifications.
    async fn subscribe_new_heads(&self) -> Result<HeadStream, IngestError>;
}

/// Produces fresh [`ChainClient`] connections (initial connect and reconnects).
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, IngestError>;
}

/// Shared accessor for the live chain client.
///
/// Components clone the handle and call [`ChainHandle::client`] for every
/// operation; a reconnect swaps the inner client for all of them at once.
#[derive(Clone)]
pub struct ChainHandle {
    inner: Arc<RwLock<Arc<dyn ChainClient>>>,
}

impl ChainHandle {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(client)),
        }
    }

    /// The client currently in use.
    pub fn client(&self) -> Arc<dyn ChainClient> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the client after a successful reconnect.
    pub fn replace(&self, client: Arc<dyn ChainClient>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = client;
    }
}

impl std::fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainHandle").finish_non_exhaustive()
    }
}
