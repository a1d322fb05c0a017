//! Connector that hands out probed [`EvmRpcClient`]s.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use chainqueue_core::chain::{ChainClient, ChainConnector};
use chainqueue_core::error::IngestError;

use crate::client::{EvmRpcClient, NodeEndpoints};

/// Builds a new [`EvmRpcClient`] per connect and checks that the node
/// answers `eth_blockNumber` before returning it.
#[derive(Debug, Clone)]
pub struct EvmConnector {
    endpoints: NodeEndpoints,
}

impl EvmConnector {
    pub fn new(endpoints: NodeEndpoints) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl ChainConnector for EvmConnector {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, IngestError> {
        let client = EvmRpcClient::new(self.endpoints.clone())?;
        let head = client
            .current_head()
            .await
            .map_err(|e| IngestError::ChainUnavailable(e.to_string()))?;
        debug!(url = %self.endpoints.rpc_url, head, "node reachable");
        Ok(Arc::new(client))
    }
}
