//! HTTP JSON-RPC client for EVM nodes backed by `reqwest`.
//!
//! Request/response calls go over HTTP. New-head subscriptions go over the
//! node's WebSocket endpoint (see [`crate::ws`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use chainqueue_core::chain::{ChainClient, HeadStream};
use chainqueue_core::error::IngestError;
use chainqueue_core::types::{ChainBlock, ChainTransaction};

use crate::decode::{block_from_json, parse_hex_u64, transaction_from_json};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};

/// Addresses of one node.
#[derive(Debug, Clone)]
pub struct NodeEndpoints {
    /// HTTP JSON-RPC URL.
    pub rpc_url: String,
    /// WebSocket URL used for `newHeads`.
    pub ws_url: String,
    pub request_timeout: Duration,
}

impl NodeEndpoints {
    pub fn new(rpc_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ws_url: ws_url.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// EVM JSON-RPC client.
pub struct EvmRpcClient {
    endpoints: NodeEndpoints,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl EvmRpcClient {
    pub fn new(endpoints: NodeEndpoints) -> Result<Self, IngestError> {
        let http = reqwest::Client::builder()
            .timeout(endpoints.request_timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("http client: {e}")))?;
        Ok(Self {
            endpoints,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoints(&self) -> &NodeEndpoints {
        &self.endpoints
    }

    /// Send one request and return its `result` (Null when absent).
    pub async fn call(
        &self,
        what: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, IngestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .http
            .post(&self.endpoints.rpc_url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IngestError::fetch(what, e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::fetch(what, format!("HTTP {status}: {body}")));
        }

        let body: JsonRpcResponse = resp.json().await.map_err(|e| IngestError::fetch(what, e))?;
        body.into_result().map_err(|e| IngestError::fetch(what, e))
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    async fn current_head(&self) -> Result<u64, IngestError> {
        let v = self.call("head", "eth_blockNumber", vec![]).await?;
        let hex = v
            .as_str()
            .ok_or_else(|| IngestError::Decode("eth_blockNumber: not a string".into()))?;
        parse_hex_u64(hex)
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<ChainBlock>, IngestError> {
        let what = format!("block {height}");
        let v = self
            .call(
                &what,
                "eth_getBlockByNumber",
                vec![json!(format!("0x{height:x}")), json!(false)],
            )
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        block_from_json(&v).map(Some)
    }

    async fn transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, IngestError> {
        let what = format!("tx {hash}");
        let v = self
            .call(&what, "eth_getTransactionByHash", vec![json!(hash)])
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        transaction_from_json(&v).map(Some)
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, IngestError> {
        crate::ws::subscribe_new_heads(&self.endpoints.ws_url).await
    }
}
