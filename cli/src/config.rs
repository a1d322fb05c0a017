//! Application configuration: YAML file plus environment overrides.
//!
//! ```yaml
//! node:
//!   rpc_url: http://127.0.0.1:8545
//!   ws_url: ws://127.0.0.1:8546
//!   database_url: ./chainqueue.db
//! ingest:
//!   chunk_size: 100000
//!   drain_workers: 16
//! log:
//!   level: info
//!   json: false
//! ```
//!
//! `JSON_RPC_API_URL`, `WS_RPC_URL` and `DATABASE_URL` override the `node`
//! section when set.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use chainqueue_core::config::IngestConfig;
use chainqueue_evm::NodeEndpoints;

use crate::logging::LogConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// SQLite file path or `sqlite:` URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_rpc_url() -> String { "http://127.0.0.1:8545".into() }
fn default_ws_url() -> String { "ws://127.0.0.1:8546".into() }
fn default_database_url() -> String { "./chainqueue.db".into() }
fn default_request_timeout_secs() -> u64 { 30 }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            ws_url: default_ws_url(),
            database_url: default_database_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl NodeConfig {
    pub fn endpoints(&self) -> NodeEndpoints {
        NodeEndpoints::new(&self.rpc_url, &self.ws_url)
            .with_timeout(Duration::from_secs(self.request_timeout_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Load from `path` (defaults when `None`) and apply the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.ingest.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Override node settings from `lookup` (the process environment in `load`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(url) = non_empty("JSON_RPC_API_URL") {
            self.node.rpc_url = url;
        }
        if let Some(url) = non_empty("WS_RPC_URL") {
            self.node.ws_url = url;
        }
        if let Some(url) = non_empty("DATABASE_URL") {
            self.node.database_url = url;
        }
    }
}
