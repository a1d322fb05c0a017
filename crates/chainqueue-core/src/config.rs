//! Ingestion tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::units::{ETHER_DECIMALS, MAX_DECIMALS};

/// Configuration shared by discovery, the supervisor, the parser, and the drain loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Heights per `enqueue_range` batch during backfill.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Pending heights fetched per drain cycle.
    #[serde(default = "default_drain_batch_limit")]
    pub drain_batch_limit: usize,
    /// Concurrent block parses per drain cycle.
    #[serde(default = "default_drain_workers")]
    pub drain_workers: usize,
    /// Concurrent transaction fetches within one block.
    #[serde(default = "default_tx_fetch_concurrency")]
    pub tx_fetch_concurrency: usize,
    /// Pause between drain cycles (milliseconds).
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    /// First reconnect delay (milliseconds).
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    /// Reconnect delay cap (milliseconds).
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Growth factor between reconnect attempts; `1.0` keeps a fixed interval.
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,
    /// Decimals of the native unit used for value normalization.
    #[serde(default = "default_value_decimals")]
    pub value_decimals: u32,
}

fn default_chunk_size() -> u64 { 100_000 }
fn default_drain_batch_limit() -> usize { 10_000 }
fn default_drain_workers() -> usize { 16 }
fn default_tx_fetch_concurrency() -> usize { 8 }
fn default_drain_interval_ms() -> u64 { 500 }
fn default_reconnect_initial_ms() -> u64 { 5_000 }
fn default_reconnect_max_ms() -> u64 { 60_000 }
fn default_reconnect_multiplier() -> f64 { 2.0 }
fn default_value_decimals() -> u32 { ETHER_DECIMALS }

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            drain_batch_limit: default_drain_batch_limit(),
            drain_workers: default_drain_workers(),
            tx_fetch_concurrency: default_tx_fetch_concurrency(),
            drain_interval_ms: default_drain_interval_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_multiplier: default_reconnect_multiplier(),
            value_decimals: default_value_decimals(),
        }
    }
}

impl IngestConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::Config("chunk_size must be > 0".into()));
        }
        if self.drain_batch_limit == 0 {
            return Err(IngestError::Config("drain_batch_limit must be > 0".into()));
        }
        if self.drain_workers == 0 {
            return Err(IngestError::Config("drain_workers must be > 0".into()));
        }
        if self.tx_fetch_concurrency == 0 {
            return Err(IngestError::Config("tx_fetch_concurrency must be > 0".into()));
        }
        if self.value_decimals > MAX_DECIMALS {
            return Err(IngestError::Config(format!(
                "value_decimals must be <= {MAX_DECIMALS}"
            )));
        }
        if self.reconnect_multiplier < 1.0 {
            return Err(IngestError::Config("reconnect_multiplier must be >= 1.0".into()));
        }
        if self.reconnect_max_ms < self.reconnect_initial_ms {
            return Err(IngestError::Config(
                "reconnect_max_ms must be >= reconnect_initial_ms".into(),
            ));
        }
        Ok(())
    }
}
