//! Fluent builder API for assembling the ingestion pipeline.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainqueue_pipeline::IngestBuilder;
//!
//! let config = IngestBuilder::new()
//!     .chunk_size(50_000)
//!     .drain_workers(32)
//!     .reconnect_backoff(1_000, 30_000, 2.0)
//!     .build_config();
//! ```

use std::sync::Arc;

use tokio::sync::watch;

use chainqueue_core::chain::{ChainConnector, ChainHandle};
use chainqueue_core::config::IngestConfig;
use chainqueue_core::error::IngestError;
use chainqueue_core::store::QueueStore;

use crate::discovery::HeightDiscovery;
use crate::drain::DrainLoop;
use crate::parser::BlockParser;
use crate::supervisor::{HeadSupervisor, ReconnectPolicy, SupervisorState};

/// Fluent builder for [`IngestConfig`] and [`IngestPipeline`].
#[derive(Default)]
pub struct IngestBuilder {
    config: IngestConfig,
}

impl IngestBuilder {
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
        }
    }

    /// Start from an existing configuration (e.g. loaded from a file).
    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// Heights per enqueue batch during backfill.
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Pending heights fetched per drain cycle.
    pub fn drain_batch_limit(mut self, limit: usize) -> Self {
        self.config.drain_batch_limit = limit;
        self
    }

    /// Concurrent block parses.
    pub fn drain_workers(mut self, workers: usize) -> Self {
        self.config.drain_workers = workers;
        self
    }

    /// Concurrent transaction fetches within one block.
    pub fn tx_fetch_concurrency(mut self, limit: usize) -> Self {
        self.config.tx_fetch_concurrency = limit;
        self
    }

    pub fn drain_interval_ms(mut self, ms: u64) -> Self {
        self.config.drain_interval_ms = ms;
        self
    }

    /// Reconnect delay: `initial_ms * multiplier^(n-1)`, capped at `max_ms`.
    pub fn reconnect_backoff(mut self, initial_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        self.config.reconnect_initial_ms = initial_ms;
        self.config.reconnect_max_ms = max_ms;
        self.config.reconnect_multiplier = multiplier;
        self
    }

    /// Decimals of the native unit (18 for ether).
    pub fn value_decimals(mut self, decimals: u32) -> Self {
        self.config.value_decimals = decimals;
        self
    }

    /// Build the `IngestConfig`.
    pub fn build_config(self) -> IngestConfig {
        self.config
    }

    /// Validate the configuration and wire the pipeline components.
    pub fn build(
        self,
        store: Arc<dyn QueueStore>,
        chain: ChainHandle,
        connector: Arc<dyn ChainConnector>,
    ) -> Result<IngestPipeline, IngestError> {
        self.config.validate()?;
        let config = self.config;

        let discovery = HeightDiscovery::new(Arc::clone(&store), config.chunk_size);
        let supervisor = HeadSupervisor::new(
            connector,
            chain.clone(),
            discovery,
            ReconnectPolicy::from_config(&config),
        );
        let parser = BlockParser::new(chain, Arc::clone(&store), config.value_decimals)
            .with_tx_concurrency(config.tx_fetch_concurrency);
        let drain = DrainLoop::new(
            parser,
            store,
            config.drain_batch_limit,
            config.drain_workers,
            config.drain_interval(),
        );

        Ok(IngestPipeline {
            config,
            supervisor,
            drain,
        })
    }
}

/// The supervisor and the drain loop, ready to run side by side.
pub struct IngestPipeline {
    config: IngestConfig,
    supervisor: HeadSupervisor,
    drain: DrainLoop,
}

impl IngestPipeline {
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &HeadSupervisor {
        &self.supervisor
    }

    pub fn drain(&self) -> &DrainLoop {
        &self.drain
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.supervisor.subscribe_state()
    }

    /// Run both tasks until shutdown. The first fatal error stops both.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        tracing::info!(
            chunk_size = self.config.chunk_size,
            workers = self.config.drain_workers,
            "ingestion pipeline starting"
        );
        tokio::try_join!(
            self.supervisor.run(shutdown.clone()),
            self.drain.run(shutdown),
        )?;
        Ok(())
    }
}
