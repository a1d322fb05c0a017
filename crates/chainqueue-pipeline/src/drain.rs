//! Queue drain loop: pending heights through a bounded pool of parsers.

use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::sync::watch;

use chainqueue_core::error::IngestError;
use chainqueue_core::store::QueueStore;

use crate::parser::BlockParser;

/// Outcome counters of one drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Pending heights picked up this cycle.
    pub dispatched: usize,
    pub committed: usize,
    /// Heights the node does not have yet.
    pub deferred: usize,
    pub failed: usize,
}

impl DrainReport {
    pub fn is_idle(&self) -> bool {
        self.dispatched == 0
    }
}

pub struct DrainLoop {
    parser: BlockParser,
    store: Arc<dyn QueueStore>,
    batch_limit: usize,
    workers: usize,
    interval: Duration,
}

impl DrainLoop {
    pub fn new(
        parser: BlockParser,
        store: Arc<dyn QueueStore>,
        batch_limit: usize,
        workers: usize,
        interval: Duration,
    ) -> Self {
        Self {
            parser,
            store,
            batch_limit: batch_limit.max(1),
            workers: workers.max(1),
            interval,
        }
    }

    /// Parse one batch of pending heights, at most `workers` at a time.
    ///
    /// Per-height failures are counted and logged; the heights stay pending
    /// for the next cycle. A lost store is returned once the batch settles.
    pub async fn drain_once(&self) -> Result<DrainReport, IngestError> {
        let pending = self.store.fetch_pending(self.batch_limit).await?;
        let mut report = DrainReport {
            dispatched: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let parser = &self.parser;
        let mut results = stream::iter(pending)
            .map(|height| async move { (height, parser.parse(height).await) })
            .buffer_unordered(self.workers);

        let mut fatal = None;
        while let Some((height, result)) = results.next().await {
            match result {
                Ok(_) => report.committed += 1,
                Err(e) if e.is_fatal() => {
                    report.failed += 1;
                    fatal.get_or_insert(e);
                }
                Err(e) if e.is_not_yet_available() => {
                    report.deferred += 1;
                    tracing::debug!(height, "block not yet available");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(height, error = %e, "block parse failed");
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Drain until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Shutdown is observed between cycles; a running batch completes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.drain_once().await {
                Ok(report) if report.is_idle() => {}
                Ok(report) => tracing::info!(
                    dispatched = report.dispatched,
                    committed = report.committed,
                    deferred = report.deferred,
                    failed = report.failed,
                    "drain cycle complete"
                ),
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "drain loop stopping on fatal error");
                    return Err(e);
                }
                Err(e) => tracing::warn!(error = %e, "drain cycle failed"),
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("drain loop stopped");
        Ok(())
    }
}
