//! Height discovery: keeps the queue covering every height up to the head.
//!
//! # Backfill
//! Starting after the marker (or at genesis when there is none), heights are
//! enqueued in chunks. The first chunk is `[start, start + chunk]`, every
//! following chunk `(prev, prev + chunk]`, the last one capped at the head.
//! The marker is advanced after each chunk, so an interrupted backfill
//! resumes after the last completed chunk.
//!
//! # New heads
//! A notification for height `N` enqueues exactly `N`, unless the queue is
//! still empty, in which case everything up to `N` is enqueued. When `N`
//! skips past `marker + 1`, the skipped heights are enqueued together with
//! `N` so the marker never moves over a height that is not queued.

use std::sync::Arc;

use chainqueue_core::error::IngestError;
use chainqueue_core::store::QueueStore;
use chainqueue_core::types::NewHead;

/// Result of a backfill pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// First and last height enqueued, `None` when already caught up.
    pub range: Option<(u64, u64)>,
    /// Number of `enqueue_range` batches issued.
    pub batches: u64,
}

/// What a new-head notification led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadAction {
    /// The single height was enqueued.
    Enqueued(u64),
    /// The queue was empty; everything up to the head was enqueued.
    FullResync(SyncReport),
    /// The head skipped heights; `(marker, head]` was enqueued.
    GapFilled(SyncReport),
}

/// Chunk boundaries covering `[start, head]`.
pub fn plan_chunks(start: u64, head: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    if start > head {
        return chunks;
    }
    let mut from = start;
    let mut to = start.saturating_add(chunk_size).min(head);
    loop {
        chunks.push((from, to));
        if to >= head {
            break;
        }
        from = to + 1;
        to = to.saturating_add(chunk_size).min(head);
    }
    chunks
}

/// Enqueues heights into a [`QueueStore`].
#[derive(Clone)]
pub struct HeightDiscovery {
    store: Arc<dyn QueueStore>,
    chunk_size: u64,
}

impl HeightDiscovery {
    pub fn new(store: Arc<dyn QueueStore>, chunk_size: u64) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Enqueue every height after the marker up to `head`.
    pub async fn sync_to(&self, head: u64) -> Result<SyncReport, IngestError> {
        let start = match self.store.latest_marker().await? {
            Some(marker) => marker.saturating_add(1),
            None => 0,
        };
        self.enqueue_chunked(start, head).await
    }

    /// Enqueue `[0, head]` regardless of the marker.
    pub async fn full_resync(&self, head: u64) -> Result<SyncReport, IngestError> {
        self.enqueue_chunked(0, head).await
    }

    /// React to a new-head notification.
    pub async fn on_new_head(&self, head: NewHead) -> Result<HeadAction, IngestError> {
        if self.store.queue_len().await? == 0 {
            tracing::info!(height = head.height, "queue empty, running full resync");
            let report = self.full_resync(head.height).await?;
            return Ok(HeadAction::FullResync(report));
        }
        let next = match self.store.latest_marker().await? {
            Some(marker) => marker.saturating_add(1),
            None => 0,
        };
        if head.height > next {
            tracing::warn!(height = head.height, from = next, "new head skipped heights, filling gap");
            let report = self.enqueue_chunked(next, head.height).await?;
            return Ok(HeadAction::GapFilled(report));
        }
        self.store.enqueue(head.height).await?;
        self.store.advance_marker(head.height).await?;
        tracing::debug!(height = head.height, "new head enqueued");
        Ok(HeadAction::Enqueued(head.height))
    }

    async fn enqueue_chunked(&self, start: u64, head: u64) -> Result<SyncReport, IngestError> {
        let chunks = plan_chunks(start, head, self.chunk_size);
        let Some(&(first, _)) = chunks.first() else {
            tracing::debug!(start, head, "queue already covers head");
            return Ok(SyncReport::default());
        };

        for &(from, to) in &chunks {
            self.store.enqueue_range(from, to).await?;
            self.store.advance_marker(to).await?;
            tracing::info!(from, to, head, "enqueued height batch");
        }

        Ok(SyncReport {
            range: Some((first, head)),
            batches: chunks.len() as u64,
        })
    }
}
