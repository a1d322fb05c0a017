//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors that can occur while discovering, parsing, or committing blocks.
///
/// Every variant except [`IngestError::StoreUnavailable`] is scoped to a
/// single height or a single connection attempt; the queue keeps the height
/// pending and the next drain cycle retries it.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("Block {height} not yet available")]
    HeightNotYetAvailable { height: u64 },

    #[error("Fetch of {what} failed: {reason}")]
    FetchFailed { what: String, reason: String },

    #[error("Commit of block {height} failed: {reason}")]
    CommitFailed { height: u64, reason: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Shorthand for a failed block/transaction fetch.
    pub fn fetch(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::FetchFailed {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if nothing can make progress after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Returns `true` if the height simply is not there yet.
    pub fn is_not_yet_available(&self) -> bool {
        matches!(self, Self::HeightNotYetAvailable { .. })
    }
}
