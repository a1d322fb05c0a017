//! chainqueue-pipeline: the moving parts of block ingestion.
//!
//! - [`HeightDiscovery`] turns the chain head into pending queue entries
//! - [`HeadSupervisor`] keeps the new-head subscription alive and resyncs
//!   after every reconnect
//! - [`BlockParser`] turns one pending height into committed records
//! - [`DrainLoop`] feeds pending heights to the parser through a bounded pool
//!
//! [`IngestBuilder`] wires all four around a store and a chain handle.

pub mod builder;
pub mod discovery;
pub mod drain;
pub mod parser;
pub mod supervisor;

pub use builder::{IngestBuilder, IngestPipeline};
pub use discovery::{HeadAction, HeightDiscovery, SyncReport};
pub use drain::{DrainLoop, DrainReport};
pub use parser::{build_commit, BlockParser};
pub use supervisor::{HeadSupervisor, ReconnectPolicy, SupervisorState};
