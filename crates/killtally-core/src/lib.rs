//! KillTally Core Library
//!
//! The write-back aggregation cache, the flush coordinator that moves pending
//! tallies into durable storage, and the query path that merges both.
//! Storage backends plug in through [`ports::KillStore`].

// Re-export pure types from killtally-types
pub use killtally_types::*;

pub mod cache;
pub mod config;
pub mod error;
pub mod flush;
pub mod ports;
pub mod query;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::AggregationCache;
pub use config::{BackendKind, FlushConfig, PostgresConfig, SqliteConfig, StorageConfig};
pub use error::{Result, TallyError};
pub use flush::{FlushCoordinator, FlushOutcome, FlushState};
pub use ports::{check_display_name, KillStore};
pub use query::QueryService;
pub use tracker::KillTracker;
