//! Kuba Broker - query coordination tier of the Kuba time-series database
//!
//! A broker accepts a parsed metric query, works out which storage replicas
//! hold the data, fans the query out as a distributed task and merges the
//! partial per-series results into one ordered result set.
//!
//! - `query`: planning, dispatch boundary, orchestration and merge
//! - `coordinator`: the cluster view the query path reads from
//! - `config` / `logging` / `metrics`: process plumbing

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics for the query path
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber initialisation
pub mod logging;

/// Cluster state consumed by the query path
/// Provides the broker's cached view and storage-state persistence
pub mod coordinator;

/// Distributed metric query engine
/// Provides plan construction, task dispatch, bounded waiting and result merging
pub mod query;

// Re-export main types
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use query::{Query, QueryContext, QueryError, QueryFactory, ResultSet};
pub use types::{BrokerNode, DatabaseConfig, Interval, TimeRange};
